//! Session multiplexing over one shared raw pipe
//!
//! [`BridgeRouter`] owns the raw pipe and the table of live sessions. Every
//! inbound datagram is classified by a key extractor and handed to the
//! session registered under that key; unknown keys may lazily create a
//! session through the fresh-session handler.

pub mod router;

pub use router::{BridgeRouter, FreshSessionHandler, KeyExtractor, RouterErrorCallback};

use rpipe_pipe::PipeError;
use rpipe_proto::SessionKey;
use thiserror::Error;

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Session already registered: {0}")]
    SessionExists(SessionKey),

    #[error("Session {key} failed to initialize: {source}")]
    SessionInit {
        key: SessionKey,
        #[source]
        source: PipeError,
    },

    /// The shared raw pipe failed and every session was torn down
    #[error("Raw pipe failed: {0}")]
    Fatal(#[source] PipeError),

    #[error("Router closed")]
    Closed,
}
