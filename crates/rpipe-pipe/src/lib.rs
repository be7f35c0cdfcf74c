//! Composable pipe stages for session stacks
//!
//! A session stack is built by decoration, each stage owning the stage above
//! it:
//!
//! ```text
//!  leaf (CallbackPipe / EchoPipe)
//!      ▲ input         │ output
//!  TransportAdapterPipe    engine send/input/recv/update
//!      ▲ input         │ output
//!  SessionPipe             endpoint tagging, RST/FIN
//!      ▲ input         │ output
//!  router / raw pipe
//! ```
//!
//! Everything here runs on a single control thread. Stages share callback
//! slots through `Rc<RefCell<_>>`, so none of these types are `Send`.

pub mod adapter;
pub mod container;
pub mod engine;
pub mod error;
pub mod leaf;
pub mod pipe;
pub mod session;

pub use adapter::{EngineFactory, TransportAdapterPipe};
pub use container::ContainerPipe;
pub use engine::{Engine, EngineConfig, EngineError};
pub use error::{PipeError, PipeResult};
pub use leaf::{CallbackPipe, EchoPipe, LeafSender};
pub use pipe::{
    Datagram, ErrorCallback, OutputCallback, Packet, Pipe, PipeCallbacks, RecvCallback,
};
pub use rpipe_proto::{is_close_signal, Command, Endpoint, SessionKey, FIN, HEAD_LEN, RST};
pub use session::SessionPipe;

/// Scratch buffer size used when draining decoded data out of an engine
pub const PIPE_BUFSIZ: usize = 64 * 1024;
