//! Session routing protocol definitions
//!
//! This crate defines the session header that prefixes every datagram at the
//! routing boundary, the close-signal commands, and the value types used to
//! name a session ([`Endpoint`], [`SessionKey`]).

pub mod header;
pub mod key;

pub use header::{is_close_signal, Command, SessionHeader};
pub use key::{Endpoint, SessionKey};

use thiserror::Error;

/// Session header length: cmd (1) + conv (4) = 5 bytes
pub const HEAD_LEN: usize = 5;

/// Reserved command: abrupt termination
pub const RST: u8 = 0x01;

/// Reserved command: graceful termination
pub const FIN: u8 = 0x02;

/// Protocol errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Conversation id must be non-zero")]
    ZeroConv,

    #[error("Header too short: {0} bytes")]
    ShortHeader(usize),

    #[error("Buffer too small for header: {0} bytes")]
    BufferTooSmall(usize),
}
