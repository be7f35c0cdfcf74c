//! Session header codec
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//! +--------+--------+--------+--------+--------+------------
//! |  cmd   |          conversation id          | payload ...
//! +--------+--------+--------+--------+--------+------------
//! ```
//!
//! The router only peeks at this prefix. The datagram is never consumed or
//! rewritten, because the engine's own segment framing starts with the same
//! two fields.

use crate::{ProtoError, FIN, HEAD_LEN, RST};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Abrupt termination
    Rst,
    /// Graceful termination
    Fin,
    /// Any value owned by the transport engine's framing
    Data(u8),
}

impl Command {
    pub fn as_u8(&self) -> u8 {
        match self {
            Command::Rst => RST,
            Command::Fin => FIN,
            Command::Data(v) => *v,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Command::Rst | Command::Fin)
    }
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            RST => Command::Rst,
            FIN => Command::Fin,
            other => Command::Data(other),
        }
    }
}

/// Decoded session header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHeader {
    pub cmd: Command,
    pub conv: u32,
}

impl SessionHeader {
    pub fn new(cmd: Command, conv: u32) -> Self {
        Self { cmd, conv }
    }

    /// Peek the header at the front of `buf` without consuming it
    pub fn peek(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < HEAD_LEN {
            return Err(ProtoError::ShortHeader(buf.len()));
        }

        let mut head = &buf[..HEAD_LEN];
        let cmd = Command::from(head.get_u8());
        let conv = head.get_u32();

        Ok(Self { cmd, conv })
    }

    /// Write the header into the first [`HEAD_LEN`] bytes of `buf`
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, ProtoError> {
        if buf.len() < HEAD_LEN {
            return Err(ProtoError::BufferTooSmall(buf.len()));
        }

        let mut dst = &mut buf[..HEAD_LEN];
        dst.put_u8(self.cmd.as_u8());
        dst.put_u32(self.conv);

        Ok(HEAD_LEN)
    }

    /// Encode the header as a standalone [`HEAD_LEN`] buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEAD_LEN);
        buf.put_u8(self.cmd.as_u8());
        buf.put_u32(self.conv);
        buf.freeze()
    }
}

/// True iff `buf` holds at least a full header whose command is RST or FIN.
///
/// Shorter buffers are never close signals; this is not an error.
pub fn is_close_signal(buf: &[u8]) -> bool {
    SessionHeader::peek(buf)
        .map(|head| head.cmd.is_close())
        .unwrap_or(false)
}
