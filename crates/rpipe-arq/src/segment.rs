//! Engine segment framing
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! +-----+---------+---------+---------+-------+-------+-------------
//! | cmd |  conv   |   sn    |   una   |  wnd  |  len  | payload ...
//! |  1  |    4    |    4    |    4    |   2   |   2   |
//! +-----+---------+---------+---------+-------+-------+-------------
//! ```
//!
//! The first five bytes double as the session header peeked by the router,
//! so `cmd` is never one of the reserved close values.

use bytes::{Buf, BufMut};
use rpipe_pipe::EngineError;
use rpipe_proto::{FIN, RST};

/// Byte length of the fixed segment header
pub const SEGMENT_HEADER_LEN: usize = 17;

/// Data segment
pub const PUSH: u8 = 0x51;

/// Pure acknowledgement
pub const ACK: u8 = 0x52;

const _: () = assert!(PUSH != RST && PUSH != FIN && ACK != RST && ACK != FIN);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub cmd: u8,
    pub conv: u32,
    /// Segment sequence number (counts segments, not bytes)
    pub sn: u32,
    /// Cumulative ack: every segment below this number has been received
    pub una: u32,
    /// Free receive window, in segments
    pub wnd: u16,
    pub len: u16,
}

impl SegmentHeader {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.cmd);
        buf.put_u32(self.conv);
        buf.put_u32(self.sn);
        buf.put_u32(self.una);
        buf.put_u16(self.wnd);
        buf.put_u16(self.len);
    }

    /// Split `datagram` into its header and payload.
    ///
    /// Trailing bytes past `len` are rejected, one segment per datagram.
    pub fn decode(datagram: &[u8]) -> Result<(Self, &[u8]), EngineError> {
        if datagram.len() < SEGMENT_HEADER_LEN {
            return Err(EngineError::Malformed(format!(
                "segment of {} bytes is shorter than its header",
                datagram.len()
            )));
        }

        let mut head = &datagram[..SEGMENT_HEADER_LEN];
        let header = Self {
            cmd: head.get_u8(),
            conv: head.get_u32(),
            sn: head.get_u32(),
            una: head.get_u32(),
            wnd: head.get_u16(),
            len: head.get_u16(),
        };

        if header.cmd != PUSH && header.cmd != ACK {
            return Err(EngineError::Malformed(format!(
                "unknown segment command 0x{:02x}",
                header.cmd
            )));
        }

        let payload = &datagram[SEGMENT_HEADER_LEN..];
        if payload.len() != header.len as usize {
            return Err(EngineError::Malformed(format!(
                "length field {} does not match payload of {} bytes",
                header.len,
                payload.len()
            )));
        }

        Ok((header, payload))
    }
}

/// `a < b` in wrap-around sequence space
#[inline]
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}
