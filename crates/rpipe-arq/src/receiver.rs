//! Go-back-N receive side
//!
//! Only the segment numbered `rcv_nxt` is accepted. Everything else is
//! dropped, but still answered with a cumulative ack so the sender can detect
//! the gap through duplicate acks.

use crate::pool::SegmentPool;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct GbnReceiver {
    rcv_nxt: u32,
    ready: VecDeque<Vec<u8>>,
    /// Bytes of `ready.front()` already handed out
    offset: usize,
    rcv_wnd: usize,
    ack_pending: bool,
}

impl GbnReceiver {
    pub fn new(rcv_wnd: u32) -> Self {
        Self {
            rcv_nxt: 0,
            ready: VecDeque::new(),
            offset: 0,
            rcv_wnd: rcv_wnd as usize,
            ack_pending: false,
        }
    }

    /// Cumulative ack to advertise
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }

    /// Free buffer space in segments
    pub fn free_window(&self) -> u16 {
        self.rcv_wnd
            .saturating_sub(self.ready.len())
            .min(u16::MAX as usize) as u16
    }

    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// The next outbound segment carries the current ack
    pub fn ack_sent(&mut self) {
        self.ack_pending = false;
    }

    /// Segments buffered and not yet fully read
    pub fn buffered(&self) -> usize {
        self.ready.len()
    }

    /// Returns `true` if the segment was accepted
    pub fn on_segment(&mut self, sn: u32, payload: &[u8], pool: &mut SegmentPool) -> bool {
        self.ack_pending = true;

        if sn != self.rcv_nxt || self.ready.len() >= self.rcv_wnd {
            return false;
        }

        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        if !payload.is_empty() {
            self.ready.push_back(pool.take(payload));
        }
        true
    }

    /// Copy the rest of the oldest buffered segment into `buf`, up to its length
    pub fn read(&mut self, buf: &mut [u8], pool: &mut SegmentPool) -> usize {
        let Some(front) = self.ready.front() else {
            return 0;
        };

        let rest = &front[self.offset..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.offset += n;

        if self.offset == front.len() {
            self.offset = 0;
            if let Some(done) = self.ready.pop_front() {
                pool.give(done);
            }
        }
        n
    }
}
