//! Go-back-N send side
//!
//! Sequence numbers count segments. `snd_una` is the oldest unacknowledged
//! segment and `snd_nxt` the number the next new segment gets:
//!
//! ```text
//!  snd_una            snd_nxt
//!     │                  │
//! ────┼──────────────────┼────────────────▶
//!     │ <── in flight ──▶│ <── pending ──▶
//! ```

use crate::pool::SegmentPool;
use crate::rto::RtoEstimator;
use crate::segment::seq_lt;
use rpipe_pipe::{EngineConfig, EngineError};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Pending segments allowed per unit of send window
const PENDING_PER_WND: usize = 4;

/// One in-flight segment
#[derive(Debug)]
pub struct Entry {
    pub sn: u32,
    pub payload: Vec<u8>,
    pub tx_count: u32,
    pub sent_at: u32,
}

/// Why the window has to go out again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retransmit {
    Timeout,
    DuplicateAcks,
}

#[derive(Debug)]
pub struct GbnSender {
    snd_una: u32,
    snd_nxt: u32,
    pending: VecDeque<Vec<u8>>,
    window: VecDeque<Entry>,
    snd_wnd: u32,
    peer_wnd: u32,
    flow_control: bool,
    cwnd: f32,
    fc_alpha: f32,
    dup_acks: u8,
    dup_ack_limit: u8,
    fast_retransmit: bool,
    timeouts: u32,
    tolerance: u32,
    rto: RtoEstimator,
    retransmitted: u64,
}

impl GbnSender {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            snd_una: 0,
            snd_nxt: 0,
            pending: VecDeque::new(),
            window: VecDeque::with_capacity(config.snd_wnd as usize),
            snd_wnd: config.snd_wnd,
            // Assume the peer runs with the same window until it says otherwise.
            peer_wnd: config.rcv_wnd,
            flow_control: config.flow_control,
            cwnd: 1.0,
            fc_alpha: config.fc_alpha,
            dup_acks: 0,
            dup_ack_limit: config.dup_ack_limit,
            fast_retransmit: false,
            timeouts: 0,
            tolerance: config.tolerance as u32,
            rto: RtoEstimator::new(config.interval),
            retransmitted: 0,
        }
    }

    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn cwnd(&self) -> f32 {
        self.cwnd
    }

    pub fn rto(&self) -> u32 {
        self.rto.rto()
    }

    /// Segments retransmitted over the sender's lifetime
    pub fn retransmitted(&self) -> u64 {
        self.retransmitted
    }

    /// Free pending slots
    pub fn queue_room(&self) -> usize {
        (self.snd_wnd as usize * PENDING_PER_WND).saturating_sub(self.pending.len())
    }

    pub fn queue(&mut self, payload: Vec<u8>) {
        self.pending.push_back(payload);
    }

    /// Segments allowed in flight right now
    fn limit(&self) -> usize {
        let mut limit = self.snd_wnd.min(self.peer_wnd) as usize;
        if self.flow_control {
            limit = limit.min(self.cwnd as usize);
        }
        // A zero window still lets one probe out.
        limit.max(1)
    }

    /// Move the next pending segment into the window, if the window has room
    pub fn promote(&mut self, now: u32) -> Option<&Entry> {
        if self.window.len() >= self.limit() {
            return None;
        }
        let payload = self.pending.pop_front()?;

        self.window.push_back(Entry {
            sn: self.snd_nxt,
            payload,
            tx_count: 1,
            sent_at: now,
        });
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.window.back()
    }

    /// Apply a cumulative ack and a window advertisement.
    ///
    /// Returns the number of newly acknowledged segments. Acks outside
    /// `[snd_una, snd_nxt]` are ignored.
    pub fn on_ack(&mut self, una: u32, wnd: u16, now: u32, pool: &mut SegmentPool) -> usize {
        self.peer_wnd = wnd as u32;

        if seq_lt(una, self.snd_una) || seq_lt(self.snd_nxt, una) {
            return 0;
        }

        let mut acked = 0;
        let mut rtt_sample = None;
        while let Some(front) = self.window.front() {
            if !seq_lt(front.sn, una) {
                break;
            }
            if let Some(entry) = self.window.pop_front() {
                // Karn: only segments sent exactly once give a usable sample.
                if entry.tx_count == 1 {
                    rtt_sample = Some(elapsed(now, entry.sent_at));
                }
                pool.give(entry.payload);
                acked += 1;
            }
        }

        if acked == 0 {
            return 0;
        }

        self.snd_una = una;
        self.timeouts = 0;
        self.dup_acks = 0;
        if let Some(rtt) = rtt_sample {
            self.rto.sample(rtt);
        }
        if self.flow_control {
            self.cwnd = (self.cwnd + acked as f32).min(self.snd_wnd as f32);
        }
        acked
    }

    /// Count a pure ack that did not advance `snd_una`
    pub fn on_duplicate_ack(&mut self, una: u32) {
        if self.dup_ack_limit == 0 || una != self.snd_una || self.window.is_empty() {
            return;
        }
        self.dup_acks += 1;
        if self.dup_acks >= self.dup_ack_limit {
            self.dup_acks = 0;
            self.fast_retransmit = true;
        }
    }

    /// Decide whether the whole window must be resent at `now`.
    ///
    /// Fails with [`EngineError::DeadLink`] once more than `tolerance`
    /// consecutive timeouts have passed without progress.
    pub fn poll_retransmit(&mut self, now: u32) -> Result<Option<Retransmit>, EngineError> {
        let Some(oldest) = self.window.front() else {
            self.fast_retransmit = false;
            return Ok(None);
        };

        if elapsed(now, oldest.sent_at) >= self.rto.rto() {
            self.timeouts += 1;
            if self.timeouts > self.tolerance {
                warn!(
                    "No progress after {} timeouts, snd_una {}",
                    self.timeouts, self.snd_una
                );
                return Err(EngineError::DeadLink(self.timeouts));
            }

            self.rto.back_off();
            if self.flow_control {
                self.cwnd = (self.cwnd * self.fc_alpha).max(1.0);
            }
            self.fast_retransmit = false;
            debug!(
                "Retransmit timeout #{}: {} segments from sn {}, rto now {}ms",
                self.timeouts,
                self.window.len(),
                self.snd_una,
                self.rto.rto()
            );
            return Ok(Some(Retransmit::Timeout));
        }

        if self.fast_retransmit {
            self.fast_retransmit = false;
            debug!("Fast retransmit from sn {}", self.snd_una);
            return Ok(Some(Retransmit::DuplicateAcks));
        }

        Ok(None)
    }

    /// Stamp every in-flight segment as resent at `now`
    pub fn retransmit_window(&mut self, now: u32) -> impl Iterator<Item = &Entry> {
        self.retransmitted += self.window.len() as u64;
        for entry in self.window.iter_mut() {
            entry.tx_count += 1;
            entry.sent_at = now;
        }
        self.window.iter()
    }
}

/// Milliseconds from `then` to `now` on a wrapping clock; zero if `then` is ahead
fn elapsed(now: u32, then: u32) -> u32 {
    let diff = now.wrapping_sub(then);
    if diff > i32::MAX as u32 {
        0
    } else {
        diff
    }
}
