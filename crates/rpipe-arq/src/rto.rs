//! Retransmission timeout estimation
//!
//! Jacobson/Karels smoothing (RFC 6298) over a millisecond clock:
//! `RTO = SRTT + 4 * RTTVAR`, doubled on every timeout and reset by the next
//! clean sample.

pub const INITIAL_RTO_MS: u32 = 200;
pub const MIN_RTO_MS: u32 = 30;
pub const MAX_RTO_MS: u32 = 60_000;

#[derive(Debug, Clone)]
pub struct RtoEstimator {
    srtt: Option<u32>,
    rttvar: u32,
    rto: u32,
    floor: u32,
}

impl RtoEstimator {
    /// `interval` is the engine update period; the RTO never drops below it
    pub fn new(interval: u32) -> Self {
        Self {
            srtt: None,
            rttvar: 0,
            rto: INITIAL_RTO_MS.max(interval),
            floor: MIN_RTO_MS.max(interval),
        }
    }

    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn srtt(&self) -> Option<u32> {
        self.srtt
    }

    pub fn sample(&mut self, rtt: u32) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                let diff = rtt.abs_diff(srtt);
                self.rttvar = (self.rttvar * 3 + diff) / 4;
                self.srtt = Some((srtt * 7 + rtt) / 8);
            }
        }
        self.reset();
    }

    pub fn back_off(&mut self) {
        self.rto = self.rto.saturating_mul(2).min(MAX_RTO_MS);
    }

    fn reset(&mut self) {
        let srtt = self.srtt.unwrap_or(INITIAL_RTO_MS);
        self.rto = srtt
            .saturating_add(self.rttvar.saturating_mul(4))
            .clamp(self.floor, MAX_RTO_MS);
    }
}
