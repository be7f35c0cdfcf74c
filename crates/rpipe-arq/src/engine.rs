use crate::pool::SegmentPool;
use crate::receiver::GbnReceiver;
use crate::segment::{SegmentHeader, ACK, PUSH, SEGMENT_HEADER_LEN};
use crate::sender::GbnSender;
use rpipe_pipe::engine::EngineOutput;
use rpipe_pipe::{Engine, EngineConfig, EngineError};
use tracing::trace;

/// Go-back-N ARQ engine for one conversation.
///
/// `send` splits data into MSS-sized segments. `update` pushes as many of them
/// as the window allows, resends the window on timeout or after duplicate
/// acks, and emits a pure ack when received data has not been acknowledged
/// yet. Received segments come out of `recv` one at a time, in order.
#[derive(Debug)]
pub struct GbnEngine {
    conv: u32,
    mss: usize,
    sender: GbnSender,
    receiver: GbnReceiver,
    pool: SegmentPool,
    /// Timestamp of the last `update`, used to stamp acks seen by `input`
    current: u32,
    out: Vec<u8>,
}

impl GbnEngine {
    /// Largest payload carried by one segment
    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn in_flight(&self) -> usize {
        self.sender.in_flight()
    }

    /// Segments queued but not yet sent
    pub fn pending(&self) -> usize {
        self.sender.pending()
    }

    pub fn rto(&self) -> u32 {
        self.sender.rto()
    }

    pub fn cwnd(&self) -> f32 {
        self.sender.cwnd()
    }

    pub fn retransmitted(&self) -> u64 {
        self.sender.retransmitted()
    }

    /// True when nothing is queued, in flight or owed an ack
    pub fn is_idle(&self) -> bool {
        self.sender.in_flight() == 0 && self.sender.pending() == 0 && !self.receiver.ack_pending()
    }

    fn validate(conv: u32, config: &EngineConfig) -> Result<usize, EngineError> {
        if conv == 0 {
            return Err(EngineError::InvalidConfig("conv must be non-zero".into()));
        }
        if config.snd_wnd == 0 || config.rcv_wnd == 0 {
            return Err(EngineError::InvalidConfig("windows must be non-zero".into()));
        }
        if !(config.fc_alpha > 0.0 && config.fc_alpha <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "fc_alpha {} outside (0, 1]",
                config.fc_alpha
            )));
        }

        let mtu = config.mtu as usize;
        if mtu <= SEGMENT_HEADER_LEN {
            return Err(EngineError::InvalidConfig(format!(
                "mtu {} leaves no room for payload",
                mtu
            )));
        }
        Ok((mtu - SEGMENT_HEADER_LEN).min(u16::MAX as usize))
    }
}

fn emit(
    out: &mut Vec<u8>,
    header: SegmentHeader,
    payload: &[u8],
    output: EngineOutput<'_>,
) -> Result<(), EngineError> {
    out.clear();
    header.encode_into(out);
    out.extend_from_slice(payload);
    output(out.as_slice()).map_err(|_| EngineError::Output)?;
    Ok(())
}

impl Engine for GbnEngine {
    fn create(conv: u32, config: &EngineConfig) -> Result<Self, EngineError> {
        let mss = Self::validate(conv, config)?;

        Ok(Self {
            conv,
            mss,
            sender: GbnSender::new(config),
            receiver: GbnReceiver::new(config.rcv_wnd),
            pool: SegmentPool::new(config.seg_pool_cap as usize),
            current: 0,
            out: Vec::with_capacity(SEGMENT_HEADER_LEN + mss),
        })
    }

    fn conv(&self) -> u32 {
        self.conv
    }

    /// Accepts as many whole segments as the pending queue has room for
    fn send(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        if data.is_empty() {
            return Ok(0);
        }
        let room = self.sender.queue_room();
        if room == 0 {
            return Err(EngineError::WindowFull);
        }

        let accepted = data.len().min(room.saturating_mul(self.mss));
        for chunk in data[..accepted].chunks(self.mss) {
            let segment = self.pool.take(chunk);
            self.sender.queue(segment);
        }
        Ok(accepted)
    }

    fn input(&mut self, datagram: &[u8]) -> Result<usize, EngineError> {
        let (header, payload) = SegmentHeader::decode(datagram)?;
        if header.conv != self.conv {
            return Err(EngineError::ConvMismatch {
                expected: self.conv,
                got: header.conv,
            });
        }

        let acked = self
            .sender
            .on_ack(header.una, header.wnd, self.current, &mut self.pool);

        match header.cmd {
            PUSH => {
                let accepted = self
                    .receiver
                    .on_segment(header.sn, payload, &mut self.pool);
                trace!(
                    "conv {}: push sn {} ({} bytes) {}",
                    self.conv,
                    header.sn,
                    payload.len(),
                    if accepted { "accepted" } else { "dropped" }
                );
            }
            _ => {
                if acked == 0 {
                    self.sender.on_duplicate_ack(header.una);
                }
            }
        }

        Ok(datagram.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        Ok(self.receiver.read(buf, &mut self.pool))
    }

    fn update(&mut self, now: u32, output: EngineOutput<'_>) -> Result<(), EngineError> {
        self.current = now;

        let conv = self.conv;
        let una = self.receiver.ack_number();
        let wnd = self.receiver.free_window();
        let push = |sn: u32, len: usize| SegmentHeader {
            cmd: PUSH,
            conv,
            sn,
            una,
            wnd,
            len: len as u16,
        };

        if let Some(reason) = self.sender.poll_retransmit(now)? {
            let mut resent = 0;
            for entry in self.sender.retransmit_window(now) {
                emit(&mut self.out, push(entry.sn, entry.payload.len()), &entry.payload, output)?;
                resent += 1;
            }
            if resent > 0 {
                self.receiver.ack_sent();
            }
            trace!("conv {}: resent {} segments ({:?})", conv, resent, reason);
        }

        while let Some(entry) = self.sender.promote(now) {
            emit(&mut self.out, push(entry.sn, entry.payload.len()), &entry.payload, output)?;
            self.receiver.ack_sent();
        }

        if self.receiver.ack_pending() {
            let ack = SegmentHeader {
                cmd: ACK,
                conv,
                sn: self.sender.snd_nxt(),
                una,
                wnd,
                len: 0,
            };
            emit(&mut self.out, ack, &[], output)?;
            self.receiver.ack_sent();
        }

        Ok(())
    }
}
