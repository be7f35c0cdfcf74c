//! Reliable-transport engine contract
//!
//! The adapter treats the engine as an opaque ARQ service. Every datagram an
//! engine emits must start with `[cmd][conv]` so the router can peek the
//! session header, and `cmd` must never be one of the reserved close values.

use crate::error::PipeResult;
use rpipe_proto::HEAD_LEN;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Engine rejected operation: code {0}")]
    Rejected(i32),

    #[error("Conversation mismatch: expected {expected}, got {got}")]
    ConvMismatch { expected: u32, got: u32 },

    #[error("Malformed segment: {0}")]
    Malformed(String),

    #[error("Send window full")]
    WindowFull,

    #[error("Peer unreachable after {0} retransmissions")]
    DeadLink(u32),

    #[error("Output callback failed")]
    Output,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Engine output sink. The slice is engine-owned and only valid during the call.
pub type EngineOutput<'a> = &'a mut dyn FnMut(&[u8]) -> PipeResult<usize>;

pub trait Engine {
    fn create(conv: u32, config: &EngineConfig) -> Result<Self, EngineError>
    where
        Self: Sized;

    fn conv(&self) -> u32;

    /// Queue application bytes. Returns the number accepted.
    fn send(&mut self, data: &[u8]) -> Result<usize, EngineError>;

    /// Feed one raw datagram
    fn input(&mut self, datagram: &[u8]) -> Result<usize, EngineError>;

    /// Copy decoded in-order bytes into `buf`. `Ok(0)` means nothing is pending.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Time-driven housekeeping: retransmission, acks, window updates.
    ///
    /// Segments are handed to `output` one at a time. If `output` fails the
    /// engine stops emitting and returns [`EngineError::Output`].
    fn update(&mut self, now: u32, output: EngineOutput<'_>) -> Result<(), EngineError>;
}

/// Per-session engine tuning. Forwarded as-is; bounds are the engine's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Send window in segments
    #[serde(default = "default_wnd")]
    pub snd_wnd: u32,

    /// Receive window in segments
    #[serde(default = "default_wnd")]
    pub rcv_wnd: u32,

    /// Enable congestion/flow control
    #[serde(default = "default_flow_control")]
    pub flow_control: bool,

    /// Multiplicative decrease factor applied to the congestion window on loss
    #[serde(default = "default_fc_alpha")]
    pub fc_alpha: f32,

    /// Update interval in milliseconds
    #[serde(default = "default_interval")]
    pub interval: u32,

    /// Largest datagram the engine may emit
    #[serde(default = "default_mtu")]
    pub mtu: u32,

    /// Duplicate acks that trigger a fast retransmit
    #[serde(default = "default_dup_ack_limit")]
    pub dup_ack_limit: u8,

    /// Consecutive timeouts tolerated before the link is declared dead
    #[serde(default = "default_tolerance")]
    pub tolerance: u8,

    /// Recycled segment buffers kept per session
    #[serde(default = "default_seg_pool_cap")]
    pub seg_pool_cap: u8,
}

fn default_wnd() -> u32 {
    128
}

fn default_flow_control() -> bool {
    true
}

fn default_fc_alpha() -> f32 {
    0.5
}

fn default_interval() -> u32 {
    10
}

fn default_mtu() -> u32 {
    1400
}

fn default_dup_ack_limit() -> u8 {
    3
}

fn default_tolerance() -> u8 {
    10
}

fn default_seg_pool_cap() -> u8 {
    32
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snd_wnd: default_wnd(),
            rcv_wnd: default_wnd(),
            flow_control: default_flow_control(),
            fc_alpha: default_fc_alpha(),
            interval: default_interval(),
            mtu: default_mtu(),
            dup_ack_limit: default_dup_ack_limit(),
            tolerance: default_tolerance(),
            seg_pool_cap: default_seg_pool_cap(),
        }
    }
}

impl EngineConfig {
    /// Copy of this config whose MTU leaves room for the session header
    /// inside a link MTU of `link_mtu` bytes.
    pub fn for_session_layer(&self, link_mtu: u32) -> Result<Self, EngineError> {
        if link_mtu as usize <= HEAD_LEN {
            return Err(EngineError::InvalidConfig(format!(
                "mtu {} must exceed session header length {}",
                link_mtu, HEAD_LEN
            )));
        }

        Ok(Self {
            mtu: link_mtu - HEAD_LEN as u32,
            ..self.clone()
        })
    }
}
