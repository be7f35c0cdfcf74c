//! Go-back-N reliable transport engine
//!
//! [`GbnEngine`] implements [`rpipe_pipe::Engine`] over unreliable datagrams:
//! cumulative acks, whole-window retransmission on timeout, fast retransmit
//! on duplicate acks, and optional congestion control with multiplicative
//! decrease.
//!
//! # Example
//!
//! ```
//! use rpipe_arq::GbnEngine;
//! use rpipe_pipe::{Engine, EngineConfig};
//!
//! let mut engine = GbnEngine::create(1, &EngineConfig::default()).unwrap();
//! engine.send(b"hello").unwrap();
//!
//! let mut wire = Vec::new();
//! engine
//!     .update(0, &mut |segment: &[u8]| {
//!         wire.push(segment.to_vec());
//!         Ok(segment.len())
//!     })
//!     .unwrap();
//! assert_eq!(wire.len(), 1);
//! ```

pub mod engine;
pub mod pool;
pub mod receiver;
pub mod rto;
pub mod segment;
pub mod sender;

pub use engine::GbnEngine;
pub use segment::{SegmentHeader, ACK, PUSH, SEGMENT_HEADER_LEN};
