//! UDP transport for the session router
//!
//! [`UdpRawPipe`] is the raw pipe a [`BridgeRouter`](rpipe_router::BridgeRouter)
//! sits on, and [`drive`] is the event loop feeding it: datagrams read from
//! the socket go to `router.input`, and a fixed ticker calls `router.flush`
//! with [`clock_ms`].
//!
//! # Example
//!
//! ```no_run
//! use rpipe_router::BridgeRouter;
//! use rpipe_transport_udp::{drive, UdpRawPipe};
//! use std::rc::Rc;
//! use std::time::Duration;
//! use tokio::net::UdpSocket;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = Rc::new(UdpSocket::bind("0.0.0.0:10010").await?);
//! let mut router = BridgeRouter::new(UdpRawPipe::new(Rc::clone(&socket)))?;
//! drive(&mut router, &socket, Duration::from_millis(10), tokio::signal::ctrl_c()).await?;
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod raw;

pub use driver::{clock_ms, drive};
pub use raw::UdpRawPipe;

use rpipe_router::RouterError;
use thiserror::Error;

/// UDP transport errors
#[derive(Debug, Error)]
pub enum UdpError {
    #[error("Router failed: {0}")]
    Router(#[from] RouterError),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}
