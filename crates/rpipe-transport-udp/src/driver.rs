//! Socket event loop

use crate::UdpError;
use rpipe_pipe::{Packet, Pipe, PIPE_BUFSIZ};
use rpipe_router::BridgeRouter;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call in this process, wrapping at `u32::MAX`
pub fn clock_ms() -> u32 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u32
}

enum Event {
    Shutdown,
    Received(io::Result<(usize, SocketAddr)>),
    Tick,
}

/// Pump `socket` into `router` until `shutdown` resolves or the router fails.
///
/// Every datagram read is fed to [`BridgeRouter::input`] tagged with its
/// sender, and every `interval` the router is flushed with [`clock_ms`].
/// The router is left open on shutdown; closing it is up to the caller.
pub async fn drive<R, F>(
    router: &mut BridgeRouter<R>,
    socket: &UdpSocket,
    interval: Duration,
    shutdown: F,
) -> Result<(), UdpError>
where
    R: Pipe + 'static,
    F: Future,
{
    let local = socket.local_addr()?;
    // Non-blocking writes only succeed once the reactor has seen the socket.
    socket.writable().await?;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buf = vec![0u8; PIPE_BUFSIZ];
    tokio::pin!(shutdown);

    info!("Serving sessions on {} (flush every {:?})", local, interval);

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => Event::Shutdown,
            received = socket.recv_from(&mut buf) => Event::Received(received),
            _ = ticker.tick() => Event::Tick,
        };

        match event {
            Event::Shutdown => {
                debug!("Shutdown requested, leaving {}", local);
                return Ok(());
            }
            Event::Received(Ok((n, sender))) => {
                router.input(Packet::to(&buf[..n], Some(sender.into())))?;
            }
            Event::Received(Err(e)) => {
                // ICMP errors from earlier sends surface here on some platforms
                warn!("Receive on {} failed: {}", local, e);
            }
            Event::Tick => router.flush(clock_ms())?,
        }
    }
}
