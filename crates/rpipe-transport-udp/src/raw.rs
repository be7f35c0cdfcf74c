//! Raw pipe over a UDP socket

use rpipe_pipe::{
    Endpoint, ErrorCallback, OutputCallback, Packet, Pipe, PipeCallbacks, PipeError, PipeResult,
    RecvCallback,
};
use std::io;
use std::rc::Rc;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Bottom of the stack: writes go straight to the socket, reads come in
/// through [`Pipe::input`] from whoever polls the socket.
///
/// Writes never wait. A full socket buffer drops the datagram and reports
/// zero bytes accepted; the engine above retransmits what matters.
pub struct UdpRawPipe {
    socket: Rc<UdpSocket>,
    default_peer: Option<Endpoint>,
    callbacks: PipeCallbacks,
    closed: bool,
}

impl UdpRawPipe {
    pub fn new(socket: Rc<UdpSocket>) -> Self {
        Self {
            socket,
            default_peer: None,
            callbacks: PipeCallbacks::new(),
            closed: false,
        }
    }

    /// Destination for packets that carry no peer (the client side)
    pub fn with_default_peer(mut self, peer: Endpoint) -> Self {
        self.default_peer = Some(peer);
        self
    }

    pub fn default_peer(&self) -> Option<Endpoint> {
        self.default_peer
    }

    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.socket.local_addr().map(Endpoint::from)
    }
}

impl Pipe for UdpRawPipe {
    fn init(&mut self) -> PipeResult<()> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        if let Ok(addr) = self.socket.local_addr() {
            debug!("UDP raw pipe ready on {}", addr);
        }
        Ok(())
    }

    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        let peer = packet
            .peer
            .or(self.default_peer)
            .ok_or(PipeError::NoPeer)?;

        match self.socket.try_send_to(packet.data, peer.socket_addr()) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("Socket busy, dropped {} bytes to {}", packet.len(), peer);
                Ok(0)
            }
            Err(e) => Err(PipeError::Io(e)),
        }
    }

    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        self.callbacks.recv(packet)
    }

    fn flush(&mut self, _now: u32) {}

    fn close(&mut self) -> PipeResult<()> {
        if !self.closed {
            self.closed = true;
            self.callbacks.clear();
            debug!("UDP raw pipe closed");
        }
        Ok(())
    }

    fn set_on_output(&mut self, _cb: Option<OutputCallback>) {}

    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        self.callbacks.set_recv(cb);
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        self.callbacks.set_error(cb);
    }
}
