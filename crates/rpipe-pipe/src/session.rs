//! Session identity stage
//!
//! The wire-facing stage of a session stack. Every packet it emits is tagged
//! with the session's endpoint, and it is the only stage that writes the bare
//! `[cmd][conv]` close signals.

use crate::container::ContainerPipe;
use crate::error::{PipeError, PipeResult};
use crate::pipe::{ErrorCallback, OutputCallback, Packet, Pipe, RecvCallback};
use rpipe_proto::{Command, Endpoint, SessionHeader, SessionKey, HEAD_LEN};
use tracing::{debug, trace};

pub struct SessionPipe<U> {
    key: SessionKey,
    endpoint: Option<Endpoint>,
    container: ContainerPipe<U>,
    closed: bool,
}

impl<U: Pipe> SessionPipe<U> {
    /// Fails with [`PipeError::InvariantViolation`] unless `key` is exactly
    /// the key built from its own conv and `endpoint`.
    pub fn new(key: SessionKey, endpoint: Option<Endpoint>, upper: U) -> PipeResult<Self> {
        let rebuilt = SessionKey::new(key.conv(), endpoint)?;
        if rebuilt != key {
            return Err(PipeError::InvariantViolation(format!(
                "session key {} does not match endpoint {:?}",
                key, endpoint
            )));
        }

        Ok(Self {
            key,
            endpoint,
            container: ContainerPipe::labeled(upper, "session"),
            closed: false,
        })
    }

    /// Session keyed by its endpoint, as created on the accepting side
    pub fn for_peer(conv: u32, endpoint: Endpoint, upper: U) -> PipeResult<Self> {
        let key = SessionKey::new(conv, Some(endpoint))?;
        Self::new(key, Some(endpoint), upper)
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn conv(&self) -> u32 {
        self.key.conv()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn upper_mut(&mut self) -> PipeResult<&mut U> {
        self.container.upper_mut()
    }
}

impl<U: Pipe> Pipe for SessionPipe<U> {
    fn init(&mut self) -> PipeResult<()> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        self.container.init_upper()?;
        let relay = self.container.callbacks().output_relay(self.endpoint);
        self.container.upper_mut()?.set_on_output(Some(relay));
        debug!("Session {} initialized", self.key);
        Ok(())
    }

    /// Writes straight to this stage's output, tagged with the session endpoint
    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        let peer = self.endpoint.or(packet.peer);
        self.container.callbacks().output(Packet::to(packet.data, peer))
    }

    /// The whole datagram, header included, goes to the upper stage
    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        self.container.upper_mut()?.input(packet)
    }

    fn flush(&mut self, now: u32) {
        if !self.closed {
            self.container.flush_upper(now);
        }
    }

    fn close(&mut self) -> PipeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing session {}", self.key);

        let result = self.container.close_upper();
        self.endpoint = None;
        result
    }

    fn set_on_output(&mut self, cb: Option<OutputCallback>) {
        self.container.set_on_output(cb);
    }

    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        self.container.set_on_recv(cb);
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        self.container.set_on_error(cb);
    }

    fn session_key(&self) -> Option<SessionKey> {
        Some(self.key)
    }

    /// Sends a bare `[cmd][conv]` header to the peer in a single `send`
    fn notify_peer_close(&mut self, cmd: Command) -> PipeResult<usize> {
        let mut head = [0u8; HEAD_LEN];
        let n = SessionHeader::new(cmd, self.key.conv()).write_to(&mut head)?;
        trace!("Session {} notifying peer: {:?}", self.key, cmd);
        self.send(Packet::new(&head[..n]))
    }
}
