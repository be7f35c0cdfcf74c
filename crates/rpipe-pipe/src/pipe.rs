//! The pipe capability and its callback slots

use crate::error::{PipeError, PipeResult};
use bytes::Bytes;
use rpipe_proto::{Command, Endpoint, SessionKey};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

/// Bytes moving through a pipe, tagged with the remote endpoint when known.
///
/// The data is borrowed for the duration of the call only. Stages that need
/// to keep it must copy it (see [`Packet::to_datagram`]).
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub data: &'a [u8],
    pub peer: Option<Endpoint>,
}

impl<'a> Packet<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, peer: None }
    }

    pub fn to(data: &'a [u8], peer: Option<Endpoint>) -> Self {
        Self { data, peer }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_datagram(&self) -> Datagram {
        Datagram {
            payload: Bytes::copy_from_slice(self.data),
            peer: self.peer,
        }
    }
}

/// Owned form of [`Packet`], used wherever a packet is queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Bytes,
    pub peer: Option<Endpoint>,
}

impl Datagram {
    pub fn new(payload: impl Into<Bytes>, peer: Option<Endpoint>) -> Self {
        Self {
            payload: payload.into(),
            peer,
        }
    }

    pub fn as_packet(&self) -> Packet<'_> {
        Packet::to(&self.payload, self.peer)
    }
}

/// Delivers encoded data to the next stage down
pub type OutputCallback = Box<dyn FnMut(Packet<'_>) -> PipeResult<usize>>;

/// Delivers decoded data to the next stage up
pub type RecvCallback = Box<dyn FnMut(Packet<'_>) -> PipeResult<usize>>;

/// Reports a failure to whoever owns the pipe
pub type ErrorCallback = Box<dyn FnMut(&PipeError)>;

/// Full-duplex byte conduit.
///
/// `send` pushes application data down toward the wire and `input` feeds wire
/// data up for decoding. Callbacks are installed once while a stack is being
/// assembled and are torn down by `close`; a closed pipe never invokes them.
pub trait Pipe {
    fn init(&mut self) -> PipeResult<()>;

    /// Returns the number of bytes accepted
    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize>;

    /// Returns the number of bytes consumed
    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize>;

    /// Periodic maintenance. `now` is a millisecond clock and must not go backwards.
    fn flush(&mut self, now: u32);

    fn close(&mut self) -> PipeResult<()>;

    fn set_on_output(&mut self, cb: Option<OutputCallback>);

    fn set_on_recv(&mut self, cb: Option<RecvCallback>);

    fn set_on_error(&mut self, cb: Option<ErrorCallback>);

    /// Identity of the session this stack serves, if any
    fn session_key(&self) -> Option<SessionKey> {
        None
    }

    /// Signal the peer that the session is ending. No-op for non-session pipes.
    fn notify_peer_close(&mut self, _cmd: Command) -> PipeResult<usize> {
        Ok(0)
    }
}

impl<P: Pipe + ?Sized> Pipe for Box<P> {
    fn init(&mut self) -> PipeResult<()> {
        (**self).init()
    }

    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        (**self).send(packet)
    }

    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        (**self).input(packet)
    }

    fn flush(&mut self, now: u32) {
        (**self).flush(now)
    }

    fn close(&mut self) -> PipeResult<()> {
        (**self).close()
    }

    fn set_on_output(&mut self, cb: Option<OutputCallback>) {
        (**self).set_on_output(cb)
    }

    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        (**self).set_on_recv(cb)
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        (**self).set_on_error(cb)
    }

    fn session_key(&self) -> Option<SessionKey> {
        (**self).session_key()
    }

    fn notify_peer_close(&mut self, cmd: Command) -> PipeResult<usize> {
        (**self).notify_peer_close(cmd)
    }
}

struct Slot<T>(Rc<RefCell<Option<T>>>);

impl<T> Slot<T> {
    fn set(&self, value: Option<T>) {
        *self.0.borrow_mut() = value;
    }

    fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(None)))
    }
}

/// The three directional callbacks of one pipe.
///
/// Clones share the same slots, which is how a container hands its nested
/// stage a relay into its own callbacks without the nested stage referring
/// back to the container.
#[derive(Clone, Default)]
pub struct PipeCallbacks {
    output: Slot<OutputCallback>,
    recv: Slot<RecvCallback>,
    error: Slot<ErrorCallback>,
}

impl PipeCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_output(&self, cb: Option<OutputCallback>) {
        self.output.set(cb);
    }

    pub fn set_recv(&self, cb: Option<RecvCallback>) {
        self.recv.set(cb);
    }

    pub fn set_error(&self, cb: Option<ErrorCallback>) {
        self.error.set(cb);
    }

    pub fn has_output(&self) -> bool {
        self.output.is_set()
    }

    pub fn has_recv(&self) -> bool {
        self.recv.is_set()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_set()
    }

    /// Deliver encoded data to the next stage down
    pub fn output(&self, packet: Packet<'_>) -> PipeResult<usize> {
        let mut slot = self
            .output
            .0
            .try_borrow_mut()
            .map_err(|_| PipeError::Reentrant("output"))?;
        match slot.as_mut() {
            Some(cb) => cb(packet),
            None => Err(PipeError::Unwired("output")),
        }
    }

    /// Deliver decoded data to the next stage up
    pub fn recv(&self, packet: Packet<'_>) -> PipeResult<usize> {
        let mut slot = self
            .recv
            .0
            .try_borrow_mut()
            .map_err(|_| PipeError::Reentrant("recv"))?;
        match slot.as_mut() {
            Some(cb) => cb(packet),
            None => Err(PipeError::Unwired("recv")),
        }
    }

    pub fn error(&self, err: &PipeError) {
        match self.error.0.try_borrow_mut() {
            Ok(mut slot) => match slot.as_mut() {
                Some(cb) => cb(err),
                None => warn!("Unhandled pipe error: {}", err),
            },
            Err(_) => warn!("Dropped re-entrant pipe error: {}", err),
        }
    }

    /// Callback forwarding into this output, stamping `peer` on every packet when given
    pub fn output_relay(&self, peer: Option<Endpoint>) -> OutputCallback {
        let callbacks = self.clone();
        Box::new(move |packet: Packet<'_>| {
            let peer = peer.or(packet.peer);
            callbacks.output(Packet::to(packet.data, peer))
        })
    }

    /// Callback forwarding into this error slot
    pub fn error_relay(&self) -> ErrorCallback {
        let callbacks = self.clone();
        Box::new(move |err: &PipeError| callbacks.error(err))
    }

    pub fn clear(&self) {
        self.output.set(None);
        self.recv.set(None);
        self.error.set(None);
    }
}
