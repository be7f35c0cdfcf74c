//! Leaf pipes that sit at the top of a session stack

use crate::engine::EngineError;
use crate::error::{PipeError, PipeResult};
use crate::pipe::{ErrorCallback, OutputCallback, Packet, Pipe, PipeCallbacks, RecvCallback};
use std::cell::Cell;
use std::rc::Rc;
use tracing::trace;

/// Application-facing leaf: `input` is handed to `on_recv`, `send` to `on_output`
#[derive(Default)]
pub struct CallbackPipe {
    callbacks: PipeCallbacks,
    closed: Rc<Cell<bool>>,
}

impl CallbackPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for sending through this leaf once a stack owns it
    pub fn sender(&self) -> LeafSender {
        LeafSender {
            callbacks: self.callbacks.clone(),
            closed: Rc::clone(&self.closed),
        }
    }
}

/// Sending half of a [`CallbackPipe`]
#[derive(Clone)]
pub struct LeafSender {
    callbacks: PipeCallbacks,
    closed: Rc<Cell<bool>>,
}

impl LeafSender {
    /// Push application bytes down the stack the leaf belongs to
    pub fn send(&self, data: &[u8]) -> PipeResult<usize> {
        if self.closed.get() {
            return Err(PipeError::Closed);
        }
        if data.is_empty() {
            return Ok(0);
        }
        self.callbacks.output(Packet::new(data))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Pipe for CallbackPipe {
    fn init(&mut self) -> PipeResult<()> {
        Ok(())
    }

    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed.get() {
            return Err(PipeError::Closed);
        }
        if packet.is_empty() {
            return Ok(0);
        }
        self.callbacks.output(packet)
    }

    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed.get() {
            return Err(PipeError::Closed);
        }
        self.callbacks.recv(packet)
    }

    fn flush(&mut self, _now: u32) {}

    fn close(&mut self) -> PipeResult<()> {
        self.closed.set(true);
        self.callbacks.clear();
        Ok(())
    }

    fn set_on_output(&mut self, cb: Option<OutputCallback>) {
        self.callbacks.set_output(cb);
    }

    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        self.callbacks.set_recv(cb);
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        self.callbacks.set_error(cb);
    }
}

/// Sends every decoded byte straight back down the stack
#[derive(Default)]
pub struct EchoPipe {
    callbacks: PipeCallbacks,
    echoed: u64,
    closed: bool,
}

impl EchoPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes echoed so far
    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

impl Pipe for EchoPipe {
    fn init(&mut self) -> PipeResult<()> {
        Ok(())
    }

    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        self.callbacks.output(packet)
    }

    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.closed {
            return Err(PipeError::Closed);
        }
        trace!("Echoing {} bytes", packet.len());
        let n = self.callbacks.output(Packet::new(packet.data))?;
        self.echoed += n as u64;
        if n < packet.len() {
            // A short write would silently cut the stream
            return Err(PipeError::Transport(EngineError::WindowFull));
        }
        Ok(n)
    }

    fn flush(&mut self, _now: u32) {}

    fn close(&mut self) -> PipeResult<()> {
        self.closed = true;
        self.callbacks.clear();
        Ok(())
    }

    fn set_on_output(&mut self, cb: Option<OutputCallback>) {
        self.callbacks.set_output(cb);
    }

    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        self.callbacks.set_recv(cb);
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        self.callbacks.set_error(cb);
    }
}
