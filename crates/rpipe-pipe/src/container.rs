//! Decorator holding exactly one nested "upper" pipe

use crate::error::{PipeError, PipeResult};
use crate::pipe::{ErrorCallback, OutputCallback, Packet, Pipe, PipeCallbacks, RecvCallback};
use tracing::{debug, warn};

/// Owns the pipe above it and forwards lifecycle and flush to it.
///
/// Used directly it is a transparent stage: `input` goes up, `send` and the
/// upper pipe's output go down. [`SessionPipe`](crate::SessionPipe) and
/// [`TransportAdapterPipe`](crate::TransportAdapterPipe) embed one and replace
/// the data paths.
pub struct ContainerPipe<U> {
    upper: Option<U>,
    callbacks: PipeCallbacks,
    label: &'static str,
}

impl<U: Pipe> ContainerPipe<U> {
    pub fn new(upper: U) -> Self {
        Self::labeled(upper, "container")
    }

    /// `label` names this stage in error logs
    pub fn labeled(upper: U, label: &'static str) -> Self {
        Self {
            upper: Some(upper),
            callbacks: PipeCallbacks::new(),
            label,
        }
    }

    pub fn callbacks(&self) -> &PipeCallbacks {
        &self.callbacks
    }

    pub fn upper(&self) -> Option<&U> {
        self.upper.as_ref()
    }

    pub fn upper_mut(&mut self) -> PipeResult<&mut U> {
        self.upper.as_mut().ok_or(PipeError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.upper.is_none()
    }

    /// Initialise the upper pipe and relay its errors into this stage's `on_error`
    pub fn init_upper(&mut self) -> PipeResult<()> {
        let label = self.label;
        let callbacks = self.callbacks.clone();
        let upper = self.upper_mut()?;

        upper.init()?;
        upper.set_on_error(Some(Box::new(move |err: &PipeError| {
            warn!("{} upper pipe error: {}", label, err);
            callbacks.error(err);
        })));

        Ok(())
    }

    pub fn flush_upper(&mut self, now: u32) {
        if let Some(upper) = self.upper.as_mut() {
            upper.flush(now);
        }
    }

    /// Close and drop the upper pipe, then tear down this stage's callbacks.
    ///
    /// Safe to call more than once.
    pub fn close_upper(&mut self) -> PipeResult<()> {
        let result = match self.upper.take() {
            Some(mut upper) => {
                debug!("Closing {} upper pipe", self.label);
                let result = upper.close();
                upper.set_on_output(None);
                upper.set_on_recv(None);
                upper.set_on_error(None);
                result
            }
            None => Ok(()),
        };

        self.callbacks.clear();
        result
    }
}

impl<U: Pipe> Pipe for ContainerPipe<U> {
    fn init(&mut self) -> PipeResult<()> {
        self.init_upper()?;
        let relay = self.callbacks.output_relay(None);
        self.upper_mut()?.set_on_output(Some(relay));
        Ok(())
    }

    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if self.is_closed() {
            return Err(PipeError::Closed);
        }
        self.callbacks.output(packet)
    }

    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        self.upper_mut()?.input(packet)
    }

    fn flush(&mut self, now: u32) {
        self.flush_upper(now);
    }

    fn close(&mut self) -> PipeResult<()> {
        self.close_upper()
    }

    fn set_on_output(&mut self, cb: Option<OutputCallback>) {
        self.callbacks.set_output(cb);
    }

    /// Decoded data leaves the stack at its top, so the callback is handed to the upper pipe
    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        if let Some(upper) = self.upper.as_mut() {
            upper.set_on_recv(cb);
        }
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        self.callbacks.set_error(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::CallbackPipe;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_input_reaches_top_and_output_reaches_bottom() {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sent = Rc::new(RefCell::new(Vec::new()));

        let mut pipe = ContainerPipe::new(CallbackPipe::new());
        let sink = Rc::clone(&received);
        pipe.set_on_recv(Some(Box::new(move |p: Packet<'_>| {
            sink.borrow_mut().extend_from_slice(p.data);
            Ok(p.len())
        })));
        let sink = Rc::clone(&sent);
        pipe.set_on_output(Some(Box::new(move |p: Packet<'_>| {
            sink.borrow_mut().extend_from_slice(p.data);
            Ok(p.len())
        })));
        pipe.init().unwrap();

        pipe.input(Packet::new(b"up")).unwrap();
        pipe.upper_mut().unwrap().send(Packet::new(b"down")).unwrap();

        assert_eq!(received.borrow().as_slice(), b"up");
        assert_eq!(sent.borrow().as_slice(), b"down");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut pipe = ContainerPipe::new(CallbackPipe::new());
        pipe.init().unwrap();

        pipe.close().unwrap();
        pipe.close().unwrap();

        assert!(pipe.is_closed());
        assert!(matches!(pipe.input(Packet::new(b"x")), Err(PipeError::Closed)));
        assert!(!pipe.callbacks().has_output());
    }

    /// Upper stage that reports an error on every flush
    #[derive(Default)]
    struct Complaining {
        callbacks: PipeCallbacks,
    }

    impl Pipe for Complaining {
        fn init(&mut self) -> PipeResult<()> {
            Ok(())
        }

        fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
            Ok(packet.len())
        }

        fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
            Ok(packet.len())
        }

        fn flush(&mut self, _now: u32) {
            self.callbacks.error(&PipeError::NotInitialized);
        }

        fn close(&mut self) -> PipeResult<()> {
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

    #[test]
    fn test_upper_errors_are_relayed() {
        let errors = Rc::new(RefCell::new(0));
        let mut pipe = ContainerPipe::new(Complaining::default());
        let count = Rc::clone(&errors);
        pipe.set_on_error(Some(Box::new(move |_: &PipeError| *count.borrow_mut() += 1)));
        pipe.init().unwrap();

        pipe.flush(1);
        pipe.flush(2);

        assert_eq!(*errors.borrow(), 2);
    }

    #[test]
    fn test_failed_leaf_delivery_is_returned_not_reported() {
        let errors = Rc::new(RefCell::new(0));
        let mut pipe = ContainerPipe::new(CallbackPipe::new());
        let count = Rc::clone(&errors);
        pipe.set_on_error(Some(Box::new(move |_: &PipeError| *count.borrow_mut() += 1)));
        pipe.init().unwrap();

        // No recv callback on the leaf.
        let result = pipe.input(Packet::new(b"nobody listening"));

        assert!(matches!(result, Err(PipeError::Unwired("recv"))));
        assert_eq!(*errors.borrow(), 0);
    }
}
