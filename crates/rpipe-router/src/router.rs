use crate::RouterError;
use rpipe_pipe::{
    is_close_signal, Command, Datagram, Endpoint, OutputCallback, Packet, Pipe, PipeError,
    SessionKey,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::rc::Rc;
use tracing::{debug, error, trace, warn};

/// Classifies an inbound datagram. `None` drops it silently.
pub type KeyExtractor = Box<dyn Fn(&[u8], Option<Endpoint>) -> Option<SessionKey>>;

/// Builds a session for a key with no table entry. `None` drops the datagram.
pub type FreshSessionHandler =
    Box<dyn FnMut(SessionKey, &[u8], Option<Endpoint>) -> Option<Box<dyn Pipe>>>;

/// Notified once when the router fails fatally
pub type RouterErrorCallback = Box<dyn FnMut(&RouterError)>;

type Shared<T> = Rc<RefCell<T>>;

/// Demultiplexes a shared raw pipe into per-session pipes.
///
/// Datagrams delivered by the raw pipe are queued and dispatched once the
/// raw pipe's `input` has returned. Sessions that report an error are reaped
/// after the step that produced it: they get an RST, are closed and leave the
/// table. Any failure of the raw pipe itself is fatal.
pub struct BridgeRouter<R> {
    raw: Shared<R>,
    sessions: BTreeMap<SessionKey, Box<dyn Pipe>>,
    inbound: Shared<VecDeque<Datagram>>,
    doomed: Shared<Vec<SessionKey>>,
    fatal: Shared<Option<PipeError>>,
    key_extractor: KeyExtractor,
    fresh_session: Option<FreshSessionHandler>,
    on_error: Option<RouterErrorCallback>,
    closed: bool,
}

impl<R: Pipe + 'static> BridgeRouter<R> {
    /// Take ownership of `raw`, wire its callbacks and initialise it
    pub fn new(mut raw: R) -> Result<Self, RouterError> {
        let inbound: Shared<VecDeque<Datagram>> = Rc::default();
        let fatal: Shared<Option<PipeError>> = Rc::default();

        let queue = Rc::clone(&inbound);
        raw.set_on_recv(Some(Box::new(move |packet: Packet<'_>| {
            queue.borrow_mut().push_back(packet.to_datagram());
            Ok(packet.len())
        })));

        let slot = Rc::clone(&fatal);
        raw.set_on_error(Some(Box::new(move |err: &PipeError| {
            record_fatal(&slot, surfaced(err));
        })));

        raw.init().map_err(RouterError::Fatal)?;

        Ok(Self {
            raw: Rc::new(RefCell::new(raw)),
            sessions: BTreeMap::new(),
            inbound,
            doomed: Rc::default(),
            fatal,
            key_extractor: Box::new(SessionKey::from_datagram),
            fresh_session: None,
            on_error: None,
            closed: false,
        })
    }

    pub fn set_key_extractor(&mut self, extractor: KeyExtractor) {
        self.key_extractor = extractor;
    }

    pub fn set_fresh_session_handler(&mut self, handler: Option<FreshSessionHandler>) {
        self.fresh_session = handler;
    }

    pub fn set_on_error(&mut self, cb: Option<RouterErrorCallback>) {
        self.on_error = cb;
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Live keys in flush order
    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.keys().copied().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Register a session under `key`, wire it to the raw pipe and initialise it.
    ///
    /// A live entry for `key` is never replaced.
    pub fn add_pipe(&mut self, key: SessionKey, mut pipe: Box<dyn Pipe>) -> Result<(), RouterError> {
        self.ensure_open()?;
        if self.sessions.contains_key(&key) {
            return Err(RouterError::SessionExists(key));
        }

        pipe.set_on_output(Some(self.raw_writer()));
        let doomed = Rc::clone(&self.doomed);
        pipe.set_on_error(Some(Box::new(move |err: &PipeError| {
            debug!("Session {} failed: {}", key, err);
            doomed.borrow_mut().push(key);
        })));

        if let Err(source) = pipe.init() {
            let _ = pipe.close();
            return Err(RouterError::SessionInit { key, source });
        }

        self.sessions.insert(key, pipe);
        debug!("Session {} added ({} active)", key, self.sessions.len());
        Ok(())
    }

    /// Close a session on the application's behalf, optionally signalling the peer first.
    ///
    /// Returns `false` if no session was registered under `key`.
    pub fn remove_pipe(
        &mut self,
        key: &SessionKey,
        signal: Option<Command>,
    ) -> Result<bool, RouterError> {
        self.ensure_open()?;
        let removed = self.teardown(key, signal);
        self.settle()?;
        Ok(removed)
    }

    /// Feed one raw datagram through the raw pipe and dispatch what it delivers
    pub fn input(&mut self, packet: Packet<'_>) -> Result<usize, RouterError> {
        self.ensure_open()?;

        let fed = match self.raw.try_borrow_mut() {
            Ok(mut raw) => raw.input(packet),
            Err(_) => Err(PipeError::Reentrant("raw pipe")),
        };
        if let Err(err) = fed {
            record_fatal(&self.fatal, err);
        }

        loop {
            let next = self.inbound.borrow_mut().pop_front();
            let Some(datagram) = next else {
                break;
            };
            self.dispatch(&datagram);
            self.settle()?;
        }

        self.settle()?;
        Ok(packet.len())
    }

    /// Flush every session in key order, then the raw pipe
    pub fn flush(&mut self, now: u32) -> Result<(), RouterError> {
        self.ensure_open()?;

        for key in self.keys() {
            // Reaped earlier in this tick.
            let Some(session) = self.sessions.get_mut(&key) else {
                continue;
            };
            session.flush(now);
            self.settle()?;
        }

        match self.raw.try_borrow_mut() {
            Ok(mut raw) => raw.flush(now),
            Err(_) => record_fatal(&self.fatal, PipeError::Reentrant("raw pipe")),
        }
        self.settle()
    }

    /// Close every session, then the raw pipe. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), RouterError> {
        if self.closed {
            return Ok(());
        }
        debug!("Closing router with {} sessions", self.sessions.len());
        self.shutdown().map_err(RouterError::Fatal)
    }

    fn ensure_open(&self) -> Result<(), RouterError> {
        if self.closed {
            Err(RouterError::Closed)
        } else {
            Ok(())
        }
    }

    fn dispatch(&mut self, datagram: &Datagram) {
        let bytes = datagram.payload.as_ref();
        let Some(key) = (self.key_extractor)(bytes, datagram.peer) else {
            trace!("Dropping unclassifiable datagram of {} bytes", bytes.len());
            return;
        };

        if let Some(session) = self.sessions.get_mut(&key) {
            if is_close_signal(bytes) {
                debug!("Session {} closed by peer", key);
                self.teardown(&key, None);
                return;
            }
            if let Err(err) = session.input(datagram.as_packet()) {
                trace!("Session {} rejected datagram: {}", key, err);
                self.doomed.borrow_mut().push(key);
            }
            return;
        }

        if is_close_signal(bytes) {
            trace!("Ignoring close signal for unknown session {}", key);
            return;
        }

        let Some(handler) = self.fresh_session.as_mut() else {
            trace!("No session for {}, dropping", key);
            return;
        };
        let Some(pipe) = handler(key, bytes, datagram.peer) else {
            trace!("Fresh session for {} declined", key);
            return;
        };

        if let Err(err) = self.add_pipe(key, pipe) {
            warn!("Could not start session {}: {}", key, err);
            return;
        }
        if let Some(session) = self.sessions.get_mut(&key) {
            if let Err(err) = session.input(datagram.as_packet()) {
                trace!("Session {} rejected first datagram: {}", key, err);
                self.doomed.borrow_mut().push(key);
            }
        }
    }

    /// Detach `key` from the table, then signal and close it
    fn teardown(&mut self, key: &SessionKey, signal: Option<Command>) -> bool {
        let Some(mut pipe) = self.sessions.remove(key) else {
            return false;
        };

        if let Some(cmd) = signal {
            if let Err(err) = pipe.notify_peer_close(cmd) {
                debug!("Session {}: {:?} not delivered: {}", key, cmd, err);
            }
        }
        if let Err(err) = pipe.close() {
            debug!("Session {} close failed: {}", key, err);
        }
        debug!("Session {} removed ({} active)", key, self.sessions.len());
        true
    }

    /// Reap failed sessions and escalate a raw pipe failure
    fn settle(&mut self) -> Result<(), RouterError> {
        if let Some(err) = self.take_fatal() {
            return Err(self.fail(err));
        }

        let doomed: Vec<SessionKey> = self.doomed.borrow_mut().drain(..).collect();
        for key in doomed {
            if self.sessions.contains_key(&key) {
                warn!("Removing failed session {}", key);
                self.teardown(&key, Some(Command::Rst));
            }
        }

        match self.take_fatal() {
            Some(err) => Err(self.fail(err)),
            None => Ok(()),
        }
    }

    fn take_fatal(&self) -> Option<PipeError> {
        self.fatal.borrow_mut().take()
    }

    fn fail(&mut self, err: PipeError) -> RouterError {
        error!(
            "Raw pipe failed, tearing down {} sessions: {}",
            self.sessions.len(),
            err
        );
        if let Err(close_err) = self.shutdown() {
            debug!("Raw pipe close after failure: {}", close_err);
        }

        let err = RouterError::Fatal(err);
        if let Some(cb) = self.on_error.as_mut() {
            cb(&err);
        }
        err
    }

    fn shutdown(&mut self) -> Result<(), PipeError> {
        self.closed = true;
        for key in self.keys() {
            self.teardown(&key, None);
        }
        self.inbound.borrow_mut().clear();
        self.doomed.borrow_mut().clear();

        let mut raw = self
            .raw
            .try_borrow_mut()
            .map_err(|_| PipeError::Reentrant("raw pipe"))?;
        raw.close()
    }

    /// Output callback for a session: writes go straight to the raw pipe
    fn raw_writer(&self) -> OutputCallback {
        let raw = Rc::clone(&self.raw);
        let fatal = Rc::clone(&self.fatal);
        Box::new(move |packet: Packet<'_>| {
            let written = match raw.try_borrow_mut() {
                Ok(mut raw) => raw.send(packet),
                Err(_) => Err(PipeError::Reentrant("raw pipe")),
            };
            written.map_err(|err| match err {
                // Addressing fault of the writing session, not of the shared pipe
                PipeError::NoPeer => {
                    debug!("Session write without a destination");
                    PipeError::NoPeer
                }
                err => {
                    let seen = surfaced(&err);
                    record_fatal(&fatal, err);
                    seen
                }
            })
        })
    }
}

/// Keep the first raw failure of a step
fn record_fatal(slot: &RefCell<Option<PipeError>>, err: PipeError) {
    let mut slot = slot.borrow_mut();
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// The error handed back to the session whose write hit a failed raw pipe
fn surfaced(err: &PipeError) -> PipeError {
    match err {
        PipeError::Io(io) => PipeError::Io(io::Error::new(io.kind(), io.to_string())),
        _ => PipeError::Closed,
    }
}
