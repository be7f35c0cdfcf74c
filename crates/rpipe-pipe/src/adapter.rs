//! Binds a session byte stream to a reliable-transport engine

use crate::container::ContainerPipe;
use crate::engine::{Engine, EngineConfig, EngineError};
use crate::error::{PipeError, PipeResult};
use crate::pipe::{ErrorCallback, OutputCallback, Packet, Pipe, RecvCallback};
use crate::PIPE_BUFSIZ;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Builds the engine instance during `init`
pub type EngineFactory<E> = Box<dyn FnOnce(u32) -> Result<E, EngineError>>;

/// Engine-backed stage.
///
/// Upward, datagrams are fed to the engine and every decodable chunk is
/// delivered to the upper pipe. Downward, the upper pipe's output is queued in
/// the engine, and the engine's segments leave through this stage's output
/// when it is flushed.
pub struct TransportAdapterPipe<E, U> {
    conv: u32,
    container: ContainerPipe<U>,
    factory: Option<EngineFactory<E>>,
    engine: Option<Rc<RefCell<E>>>,
    scratch: Box<[u8]>,
}

impl<E: Engine + 'static, U: Pipe> TransportAdapterPipe<E, U> {
    pub fn new(conv: u32, config: EngineConfig, upper: U) -> Self {
        Self::with_factory(conv, upper, Box::new(move |conv| E::create(conv, &config)))
    }

    pub fn with_factory(conv: u32, upper: U, factory: EngineFactory<E>) -> Self {
        Self {
            conv,
            container: ContainerPipe::labeled(upper, "transport"),
            factory: Some(factory),
            engine: None,
            scratch: vec![0u8; PIPE_BUFSIZ].into_boxed_slice(),
        }
    }

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn upper_mut(&mut self) -> PipeResult<&mut U> {
        self.container.upper_mut()
    }

    /// Shared handle to the running engine, if initialised and not closed
    pub fn engine(&self) -> Option<Rc<RefCell<E>>> {
        self.engine.clone()
    }

    fn running_engine(&self) -> PipeResult<Rc<RefCell<E>>> {
        self.engine.clone().ok_or(if self.container.is_closed() {
            PipeError::Closed
        } else {
            PipeError::NotInitialized
        })
    }

    /// Pull everything the engine can decode and hand it upward
    fn drain(&mut self, engine: &RefCell<E>) -> PipeResult<usize> {
        let mut total = 0;
        loop {
            let n = engine
                .try_borrow_mut()
                .map_err(|_| PipeError::Reentrant("engine"))?
                .recv(&mut self.scratch)?;
            if n == 0 {
                break;
            }
            total += n;

            let upper = self.container.upper_mut()?;
            upper.input(Packet::new(&self.scratch[..n]))?;
        }
        Ok(total)
    }
}

fn send_to_engine<E: Engine>(engine: &RefCell<E>, data: &[u8]) -> PipeResult<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let mut engine = engine
        .try_borrow_mut()
        .map_err(|_| PipeError::Reentrant("engine"))?;
    Ok(engine.send(data)?)
}

impl<E: Engine + 'static, U: Pipe> Pipe for TransportAdapterPipe<E, U> {
    fn init(&mut self) -> PipeResult<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        let factory = self.factory.take().ok_or(PipeError::Closed)?;

        self.container.init_upper()?;

        let engine = Rc::new(RefCell::new(factory(self.conv)?));
        let sink = Rc::clone(&engine);
        self.container
            .upper_mut()?
            .set_on_output(Some(Box::new(move |packet: Packet<'_>| {
                send_to_engine(&sink, packet.data)
            })));
        self.engine = Some(engine);

        debug!("Transport engine started for conv {}", self.conv);
        Ok(())
    }

    fn send(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        let engine = self.running_engine()?;
        send_to_engine(&engine, packet.data)
    }

    fn input(&mut self, packet: Packet<'_>) -> PipeResult<usize> {
        if packet.is_empty() {
            return Ok(0);
        }
        let engine = self.running_engine()?;

        let fed = engine
            .try_borrow_mut()
            .map_err(|_| PipeError::Reentrant("engine"))?
            .input(packet.data);
        if let Err(err) = fed {
            let err = PipeError::from(err);
            self.container.callbacks().error(&err);
            return Err(err);
        }

        match self.drain(&engine) {
            Ok(n) => {
                trace!("conv {}: {} bytes in, {} bytes up", self.conv, packet.len(), n);
                Ok(packet.len())
            }
            Err(err) => {
                self.container.callbacks().error(&err);
                Err(err)
            }
        }
    }

    fn flush(&mut self, now: u32) {
        let Some(engine) = self.engine.clone() else {
            return;
        };

        let callbacks = self.container.callbacks().clone();
        let conv = self.conv;
        let result = match engine.try_borrow_mut() {
            Ok(mut engine) => engine.update(now, &mut |segment: &[u8]| {
                callbacks.output(Packet::new(segment)).inspect_err(|err| {
                    warn!("conv {}: output failed: {}", conv, err);
                    callbacks.error(err);
                })
            }),
            Err(_) => {
                callbacks.error(&PipeError::Reentrant("engine"));
                Ok(())
            }
        };

        match result {
            // Already surfaced by the output path above.
            Ok(()) | Err(EngineError::Output) => {}
            Err(err) => callbacks.error(&PipeError::from(err)),
        }

        self.container.flush_upper(now);
    }

    /// Drops the engine and whatever it still buffers, then closes the upper pipe
    fn close(&mut self) -> PipeResult<()> {
        if self.engine.take().is_some() {
            debug!("Transport engine stopped for conv {}", self.conv);
        }
        self.factory = None;
        self.container.close_upper()
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
}
