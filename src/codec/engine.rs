//! `Engine`: the codec actor.
//!
//! One thread owns the engine and takes messages off a single FIFO mailbox:
//! client commands, unit events and the replies to fill/drain notifications
//! all arrive through it, so nothing inside the engine needs a lock.

use flume::{Receiver, Sender};
use tracing::{Level, debug, error, field, info, span, trace, warn};
use uuid::Uuid;

use crate::codec::{
    configure::CodecSetup,
    context::Context,
    deferred::DeferredQueue,
    handle::EngineHandle,
    message::{Command, ComponentTarget, Message},
    notify::{Notification, Notifier},
    state::State,
    states::{self, Outcome},
};
use crate::common::{errors::EngineError, types::PortIndex};
use crate::configs::EngineConfig;
use crate::hardware::BoxedUnit;
use crate::surface::BoxedSurface;

pub struct Engine {
    ctx: Context,
    state: State,
    deferred: DeferredQueue,
    rx: Receiver<Message>,
    stopped: bool,
}

impl Engine {
    /// Build an engine around `unit` and the handle that feeds it.
    pub fn new(
        unit: BoxedUnit,
        config: EngineConfig,
        notify_tx: Sender<Notification>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = flume::unbounded();
        let warn_depth = config.mailbox_warn_depth;
        let ctx = Context::new(unit, config, Notifier::new(notify_tx), tx.downgrade());
        let engine = Self {
            ctx,
            state: State::Uninitialized,
            deferred: DeferredQueue::new(),
            rx,
            stopped: false,
        };
        (engine, EngineHandle::new(tx, warn_depth))
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether a fatal error has stopped the engine.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    /// Run until every handle is dropped or a fatal error occurs.
    pub fn run(mut self) {
        let span = span!(Level::DEBUG, "codec_engine", session = field::Empty);
        let _enter = span.enter();
        let mut recorded: Option<Uuid> = None;

        info!("codec engine started");
        while let Ok(msg) = self.rx.recv() {
            self.handle(msg);

            if self.ctx.session_id != recorded {
                if let Some(id) = self.ctx.session_id {
                    span.record("session", field::display(id));
                }
                recorded = self.ctx.session_id;
            }
            if self.stopped {
                break;
            }
        }
        info!("codec engine exited in {}", self.state.name());
    }

    /// Handle everything currently queued without blocking. Returns the
    /// number of messages taken off the mailbox.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while !self.stopped {
            let Ok(msg) = self.rx.try_recv() else {
                break;
            };
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    fn handle(&mut self, msg: Message) {
        trace!("[{}] {} in {}", self.ctx.name(), msg.name(), self.state.name());
        if let Err(e) = self.dispatch(msg) {
            self.ctx.signal_error(&e);
            if e.is_fatal() {
                error!(
                    "[{}] stopping engine in {} after fatal error",
                    self.ctx.name(),
                    self.state.name()
                );
                self.stopped = true;
            }
        }
    }

    fn dispatch(&mut self, msg: Message) -> Result<(), EngineError> {
        if matches!(msg, Message::Command(Command::Flush))
            && (self.ctx.shutdown_in_progress || self.deferred.has_shutdown())
        {
            return Err(EngineError::Usage(
                "flush requested while a shutdown is pending".to_string(),
            ));
        }

        let msg = match msg {
            Message::Command(Command::Setup {
                target,
                setup,
                surface,
                auto_run,
            }) if self.state == State::Uninitialized => {
                return self.setup(target, setup, surface, auto_run);
            }
            other => other,
        };

        match states::on_message(&mut self.state, &mut self.ctx, msg)? {
            Outcome::Handled => Ok(()),
            Outcome::Unhandled(msg) => {
                warn!(
                    "[{}] {} ignored in {}",
                    self.ctx.name(),
                    msg.name(),
                    self.state.name()
                );
                Ok(())
            }
            Outcome::Defer(msg) => {
                debug!(
                    "[{}] deferring {} in {}",
                    self.ctx.name(),
                    msg.name(),
                    self.state.name()
                );
                self.deferred.push(msg);
                Ok(())
            }
            Outcome::Goto(next) => self.change_state(next),
        }
    }

    /// Allocate, configure and optionally start, each step only if the
    /// previous one left the engine where the next one expects it.
    fn setup(
        &mut self,
        target: ComponentTarget,
        setup: Box<CodecSetup>,
        surface: Option<BoxedSurface>,
        auto_run: bool,
    ) -> Result<(), EngineError> {
        self.dispatch(Message::Command(Command::Allocate(target)))?;
        if self.state != State::Loaded {
            return Ok(());
        }
        self.dispatch(Message::Command(Command::Configure { setup, surface }))?;
        if auto_run && self.ctx.configured {
            self.dispatch(Message::Command(Command::Start))?;
        }
        Ok(())
    }

    fn change_state(&mut self, next: State) -> Result<(), EngineError> {
        let mut next = Some(next);
        while let Some(state) = next {
            self.state = state;
            debug!("[{}] Now {}", self.ctx.name(), state.name());
            next = states::entered(state, &mut self.ctx)?;
        }

        if self.state.has_buffers() {
            for port in PortIndex::ALL {
                trace!(
                    "[{}] {} port holds {} buffers",
                    self.ctx.name(),
                    port,
                    self.ctx.port(port).len()
                );
            }
        }

        if self.state.replays_deferred() && !self.deferred.is_empty() {
            let batch = self.deferred.take();
            debug!(
                "[{}] replaying {} deferred messages",
                self.ctx.name(),
                batch.len()
            );
            for msg in batch {
                if self.stopped {
                    break;
                }
                self.handle(msg);
            }
        }
        Ok(())
    }
}
