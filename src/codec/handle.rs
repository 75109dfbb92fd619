//! Client side of the engine mailbox.

use std::thread::{self, JoinHandle};

use flume::Sender;
use tracing::warn;

use crate::codec::{
    configure::MediaFormat,
    engine::Engine,
    message::{Command, ComponentTarget, InputData, Message},
    notify::Notification,
};
use crate::common::{
    errors::EngineError,
    types::BufferId,
};
use crate::configs::EngineConfig;
use crate::hardware::{BoxedUnit, UnitEvent};
use crate::surface::BoxedSurface;

/// Cheap, clonable way to talk to a running engine. Every call only queues a
/// message; results come back as notifications.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<Message>,
    warn_depth: usize,
}

impl EngineHandle {
    pub(crate) fn new(tx: Sender<Message>, warn_depth: usize) -> Self {
        Self { tx, warn_depth }
    }

    fn post(&self, msg: Message) -> Result<(), EngineError> {
        let depth = self.tx.len();
        if depth >= self.warn_depth {
            warn!("engine mailbox is {} deep, posting {}", depth, msg.name());
        }
        self.tx.send(msg).map_err(|_| EngineError::Stopped)
    }

    fn command(&self, command: Command) -> Result<(), EngineError> {
        self.post(Message::Command(command))
    }

    /// Allocate, configure and (with `auto_run`) start in one step. The
    /// format is validated before anything is queued.
    pub fn setup(
        &self,
        target: ComponentTarget,
        format: &MediaFormat,
        surface: Option<BoxedSurface>,
        auto_run: bool,
    ) -> Result<(), EngineError> {
        let setup = format.validate()?;
        self.command(Command::Setup {
            target,
            setup: Box::new(setup),
            surface,
            auto_run,
        })
    }

    pub fn allocate(&self, target: ComponentTarget) -> Result<(), EngineError> {
        self.command(Command::Allocate(target))
    }

    /// Validate `format` and queue it for the Loaded state.
    pub fn configure(
        &self,
        format: &MediaFormat,
        surface: Option<BoxedSurface>,
    ) -> Result<(), EngineError> {
        let setup = format.validate()?;
        self.command(Command::Configure {
            setup: Box::new(setup),
            surface,
        })
    }

    pub fn start(&self) -> Result<(), EngineError> {
        self.command(Command::Start)
    }

    pub fn flush(&self) -> Result<(), EngineError> {
        self.command(Command::Flush)
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.command(Command::Resume)
    }

    pub fn shutdown(&self, keep_session_alive: bool) -> Result<(), EngineError> {
        self.command(Command::Shutdown { keep_session_alive })
    }

    pub fn request_keyframe(&self) -> Result<(), EngineError> {
        self.command(Command::RequestKeyframe)
    }

    pub fn set_bitrate(&self, bitrate: u32) -> Result<(), EngineError> {
        self.command(Command::SetBitrate(bitrate))
    }

    pub fn set_keyframe_interval(&self, seconds: i32) -> Result<(), EngineError> {
        self.command(Command::SetKeyframeInterval(seconds))
    }

    /// Answer a fill-this-buffer notification.
    pub fn submit_input(&self, id: BufferId, input: InputData) -> Result<(), EngineError> {
        self.post(Message::InputBufferFilled { id, input })
    }

    /// Answer a drain-this-buffer notification.
    pub fn release_output(&self, id: BufferId, render: bool) -> Result<(), EngineError> {
        self.post(Message::OutputBufferDrained { id, render })
    }

    /// Forward an event from a unit that does not use the engine's sink.
    pub fn post_unit_event(&self, event: UnitEvent) -> Result<(), EngineError> {
        self.post(Message::Unit(event))
    }

    /// Messages waiting in the mailbox.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Run an engine for `unit` on its own thread.
pub fn spawn_engine(
    unit: BoxedUnit,
    config: EngineConfig,
    notify_tx: Sender<Notification>,
) -> std::io::Result<(EngineHandle, JoinHandle<()>)> {
    let (engine, handle) = Engine::new(unit, config, notify_tx);
    let join = thread::Builder::new()
        .name("codec-engine".to_string())
        .spawn(move || engine.run())?;
    Ok((handle, join))
}
