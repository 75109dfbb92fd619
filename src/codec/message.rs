//! Everything that travels through the engine mailbox.

use bytes::Bytes;
use flume::WeakSender;

use crate::codec::{configure::CodecSetup, notify::StreamResult};
use crate::common::types::BufferId;
use crate::hardware::UnitEvent;
use crate::surface::BoxedSurface;

/// Which component to bind a session to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentTarget {
    /// A specific component by name.
    Named(String),
    /// Every component the unit reports for this mime type, tried in order.
    ByMime { mime: String, encoder: bool },
}

/// Client commands.
pub enum Command {
    /// Allocate, configure and (when `auto_run`) start in one step.
    Setup {
        target: ComponentTarget,
        setup: Box<CodecSetup>,
        surface: Option<BoxedSurface>,
        auto_run: bool,
    },
    Allocate(ComponentTarget),
    Configure {
        setup: Box<CodecSetup>,
        surface: Option<BoxedSurface>,
    },
    Start,
    Flush,
    Resume,
    Shutdown {
        keep_session_alive: bool,
    },
    RequestKeyframe,
    SetBitrate(u32),
    SetKeyframeInterval(i32),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "setup",
            Self::Allocate(_) => "allocate",
            Self::Configure { .. } => "configure",
            Self::Start => "start",
            Self::Flush => "flush",
            Self::Resume => "resume",
            Self::Shutdown { .. } => "shutdown",
            Self::RequestKeyframe => "request-keyframe",
            Self::SetBitrate(_) => "set-bitrate",
            Self::SetKeyframeInterval(_) => "set-keyframe-interval",
        }
    }
}

/// One access unit handed back in reply to a fill-this-buffer notification.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessUnit {
    pub data: Bytes,
    pub timestamp_us: i64,
    pub end_of_stream: bool,
    pub codec_config: bool,
}

impl AccessUnit {
    pub fn new(data: impl Into<Bytes>, timestamp_us: i64) -> Self {
        Self {
            data: data.into(),
            timestamp_us,
            end_of_stream: false,
            codec_config: false,
        }
    }

    pub fn with_eos(mut self) -> Self {
        self.end_of_stream = true;
        self
    }

    pub fn with_codec_config(mut self) -> Self {
        self.codec_config = true;
        self
    }
}

/// Producer reply to fill-this-buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputData {
    AccessUnit(AccessUnit),
    /// The producer has nothing more to give: it reached the end of its
    /// stream or failed.
    Exhausted(StreamResult),
}

pub enum Message {
    Command(Command),
    Unit(UnitEvent),
    InputBufferFilled { id: BufferId, input: InputData },
    OutputBufferDrained { id: BufferId, render: bool },
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command(cmd) => cmd.name(),
            Self::Unit(event) => event.name(),
            Self::InputBufferFilled { .. } => "input-buffer-filled",
            Self::OutputBufferDrained { .. } => "output-buffer-drained",
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Command(Command::Shutdown { .. }))
    }
}

/// Where a hardware unit posts its events.
///
/// Holds only a weak reference to the mailbox: once every client handle is
/// gone, posting fails and the engine winds down.
#[derive(Clone)]
pub struct EventSink {
    tx: WeakSender<Message>,
}

impl EventSink {
    pub(crate) fn new(tx: WeakSender<Message>) -> Self {
        Self { tx }
    }

    /// Queue `event` for the engine. Returns `false` if the engine is gone.
    pub fn post(&self, event: UnitEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(Message::Unit(event)).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}
