//! `hardware`: the asynchronous processing unit the engine drives.
//!
//! A [`HardwareUnit`] accepts commands and buffer operations synchronously
//! (each call only reports whether the request was accepted) and reports
//! completion later through the [`EventSink`] handed to it when the session
//! is allocated. Events are funnelled into the engine's mailbox, never
//! delivered by calling back into the engine.
//!
//! | Implementation | Description |
//! |---|---|
//! | [`LoopbackUnit`] | Software unit that copies input to output; used by the runner and tests |

pub mod loopback;
pub mod params;

pub use loopback::{ComponentInfo, LoopbackConfig, LoopbackUnit, UnitCall};
pub use params::*;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::EventSink;
use crate::common::{
    errors::{UnitError, UnitErrorCode},
    types::{BufferFlags, BufferId, GraphicHandle, PortIndex},
};

/// Lifecycle states of the unit itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Loaded,
    Idle,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTarget {
    Port(PortIndex),
    All,
}

/// Asynchronous commands; each one is acknowledged by a
/// [`UnitEvent::CommandComplete`] carrying the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCommand {
    SetState(UnitState),
    Flush(FlushTarget),
    DisablePort(PortIndex),
    EnablePort(PortIndex),
}

/// Events emitted by the unit on its own timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitEvent {
    CommandComplete(UnitCommand),
    PortSettingsChanged {
        port: PortIndex,
        index: SettingsIndex,
    },
    BufferFlag {
        port: PortIndex,
        flags: BufferFlags,
    },
    Error {
        code: UnitErrorCode,
    },
    /// An input buffer has been consumed.
    EmptyBufferDone {
        id: BufferId,
    },
    /// An output buffer has been filled. `length` is the filled size; `data`
    /// carries the bytes for heap buffers and is empty for graphics buffers.
    FillBufferDone {
        id: BufferId,
        length: usize,
        data: Bytes,
        flags: BufferFlags,
        timestamp_us: i64,
    },
}

impl UnitEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommandComplete(_) => "command-complete",
            Self::PortSettingsChanged { .. } => "port-settings-changed",
            Self::BufferFlag { .. } => "buffer-flag",
            Self::Error { .. } => "error",
            Self::EmptyBufferDone { .. } => "empty-buffer-done",
            Self::FillBufferDone { .. } => "fill-buffer-done",
        }
    }
}

/// A hardware codec session. All calls are made from the engine thread.
pub trait HardwareUnit: Send {
    /// Names of components able to handle `mime`, in order of preference.
    fn find_components(&self, mime: &str, encoder: bool) -> Vec<String>;

    fn allocate_session(&mut self, component: &str, sink: EventSink) -> Result<(), UnitError>;

    fn release_session(&mut self) -> Result<(), UnitError>;

    fn get_parameter(&mut self, index: ParamIndex) -> Result<Parameter, UnitError>;

    fn set_parameter(&mut self, param: Parameter) -> Result<(), UnitError>;

    fn send_command(&mut self, command: UnitCommand) -> Result<(), UnitError>;

    /// Allocate a heap buffer of `size` bytes on `port`.
    fn allocate_buffer(&mut self, port: PortIndex, size: usize) -> Result<BufferId, UnitError>;

    /// Register a surface-owned graphics buffer with `port`.
    fn use_graphic_buffer(
        &mut self,
        port: PortIndex,
        handle: GraphicHandle,
    ) -> Result<BufferId, UnitError>;

    fn free_buffer(&mut self, port: PortIndex, id: BufferId) -> Result<(), UnitError>;

    /// Hand an input buffer holding `data` to the unit.
    fn empty_buffer(
        &mut self,
        id: BufferId,
        data: &[u8],
        flags: BufferFlags,
        timestamp_us: i64,
    ) -> Result<(), UnitError>;

    /// Hand an empty output buffer to the unit.
    fn fill_buffer(&mut self, id: BufferId) -> Result<(), UnitError>;
}

/// Type-erased unit, owned by the engine.
pub type BoxedUnit = Box<dyn HardwareUnit>;

/// Read an optional parameter: indices the unit does not support map to
/// `None`, any other failure is returned.
pub fn query_optional(
    unit: &mut dyn HardwareUnit,
    index: ParamIndex,
) -> Result<Option<Parameter>, UnitError> {
    match unit.get_parameter(index) {
        Ok(param) => Ok(Some(param)),
        Err(e) if e.code == UnitErrorCode::UnsupportedIndex => Ok(None),
        Err(e) => Err(e),
    }
}
