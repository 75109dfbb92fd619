//! `LoopbackUnit`: a software hardware unit that copies every input access
//! unit into the next free output buffer.
//!
//! In auto mode it acknowledges commands and buffers on its own, posting the
//! events through the session's [`EventSink`] the way a real unit's callback
//! thread would. In manual mode it only records calls and keeps buffer
//! bookkeeping; the caller injects events with [`LoopbackUnit::inject`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::EventSink;
use crate::common::{
    errors::{UnitError, UnitErrorCode},
    types::{BufferFlags, BufferId, GraphicHandle, PortIndex, Rect},
};
use crate::hardware::{
    FlushTarget, HardwareUnit, UnitCommand, UnitEvent, UnitState,
    params::{
        AudioCoding, AudioPortFormat, COLOR_FORMAT_YUV420_SEMIPLANAR, ParamIndex, Parameter,
        PortDefinition, PortFormat, SettingsIndex, VideoCoding, VideoPortFormat,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub name: String,
    pub mime: String,
    #[serde(default)]
    pub encoder: bool,
}

impl ComponentInfo {
    fn new(name: &str, mime: &str, encoder: bool) -> Self {
        Self {
            name: name.to_string(),
            mime: mime.to_string(),
            encoder,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopbackConfig {
    #[serde(default = "default_components")]
    pub components: Vec<ComponentInfo>,
    /// Components that are listed but refuse to allocate.
    #[serde(default)]
    pub unavailable: Vec<String>,
    #[serde(default = "default_buffer_count")]
    pub input_buffers: u32,
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: usize,
    #[serde(default = "default_buffer_count")]
    pub output_buffers: u32,
    #[serde(default = "default_output_buffer_size")]
    pub output_buffer_size: usize,
    #[serde(default = "default_min_buffers")]
    pub min_buffers: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_true")]
    pub partial_frames: bool,
    #[serde(default = "default_true")]
    pub auto_complete: bool,
    /// Raise an output port-settings change after this many filled buffers.
    #[serde(default)]
    pub format_change_after: Option<usize>,
    #[serde(default)]
    pub crop: Option<Rect>,
    /// Buffer allocations beyond this count fail with insufficient resources.
    #[serde(default)]
    pub fail_allocation_after: Option<usize>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            components: default_components(),
            unavailable: Vec::new(),
            input_buffers: default_buffer_count(),
            input_buffer_size: default_input_buffer_size(),
            output_buffers: default_buffer_count(),
            output_buffer_size: default_output_buffer_size(),
            min_buffers: default_min_buffers(),
            width: default_width(),
            height: default_height(),
            partial_frames: true,
            auto_complete: true,
            format_change_after: None,
            crop: None,
            fail_allocation_after: None,
        }
    }
}

fn default_components() -> Vec<ComponentInfo> {
    vec![
        ComponentInfo::new("loopback.avc.decoder", "video/avc", false),
        ComponentInfo::new("loopback.avc.decoder.secure", "video/avc", false),
        ComponentInfo::new("loopback.avc.encoder", "video/avc", true),
        ComponentInfo::new("loopback.hevc.decoder", "video/hevc", false),
        ComponentInfo::new("loopback.aac.decoder", "audio/mp4a-latm", false),
        ComponentInfo::new("loopback.aac.encoder", "audio/mp4a-latm", true),
        ComponentInfo::new("loopback.raw.decoder", "audio/raw", false),
    ]
}

fn default_buffer_count() -> u32 {
    4
}

fn default_min_buffers() -> u32 {
    2
}

fn default_input_buffer_size() -> usize {
    8 * 1024
}

fn default_output_buffer_size() -> usize {
    64 * 1024
}

fn default_width() -> u32 {
    320
}

fn default_height() -> u32 {
    240
}

fn default_true() -> bool {
    true
}

/// One recorded call into the unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitCall {
    AllocateSession(String),
    ReleaseSession,
    GetParameter(ParamIndex),
    SetParameter(&'static str),
    SendCommand(UnitCommand),
    AllocateBuffer {
        port: PortIndex,
        size: usize,
    },
    UseGraphicBuffer {
        port: PortIndex,
        handle: GraphicHandle,
    },
    FreeBuffer {
        port: PortIndex,
        id: BufferId,
    },
    EmptyBuffer {
        id: BufferId,
        len: usize,
        flags: BufferFlags,
        timestamp_us: i64,
    },
    FillBuffer(BufferId),
}

struct PendingOutput {
    data: Bytes,
    flags: BufferFlags,
    timestamp_us: i64,
}

struct Inner {
    config: LoopbackConfig,
    sink: Option<EventSink>,
    component: Option<String>,
    role: Option<String>,
    state: UnitState,
    defs: [PortDefinition; 2],
    buffers: [Vec<BufferId>; 2],
    graphic: HashSet<BufferId>,
    held_output: VecDeque<BufferId>,
    pending: VecDeque<PendingOutput>,
    disabling: [bool; 2],
    enabling: [bool; 2],
    next_id: u32,
    allocations: usize,
    produced: usize,
    format_changed: bool,
    calls: Vec<UnitCall>,
}

impl Inner {
    fn new(config: LoopbackConfig) -> Self {
        let defs = [
            PortDefinition {
                port: PortIndex::Input,
                buffer_count: config.input_buffers,
                min_buffer_count: config.min_buffers.min(config.input_buffers),
                buffer_size: config.input_buffer_size,
                enabled: true,
                format: PortFormat::Video(VideoPortFormat {
                    coding: VideoCoding::Avc,
                    ..VideoPortFormat::raw(config.width, config.height, 0)
                }),
            },
            PortDefinition {
                port: PortIndex::Output,
                buffer_count: config.output_buffers,
                min_buffer_count: config.min_buffers.min(config.output_buffers),
                buffer_size: config.output_buffer_size,
                enabled: true,
                format: PortFormat::Video(VideoPortFormat::raw(
                    config.width,
                    config.height,
                    COLOR_FORMAT_YUV420_SEMIPLANAR,
                )),
            },
        ];

        Self {
            config,
            sink: None,
            component: None,
            role: None,
            state: UnitState::Loaded,
            defs,
            buffers: [Vec::new(), Vec::new()],
            graphic: HashSet::new(),
            held_output: VecDeque::new(),
            pending: VecDeque::new(),
            disabling: [false; 2],
            enabling: [false; 2],
            next_id: 1,
            allocations: 0,
            produced: 0,
            format_changed: false,
            calls: Vec::new(),
        }
    }

    fn auto(&self) -> bool {
        self.config.auto_complete
    }

    fn post(&self, event: UnitEvent) {
        if let Some(sink) = &self.sink {
            trace!("loopback posting {}", event.name());
            sink.post(event);
        }
    }

    fn complete(&self, command: UnitCommand) {
        if self.auto() {
            self.post(UnitEvent::CommandComplete(command));
        }
    }

    /// Hand every output buffer the unit holds back empty.
    fn return_held_output(&mut self) {
        self.pending.clear();
        if !self.auto() {
            self.held_output.clear();
            return;
        }
        while let Some(id) = self.held_output.pop_front() {
            self.post(UnitEvent::FillBufferDone {
                id,
                length: 0,
                data: Bytes::new(),
                flags: BufferFlags::NONE,
                timestamp_us: 0,
            });
        }
    }

    fn produce(&mut self) {
        if !self.auto() || self.state != UnitState::Executing {
            return;
        }

        while !self.pending.is_empty() && !self.held_output.is_empty() {
            let (Some(item), Some(id)) = (self.pending.pop_front(), self.held_output.pop_front())
            else {
                break;
            };

            let capacity = self.defs[PortIndex::Output.slot()].buffer_size;
            let length = item.data.len().min(capacity);
            let data = if self.graphic.contains(&id) {
                Bytes::new()
            } else {
                item.data.slice(..length)
            };
            self.post(UnitEvent::FillBufferDone {
                id,
                length,
                data,
                flags: item.flags,
                timestamp_us: item.timestamp_us,
            });

            self.produced += 1;
            if !self.format_changed && self.config.format_change_after == Some(self.produced) {
                self.format_changed = true;
                debug!("loopback raising output format change");
                self.post(UnitEvent::PortSettingsChanged {
                    port: PortIndex::Output,
                    index: SettingsIndex::PortDefinition,
                });
                // Stop producing until the port has been reconfigured.
                break;
            }
        }
    }

    fn check_port_transitions(&mut self, port: PortIndex) {
        let slot = port.slot();
        if self.disabling[slot] && self.buffers[slot].is_empty() {
            self.disabling[slot] = false;
            self.defs[slot].enabled = false;
            self.complete(UnitCommand::DisablePort(port));
        }
        if self.enabling[slot]
            && self.buffers[slot].len() >= self.defs[slot].buffer_count as usize
        {
            self.enabling[slot] = false;
            self.defs[slot].enabled = true;
            self.complete(UnitCommand::EnablePort(port));
        }
    }

    fn next_buffer(&mut self, port: PortIndex) -> Result<BufferId, UnitError> {
        if let Some(limit) = self.config.fail_allocation_after {
            if self.allocations >= limit {
                return Err(UnitError::new(
                    "allocate_buffer",
                    UnitErrorCode::InsufficientResources,
                ));
            }
        }
        self.allocations += 1;

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers[port.slot()].push(id);
        Ok(id)
    }

    fn apply_port_definition(&mut self, def: PortDefinition) -> Result<(), UnitError> {
        let slot = def.port.slot();
        let current = &self.defs[slot];
        if def.buffer_count < current.min_buffer_count {
            return Err(UnitError::new("set_parameter", UnitErrorCode::BadParameter));
        }

        // Input geometry drives the decoded output geometry.
        if def.port == PortIndex::Input {
            if let (PortFormat::Video(input), PortFormat::Video(output)) =
                (&def.format, &mut self.defs[PortIndex::Output.slot()].format)
            {
                if input.coding != VideoCoding::Raw {
                    output.width = input.width;
                    output.height = input.height;
                    output.stride = input.width;
                    output.slice_height = input.height;
                }
            }
            if let PortFormat::Audio(input) = &def.format {
                self.defs[PortIndex::Output.slot()].format = PortFormat::Audio(AudioPortFormat {
                    coding: AudioCoding::Pcm,
                    channels: input.channels,
                    sample_rate: input.sample_rate,
                    bitrate: 0,
                });
            }
        }

        let min_buffer_count = self.defs[slot].min_buffer_count;
        self.defs[slot] = PortDefinition {
            min_buffer_count,
            ..def
        };
        Ok(())
    }
}

/// Software unit with a shared call log; clones observe the same unit.
#[derive(Clone)]
pub struct LoopbackUnit {
    inner: Arc<Mutex<Inner>>,
}

impl LoopbackUnit {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(config))),
        }
    }

    /// A unit that records calls but never answers on its own.
    pub fn manual(mut config: LoopbackConfig) -> Self {
        config.auto_complete = false;
        Self::new(config)
    }

    pub fn calls(&self) -> Vec<UnitCall> {
        self.inner.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<UnitCall> {
        std::mem::take(&mut self.inner.lock().calls)
    }

    pub fn state(&self) -> UnitState {
        self.inner.lock().state
    }

    pub fn component(&self) -> Option<String> {
        self.inner.lock().component.clone()
    }

    pub fn role(&self) -> Option<String> {
        self.inner.lock().role.clone()
    }

    pub fn buffer_ids(&self, port: PortIndex) -> Vec<BufferId> {
        self.inner.lock().buffers[port.slot()].clone()
    }

    pub fn port_definition(&self, port: PortIndex) -> PortDefinition {
        self.inner.lock().defs[port.slot()].clone()
    }

    /// Post `event` as if the unit raised it. Returns `false` without a
    /// session or once the engine is gone.
    pub fn inject(&self, event: UnitEvent) -> bool {
        let inner = self.inner.lock();
        match &inner.sink {
            Some(sink) => sink.post(event),
            None => false,
        }
    }

    /// Change the decoded geometry and announce it on the output port.
    pub fn change_output_geometry(&self, width: u32, height: u32, buffer_count: u32) {
        let mut inner = self.inner.lock();
        let def = &mut inner.defs[PortIndex::Output.slot()];
        def.buffer_count = buffer_count.max(def.min_buffer_count);
        if let PortFormat::Video(video) = &mut def.format {
            video.width = width;
            video.height = height;
            video.stride = width;
            video.slice_height = height;
        }
        inner.post(UnitEvent::PortSettingsChanged {
            port: PortIndex::Output,
            index: SettingsIndex::PortDefinition,
        });
    }
}

impl HardwareUnit for LoopbackUnit {
    fn find_components(&self, mime: &str, encoder: bool) -> Vec<String> {
        self.inner
            .lock()
            .config
            .components
            .iter()
            .filter(|c| c.mime.eq_ignore_ascii_case(mime) && c.encoder == encoder)
            .filter(|c| !c.name.ends_with(".secure"))
            .map(|c| c.name.clone())
            .collect()
    }

    fn allocate_session(&mut self, component: &str, sink: EventSink) -> Result<(), UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::AllocateSession(component.to_string()));

        let known = inner.config.components.iter().any(|c| c.name == component);
        if !known || inner.config.unavailable.iter().any(|c| c == component) {
            return Err(UnitError::new(
                "allocate_session",
                UnitErrorCode::ComponentNotFound,
            ));
        }

        let config = inner.config.clone();
        let calls = std::mem::take(&mut inner.calls);
        *inner = Inner::new(config);
        inner.calls = calls;
        inner.component = Some(component.to_string());
        inner.sink = Some(sink);
        Ok(())
    }

    fn release_session(&mut self) -> Result<(), UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::ReleaseSession);
        inner.sink = None;
        inner.component = None;
        inner.buffers = [Vec::new(), Vec::new()];
        inner.held_output.clear();
        inner.pending.clear();
        Ok(())
    }

    fn get_parameter(&mut self, index: ParamIndex) -> Result<Parameter, UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::GetParameter(index));
        let unsupported = || UnitError::new("get_parameter", UnitErrorCode::UnsupportedIndex);

        match index {
            ParamIndex::PortDefinition(port) => {
                Ok(Parameter::PortDefinition(inner.defs[port.slot()].clone()))
            }
            ParamIndex::OutputCrop => inner.config.crop.map(Parameter::OutputCrop).ok_or_else(unsupported),
            ParamIndex::GraphicUsage => Ok(Parameter::GraphicUsage(0x100)),
            ParamIndex::PartialFrames => Ok(Parameter::PartialFrames(inner.config.partial_frames)),
            ParamIndex::ChannelMask => Err(unsupported()),
        }
    }

    fn set_parameter(&mut self, param: Parameter) -> Result<(), UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::SetParameter(param.name()));

        match param {
            Parameter::PortDefinition(def) => inner.apply_port_definition(def),
            Parameter::ComponentRole(role) => {
                inner.role = Some(role);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn send_command(&mut self, command: UnitCommand) -> Result<(), UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::SendCommand(command));

        match command {
            UnitCommand::SetState(state) => {
                if inner.state == UnitState::Executing && state == UnitState::Idle {
                    inner.return_held_output();
                }
                inner.state = state;
                inner.complete(command);
            }
            UnitCommand::Flush(target) => {
                let ports: &[PortIndex] = match target {
                    FlushTarget::Port(PortIndex::Input) => &[PortIndex::Input],
                    FlushTarget::Port(PortIndex::Output) => &[PortIndex::Output],
                    FlushTarget::All => &PortIndex::ALL,
                };
                for &port in ports {
                    if port == PortIndex::Output {
                        inner.return_held_output();
                    }
                    inner.complete(UnitCommand::Flush(FlushTarget::Port(port)));
                }
                if target == FlushTarget::All {
                    inner.complete(command);
                }
            }
            UnitCommand::DisablePort(port) => {
                if port == PortIndex::Output {
                    inner.return_held_output();
                }
                inner.disabling[port.slot()] = true;
                inner.check_port_transitions(port);
            }
            UnitCommand::EnablePort(port) => {
                inner.enabling[port.slot()] = true;
                inner.check_port_transitions(port);
            }
        }
        Ok(())
    }

    fn allocate_buffer(&mut self, port: PortIndex, size: usize) -> Result<BufferId, UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::AllocateBuffer { port, size });
        let id = inner.next_buffer(port)?;
        inner.check_port_transitions(port);
        Ok(id)
    }

    fn use_graphic_buffer(
        &mut self,
        port: PortIndex,
        handle: GraphicHandle,
    ) -> Result<BufferId, UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::UseGraphicBuffer { port, handle });
        let id = inner.next_buffer(port)?;
        inner.graphic.insert(id);
        inner.check_port_transitions(port);
        Ok(id)
    }

    fn free_buffer(&mut self, port: PortIndex, id: BufferId) -> Result<(), UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::FreeBuffer { port, id });

        let slot = port.slot();
        let Some(pos) = inner.buffers[slot].iter().position(|b| *b == id) else {
            return Err(UnitError::new("free_buffer", UnitErrorCode::BadParameter));
        };
        inner.buffers[slot].remove(pos);
        inner.graphic.remove(&id);
        inner.held_output.retain(|b| *b != id);
        inner.check_port_transitions(port);
        Ok(())
    }

    fn empty_buffer(
        &mut self,
        id: BufferId,
        data: &[u8],
        flags: BufferFlags,
        timestamp_us: i64,
    ) -> Result<(), UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::EmptyBuffer {
            id,
            len: data.len(),
            flags,
            timestamp_us,
        });

        if !inner.buffers[PortIndex::Input.slot()].contains(&id) {
            return Err(UnitError::new("empty_buffer", UnitErrorCode::BadParameter));
        }
        if !inner.auto() {
            return Ok(());
        }

        inner.post(UnitEvent::EmptyBufferDone { id });
        if !data.is_empty() || flags.is_eos() {
            let mut out_flags = flags;
            out_flags.remove(BufferFlags::CODEC_CONFIG);
            inner.pending.push_back(PendingOutput {
                data: Bytes::copy_from_slice(data),
                flags: out_flags,
                timestamp_us,
            });
        }
        inner.produce();
        Ok(())
    }

    fn fill_buffer(&mut self, id: BufferId) -> Result<(), UnitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(UnitCall::FillBuffer(id));

        if !inner.buffers[PortIndex::Output.slot()].contains(&id) {
            return Err(UnitError::new("fill_buffer", UnitErrorCode::BadParameter));
        }
        inner.held_output.push_back(id);
        inner.produce();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_components_are_only_reachable_by_name() {
        let unit = LoopbackUnit::new(LoopbackConfig::default());
        assert_eq!(
            unit.find_components("video/avc", false),
            vec!["loopback.avc.decoder".to_string()]
        );
        assert_eq!(
            unit.find_components("video/avc", true),
            vec!["loopback.avc.encoder".to_string()]
        );
        assert!(unit.find_components("video/x-unknown", false).is_empty());
    }

    #[test]
    fn input_geometry_propagates_to_output() {
        let mut unit = LoopbackUnit::new(LoopbackConfig::default());
        let mut def = unit.port_definition(PortIndex::Input);
        if let PortFormat::Video(video) = &mut def.format {
            video.width = 640;
            video.height = 480;
        }
        unit.set_parameter(Parameter::PortDefinition(def)).unwrap();

        let out = unit.port_definition(PortIndex::Output);
        let video = out.format.video().unwrap();
        assert_eq!((video.width, video.height), (640, 480));
    }

    #[test]
    fn buffer_count_below_minimum_is_rejected() {
        let mut unit = LoopbackUnit::new(LoopbackConfig::default());
        let mut def = unit.port_definition(PortIndex::Output);
        def.buffer_count = 1;
        let err = unit.set_parameter(Parameter::PortDefinition(def)).unwrap_err();
        assert_eq!(err.code, UnitErrorCode::BadParameter);
    }

    #[test]
    fn allocation_limit() {
        let mut unit = LoopbackUnit::new(LoopbackConfig {
            fail_allocation_after: Some(1),
            ..LoopbackConfig::default()
        });
        assert!(unit.allocate_buffer(PortIndex::Input, 16).is_ok());
        let err = unit.allocate_buffer(PortIndex::Input, 16).unwrap_err();
        assert_eq!(err.code, UnitErrorCode::InsufficientResources);
    }
}
