//! `Context`: everything the lifecycle states read and mutate.
//!
//! State handlers receive `&mut Context` explicitly; nothing else in the
//! engine touches ports, buffers or the unit.

use std::collections::VecDeque;

use flume::WeakSender;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::buffer::get_byte_pool;
use crate::codec::{
    buffer::{BufferInfo, BufferMemory, BufferOwner},
    configure::{CodecSetup, read_port_definition},
    constants::PCM_SAMPLE_BYTES,
    format::OutputFormat,
    message::{EventSink, InputData, Message},
    notify::{BufferDescriptor, Notification, Notifier, StreamResult},
    port::Port,
    skip_cut::SkipCut,
};
use crate::common::{
    errors::{EngineError, MediaKind, UnitErrorCode},
    types::PortIndex,
};
use crate::configs::EngineConfig;
use crate::hardware::BoxedUnit;
use crate::surface::BoxedSurface;

pub struct Context {
    pub(crate) unit: BoxedUnit,
    pub(crate) surface: Option<BoxedSurface>,
    pub(crate) ports: [Port; 2],
    pub(crate) config: EngineConfig,
    notifier: Notifier,
    self_tx: WeakSender<Message>,

    pub(crate) component: Option<String>,
    pub(crate) session_id: Option<Uuid>,
    pub(crate) setup: Option<CodecSetup>,
    pub(crate) configured: bool,
    pub(crate) secure: bool,
    pub(crate) partial_frames: bool,

    pub(crate) shutdown_in_progress: bool,
    pub(crate) keep_session_alive: bool,
    pub(crate) input_eos_result: StreamResult,
    /// Producer input waiting for a free input buffer, oldest first. The
    /// head may be the tail of an access unit that did not fit its buffer.
    pub(crate) pending_input: VecDeque<InputData>,
    pub(crate) executing_active: bool,
    pub(crate) sent_format: bool,
    pub(crate) skip_cut: Option<SkipCut>,
}

impl Context {
    pub(crate) fn new(
        unit: BoxedUnit,
        config: EngineConfig,
        notifier: Notifier,
        self_tx: WeakSender<Message>,
    ) -> Self {
        Self {
            unit,
            surface: None,
            ports: [Port::new(PortIndex::Input), Port::new(PortIndex::Output)],
            config,
            notifier,
            self_tx,
            component: None,
            session_id: None,
            setup: None,
            configured: false,
            secure: false,
            partial_frames: false,
            shutdown_in_progress: false,
            keep_session_alive: false,
            input_eos_result: StreamResult::Ok,
            pending_input: VecDeque::new(),
            executing_active: false,
            sent_format: false,
            skip_cut: None,
        }
    }

    #[inline]
    pub fn port(&self, port: PortIndex) -> &Port {
        &self.ports[port.slot()]
    }

    #[inline]
    pub fn port_mut(&mut self, port: PortIndex) -> &mut Port {
        &mut self.ports[port.slot()]
    }

    pub fn name(&self) -> &str {
        self.component.as_deref().unwrap_or("unbound")
    }

    pub(crate) fn notify(&self, notification: Notification) {
        self.notifier.send(notification);
    }

    /// Sink handed to the unit when a session is allocated.
    pub(crate) fn event_sink(&self) -> EventSink {
        EventSink::new(self.self_tx.clone())
    }

    pub(crate) fn kind(&self) -> MediaKind {
        self.setup.as_ref().map(|s| s.kind).unwrap_or(MediaKind {
            is_video: false,
            is_encoder: false,
        })
    }

    pub(crate) fn is_encoder(&self) -> bool {
        self.kind().is_encoder
    }

    pub(crate) fn signal_error(&self, err: &EngineError) {
        error!("[{}] {}", self.name(), err);
        self.notify(Notification::Error {
            code: err.code(),
            detail: err.to_string(),
        });
    }

    /// Report an asynchronous unit error, classified by media type.
    pub(crate) fn signal_unit_error(&self, code: UnitErrorCode) {
        let mapped = self.kind().classify(code);
        error!("[{}] unit reported {} ({:?})", self.name(), code, mapped);
        self.notify(Notification::Error {
            code: mapped,
            detail: format!("unit reported {}", code),
        });
    }

    /// Reset per-session fields after the unit session is released.
    pub(crate) fn clear_session(&mut self) {
        self.component = None;
        self.session_id = None;
        self.setup = None;
        self.configured = false;
        self.secure = false;
        self.partial_frames = false;
        self.surface = None;
        self.reset_stream();
    }

    /// Forget end of stream and any half-submitted input so the next start
    /// begins a fresh stream.
    pub(crate) fn reset_stream(&mut self) {
        for port in PortIndex::ALL {
            self.port_mut(port).eos = false;
        }
        self.input_eos_result = StreamResult::Ok;
        self.pending_input.clear();
        self.skip_cut = None;
        self.sent_format = false;
    }

    // ── Buffer allocation ────────────────────────────────────────────────────

    pub(crate) fn allocate_buffers_on_port(&mut self, port: PortIndex) -> Result<(), EngineError> {
        if !self.port(port).is_empty() {
            return Err(EngineError::Protocol(format!(
                "{} port already holds {} buffers",
                port,
                self.port(port).len()
            )));
        }

        if port == PortIndex::Output && self.surface.is_some() {
            self.allocate_output_buffers_from_surface()?;
        } else {
            let def = read_port_definition(self.unit.as_mut(), port)?;
            debug!(
                "[{}] allocating {} buffers of {} bytes on {} port",
                self.name(),
                def.buffer_count,
                def.buffer_size,
                port
            );
            for _ in 0..def.buffer_count {
                let id = self.unit.allocate_buffer(port, def.buffer_size)?;
                let memory = get_byte_pool().acquire(def.buffer_size);
                self.port_mut(port)
                    .push(BufferInfo::heap(id, def.buffer_size, memory))?;
            }
        }

        let buffers = self
            .port(port)
            .buffers()
            .iter()
            .map(|b| BufferDescriptor {
                id: b.id,
                capacity: b.capacity,
            })
            .collect();
        self.notify(Notification::BuffersAllocated { port, buffers });
        Ok(())
    }

    /// Release buffer `idx` of `port` to the unit and drop its record.
    pub(crate) fn free_buffer(&mut self, port: PortIndex, idx: usize) -> Result<(), EngineError> {
        let owner = self.port(port).get(idx).owner();
        if !owner.is_reclaimed() {
            return Err(EngineError::Protocol(format!(
                "cannot free {} buffer {} while {:?}",
                port,
                self.port(port).get(idx).id,
                owner
            )));
        }

        if port == PortIndex::Output
            && owner == BufferOwner::OwnedByUs
            && self.surface.is_some()
            && self.port(port).get(idx).graphic_handle().is_some()
        {
            self.cancel_to_surface(idx)?;
        }

        let info = self.port_mut(port).remove(idx);
        trace!("[{}] freeing {} buffer {}", self.name(), port, info.id);
        if let BufferMemory::Heap(memory) = info.memory {
            get_byte_pool().release(memory);
        }
        self.unit.free_buffer(port, info.id)?;
        Ok(())
    }

    pub(crate) fn free_buffers_on_port(&mut self, port: PortIndex) -> Result<(), EngineError> {
        for idx in (0..self.port(port).len()).rev() {
            self.free_buffer(port, idx)?;
        }
        Ok(())
    }

    /// Free output buffers the unit does not hold. Buffers still with the
    /// consumer are freed when they are drained.
    pub(crate) fn free_output_buffers_not_owned_by_unit(&mut self) -> Result<(), EngineError> {
        let port = PortIndex::Output;
        for idx in (0..self.port(port).len()).rev() {
            match self.port(port).get(idx).owner() {
                BufferOwner::OwnedByHardware => {}
                BufferOwner::OwnedByDownstream => {
                    debug!(
                        "[{}] output buffer {} still downstream, freeing on drain",
                        self.name(),
                        self.port(port).get(idx).id
                    );
                }
                _ => self.free_buffer(port, idx)?,
            }
        }
        Ok(())
    }

    /// Free whatever is left on both ports after a failed allocation.
    pub(crate) fn discard_buffers(&mut self) {
        for port in PortIndex::ALL {
            if let Err(e) = self.free_buffers_on_port(port) {
                warn!("[{}] discarding {} buffers: {}", self.name(), port, e);
                for info in self.port_mut(port).drain() {
                    if let BufferMemory::Heap(memory) = info.memory {
                        get_byte_pool().release(memory);
                    }
                }
            }
        }
    }

    pub(crate) fn all_buffers_reclaimed(&self) -> bool {
        PortIndex::ALL.iter().all(|p| self.port(*p).all_reclaimed())
    }

    // ── Buffer circulation ───────────────────────────────────────────────────

    /// Offer input buffer `idx` to the producer.
    pub(crate) fn post_fill_this_buffer(&mut self, idx: usize) -> Result<(), EngineError> {
        let input = PortIndex::Input;
        if self.port(input).eos {
            return Ok(());
        }
        self.port(input).get(idx).expect_owner(input, BufferOwner::OwnedByUs)?;

        let id = self.port(input).get(idx).id;
        self.port_mut(input)
            .transition(idx, BufferOwner::OwnedByUpstream)?;

        let capacity = self.port(input).get(idx).capacity;
        self.notify(Notification::FillThisBuffer { id, capacity });
        Ok(())
    }

    pub(crate) fn input_in_flight(&self) -> usize {
        self.port(PortIndex::Input)
            .count_owned_by(BufferOwner::OwnedByHardware)
    }

    /// Whether the admission cap allows handing out another input buffer.
    pub(crate) fn input_admission_open(&self) -> bool {
        match self.config.max_in_flight_input {
            Some(max) => self.input_in_flight() < max,
            None => true,
        }
    }

    pub(crate) fn get_more_input_if_possible(&mut self) -> Result<(), EngineError> {
        if self.port(PortIndex::Input).eos || !self.input_admission_open() {
            return Ok(());
        }
        match self.port(PortIndex::Input).last_owned_by_us() {
            Some(idx) => self.post_fill_this_buffer(idx),
            None => Ok(()),
        }
    }

    /// Hand every free output buffer to the unit.
    pub(crate) fn submit_output_buffers(&mut self) -> Result<(), EngineError> {
        let port = PortIndex::Output;
        for idx in 0..self.port(port).len() {
            let info = self.port(port).get(idx);
            if info.owner() == BufferOwner::OwnedBySurface {
                continue;
            }
            info.expect_owner(port, BufferOwner::OwnedByUs)?;
            let id = info.id;
            self.unit.fill_buffer(id)?;
            self.port_mut(port)
                .transition(idx, BufferOwner::OwnedByHardware)?;
        }
        Ok(())
    }

    /// Announce the current output format and arm delay/padding trimming.
    pub(crate) fn send_format_change(&mut self) -> Result<(), EngineError> {
        let channel_mask = self.setup.as_ref().and_then(|s| s.channel_mask);
        let format = OutputFormat::query(self.unit.as_mut(), channel_mask)?;

        if let (Some(crop), Some(surface)) = (format.crop(), self.surface.as_mut()) {
            surface.set_crop(crop)?;
        }

        if let (OutputFormat::Audio { channels, .. }, false) = (&format, self.is_encoder()) {
            let (delay, padding) = self
                .setup
                .as_ref()
                .map(|s| (s.encoder_delay, s.encoder_padding))
                .unwrap_or((0, 0));
            if let Some(previous) = &self.skip_cut {
                if previous.held() > 0 {
                    warn!(
                        "[{}] replacing trimmer holding {} bytes",
                        self.name(),
                        previous.held()
                    );
                }
            }
            self.skip_cut =
                SkipCut::for_frames(delay, padding, *channels as usize * PCM_SAMPLE_BYTES);
        }

        debug!("[{}] output format {:?}", self.name(), format);
        self.notify(Notification::OutputFormatChanged { format });
        self.sent_format = true;
        Ok(())
    }
}
