//! Output buffers backed by a presentation surface.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::codec::{
    buffer::{BufferInfo, BufferOwner},
    configure::read_port_definition,
    context::Context,
};
use crate::common::{
    errors::{EngineError, SurfaceError},
    types::PortIndex,
};
use crate::hardware::{ParamIndex, Parameter, PortDefinition};
use crate::surface::{
    PIXEL_FORMAT_RGBX_8888, PresentationSurface, SurfaceApi, USAGE_PROTECTED,
    USAGE_SW_WRITE_OFTEN,
};

impl Context {
    /// Negotiate with the surface and register its buffers with the unit.
    pub(crate) fn allocate_output_buffers_from_surface(&mut self) -> Result<(), EngineError> {
        let port = PortIndex::Output;
        let def = read_port_definition(self.unit.as_mut(), port)?;
        let video = def.format.video().cloned().ok_or_else(|| {
            EngineError::Resource("surface output needs a video port".to_string())
        })?;

        let mut usage = match self.unit.get_parameter(ParamIndex::GraphicUsage) {
            Ok(Parameter::GraphicUsage(usage)) => usage,
            Ok(other) => {
                warn!("[{}] graphic usage query answered with {}", self.name(), other.name());
                0
            }
            Err(e) => {
                debug!("[{}] no graphic usage from unit: {}", self.name(), e);
                0
            }
        };
        if self.secure {
            usage |= USAGE_PROTECTED;
        }

        let timeout = self.config.dequeue_timeout();
        let name = self.name().to_string();
        let Some(surface) = self.surface.as_mut() else {
            return Err(EngineError::Protocol("no surface bound".to_string()));
        };

        surface.set_geometry(video.width, video.height, video.color_format)?;
        if usage & USAGE_PROTECTED != 0 && !surface.queues_to_composer()? {
            return Err(SurfaceError::NotAuthenticated.into());
        }
        surface.set_usage(usage)?;
        let min_undequeued = surface.min_undequeued_buffers()?;

        let mut count = def.buffer_count;
        let needed = def.min_buffer_count + min_undequeued;
        if count < needed {
            debug!("[{}] raising output buffer count {} -> {}", name, count, needed);
            self.unit.set_parameter(Parameter::PortDefinition(PortDefinition {
                buffer_count: needed,
                ..def.clone()
            }))?;
            count = needed;
        }
        surface.set_buffer_count(count)?;

        debug!(
            "[{}] dequeueing {} surface buffers ({} undequeued)",
            name, count, min_undequeued
        );
        let outputs = &mut self.ports[port.slot()];
        let mut failure = None;
        for _ in 0..count {
            let handle = match surface.dequeue_buffer(timeout) {
                Ok(handle) => handle,
                Err(e) => {
                    failure = Some(EngineError::from(e));
                    break;
                }
            };
            let registered = self
                .unit
                .use_graphic_buffer(port, handle)
                .map_err(EngineError::from)
                .and_then(|id| outputs.push(BufferInfo::graphic(id, def.buffer_size, handle)));
            if let Err(e) = registered {
                if let Err(cancel) = surface.cancel_buffer(handle) {
                    warn!("[{}] could not cancel {}: {}", name, handle, cancel);
                }
                failure = Some(e);
                break;
            }
        }

        if let Some(e) = failure {
            for idx in 0..self.port(port).len() {
                self.cancel_to_surface(idx)?;
            }
            return Err(e);
        }

        let len = self.port(port).len();
        for idx in len.saturating_sub(min_undequeued as usize)..len {
            self.cancel_to_surface(idx)?;
        }
        Ok(())
    }

    /// Give output buffer `idx` back to the surface without presenting it.
    ///
    /// A surface that refuses leaves the buffer `OwnedByUnexpected`.
    pub(crate) fn cancel_to_surface(&mut self, idx: usize) -> Result<(), EngineError> {
        let port = PortIndex::Output;
        let info = self.port(port).get(idx);
        info.expect_owner(port, BufferOwner::OwnedByUs)?;
        let id = info.id;
        let handle = info.graphic_handle().ok_or_else(|| {
            EngineError::Protocol(format!("output buffer {} is not surface-backed", id))
        })?;

        let cancelled = match self.surface.as_mut() {
            Some(surface) => surface.cancel_buffer(handle),
            None => Err(SurfaceError::Disconnected),
        };
        match cancelled {
            Ok(()) => {
                trace!("[{}] cancelled {} ({}) to surface", self.name(), id, handle);
                self.port_mut(port)
                    .transition(idx, BufferOwner::OwnedBySurface)
            }
            Err(e) => {
                warn!(
                    "[{}] surface refused output buffer {} ({}): {}",
                    self.name(),
                    id,
                    handle,
                    e
                );
                self.port_mut(port)
                    .transition(idx, BufferOwner::OwnedByUnexpected)
            }
        }
    }

    /// Take the next free buffer from the surface and map it to its output
    /// buffer. Returns `None` when the surface has nothing to give or hands
    /// out a buffer this port never registered.
    pub(crate) fn dequeue_from_surface(&mut self) -> Result<Option<usize>, EngineError> {
        let port = PortIndex::Output;
        let timeout = self.config.dequeue_timeout();
        let name = self.component.as_deref().unwrap_or("unbound");
        let Some(surface) = self.surface.as_mut() else {
            return Ok(None);
        };

        let handle = match surface.dequeue_buffer(timeout) {
            Ok(handle) => handle,
            Err(e) => {
                debug!("[{}] surface dequeue failed: {}", name, e);
                return Ok(None);
            }
        };

        let outputs = &mut self.ports[port.slot()];
        match outputs
            .buffers()
            .iter()
            .rposition(|b| b.graphic_handle() == Some(handle))
        {
            Some(idx) => {
                outputs
                    .get(idx)
                    .expect_owner(port, BufferOwner::OwnedBySurface)?;
                outputs.transition(idx, BufferOwner::OwnedByUs)?;
                Ok(Some(idx))
            }
            None => {
                warn!(
                    "[{}] surface returned unknown buffer {}, cancelling it back",
                    name, handle
                );
                if let Err(e) = surface.cancel_buffer(handle) {
                    warn!("[{}] could not cancel {}: {}", name, handle, e);
                }
                Ok(None)
            }
        }
    }

    /// Replace whatever is on screen with blank frames before a protected
    /// session goes away. Failures are logged and otherwise ignored.
    pub(crate) fn push_blank_frames(&mut self) {
        let timeout = self.config.dequeue_timeout();
        let name = self.name().to_string();
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        match push_blank_frames_to(&mut **surface, timeout) {
            Ok(frames) => info!("[{}] pushed {} blank frames", name, frames),
            Err(e) => warn!("[{}] failed to push blank frames: {}", name, e),
        }
    }
}

fn push_blank_frames_to(
    surface: &mut dyn PresentationSurface,
    timeout: Duration,
) -> Result<u32, SurfaceError> {
    surface.disconnect(SurfaceApi::Media)?;
    if let Err(e) = surface.connect(SurfaceApi::Cpu) {
        surface.connect(SurfaceApi::Media)?;
        return Err(e);
    }

    let pushed = fill_blank_frames(surface, timeout);

    surface.disconnect(SurfaceApi::Cpu)?;
    surface.connect(SurfaceApi::Media)?;
    pushed
}

fn fill_blank_frames(
    surface: &mut dyn PresentationSurface,
    timeout: Duration,
) -> Result<u32, SurfaceError> {
    surface.set_geometry(1, 1, PIXEL_FORMAT_RGBX_8888)?;
    surface.set_usage(USAGE_SW_WRITE_OFTEN)?;

    let min_undequeued = surface.min_undequeued_buffers()?;
    surface.set_buffer_count(min_undequeued + 1)?;

    let frames = min_undequeued + 2;
    for _ in 0..frames {
        let handle = surface.dequeue_buffer(timeout)?;
        let queued = surface
            .fill_blank(handle)
            .and_then(|_| surface.queue_buffer(handle));
        if let Err(e) = queued {
            if let Err(cancel) = surface.cancel_buffer(handle) {
                warn!("could not cancel blank frame {}: {}", handle, cancel);
            }
            return Err(e);
        }
    }
    Ok(frames)
}
