//! Handlers shared by every state: buffer circulation and unit events no
//! state claims for itself.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::codec::{
    buffer::{BufferMemory, BufferOwner},
    context::Context,
    message::{AccessUnit, InputData, Message},
    notify::{Notification, StreamResult},
    port::PortMode,
    state::State,
    states::Outcome,
};
use crate::common::{
    errors::EngineError,
    types::{BufferFlags, BufferId, PortIndex},
};
use crate::hardware::{FlushTarget, UnitCommand, UnitEvent};

pub(super) fn on_message(
    state: State,
    ctx: &mut Context,
    msg: Message,
) -> Result<Outcome, EngineError> {
    match msg {
        Message::InputBufferFilled { id, input } => {
            on_input_buffer_filled(ctx, state.port_mode(PortIndex::Input), id, input)?;
        }
        Message::OutputBufferDrained { id, render } => {
            on_output_buffer_drained(ctx, state.port_mode(PortIndex::Output), id, render)?;
        }
        Message::Unit(UnitEvent::EmptyBufferDone { id }) => {
            on_empty_buffer_done(ctx, state.port_mode(PortIndex::Input), id)?;
        }
        Message::Unit(UnitEvent::FillBufferDone {
            id,
            length,
            data,
            flags,
            timestamp_us,
        }) => {
            let done = FillDone {
                id,
                length,
                data,
                flags,
                timestamp_us,
            };
            on_fill_buffer_done(ctx, state.port_mode(PortIndex::Output), done)?;
        }
        Message::Unit(UnitEvent::Error { code }) => ctx.signal_unit_error(code),
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::Flush(FlushTarget::All))) => {
            trace!("[{}] ignoring flush-all completion", ctx.name());
        }
        Message::Unit(UnitEvent::CommandComplete(command)) => {
            return Err(EngineError::Protocol(format!(
                "unexpected completion of {:?} in {}",
                command,
                state.name()
            )));
        }
        Message::Unit(UnitEvent::PortSettingsChanged { port, index }) => {
            debug!(
                "[{}] ignoring {} port settings change ({:?}) in {}",
                ctx.name(),
                port,
                index,
                state.name()
            );
        }
        Message::Unit(UnitEvent::BufferFlag { port, flags }) => {
            trace!("[{}] {} buffer flag {:#x}", ctx.name(), port, flags.0);
        }
        other => return Ok(Outcome::Unhandled(other)),
    }
    Ok(Outcome::Handled)
}

/// Whether `msg` moves a buffer between owners.
pub(super) fn is_buffer_message(msg: &Message) -> bool {
    matches!(
        msg,
        Message::InputBufferFilled { .. }
            | Message::OutputBufferDrained { .. }
            | Message::Unit(UnitEvent::EmptyBufferDone { .. })
            | Message::Unit(UnitEvent::FillBufferDone { .. })
    )
}

// ── Input ────────────────────────────────────────────────────────────────────

pub(super) fn on_input_buffer_filled(
    ctx: &mut Context,
    mode: PortMode,
    id: BufferId,
    input: InputData,
) -> Result<(), EngineError> {
    let port = PortIndex::Input;
    let idx = ctx.port(port).find(id)?;
    ctx.port(port)
        .get(idx)
        .expect_owner(port, BufferOwner::OwnedByUpstream)?;
    ctx.port_mut(port).transition(idx, BufferOwner::OwnedByUs)?;

    if mode != PortMode::Resubmit {
        let (eos, result) = match &input {
            InputData::AccessUnit(unit) => (unit.end_of_stream, StreamResult::EndOfStream),
            InputData::Exhausted(result) => (true, *result),
        };
        if eos {
            ctx.port_mut(port).eos = true;
            ctx.input_eos_result = result;
        }
        return Ok(());
    }

    if ctx.port(port).eos {
        trace!("[{}] input {} arrived after end of stream", ctx.name(), id);
        return Ok(());
    }

    ctx.pending_input.push_back(input);
    feed_pending_input(ctx, Some(idx))
}

/// Submit queued input to free input buffers in arrival order, starting with
/// `preferred`. Once the queue is empty a free buffer is offered to the
/// producer.
fn feed_pending_input(
    ctx: &mut Context,
    mut preferred: Option<usize>,
) -> Result<(), EngineError> {
    let port = PortIndex::Input;
    while !ctx.pending_input.is_empty() && ctx.input_admission_open() {
        if ctx.port(port).eos {
            trace!(
                "[{}] dropping {} inputs queued past end of stream",
                ctx.name(),
                ctx.pending_input.len()
            );
            ctx.pending_input.clear();
            return Ok(());
        }
        let Some(idx) = preferred
            .take()
            .or_else(|| ctx.port(port).last_owned_by_us())
        else {
            trace!(
                "[{}] {} inputs waiting for a free buffer",
                ctx.name(),
                ctx.pending_input.len()
            );
            return Ok(());
        };
        if let Some(input) = ctx.pending_input.pop_front() {
            submit_input(ctx, idx, input)?;
        }
    }

    if !ctx.pending_input.is_empty() || ctx.port(port).eos {
        return Ok(());
    }
    match preferred {
        Some(idx) if ctx.input_admission_open() => ctx.post_fill_this_buffer(idx),
        Some(idx) => {
            trace!(
                "[{}] {} input buffers in flight, holding {}",
                ctx.name(),
                ctx.input_in_flight(),
                ctx.port(port).get(idx).id
            );
            Ok(())
        }
        None => ctx.get_more_input_if_possible(),
    }
}

fn submit_input(ctx: &mut Context, idx: usize, input: InputData) -> Result<(), EngineError> {
    let port = PortIndex::Input;
    match input {
        InputData::AccessUnit(unit) => submit_access_unit(ctx, idx, unit),
        InputData::Exhausted(result) => {
            debug!("[{}] producer exhausted ({:?}), signalling EOS", ctx.name(), result);
            let id = ctx.port(port).get(idx).id;
            ctx.unit
                .empty_buffer(id, &[], BufferFlags::END_OF_STREAM, 0)?;
            let info = ctx.port_mut(port).get_mut(idx);
            info.range = (0, 0);
            info.flags = BufferFlags::END_OF_STREAM;
            info.timestamp_us = 0;
            ctx.port_mut(port)
                .transition(idx, BufferOwner::OwnedByHardware)?;
            ctx.port_mut(port).eos = true;
            ctx.input_eos_result = result;
            Ok(())
        }
    }
}

/// Copy `unit` into input buffer `idx` and hand it to the unit. Data past the
/// buffer's capacity goes back to the head of the input queue.
fn submit_access_unit(
    ctx: &mut Context,
    idx: usize,
    mut unit: AccessUnit,
) -> Result<(), EngineError> {
    let port = PortIndex::Input;
    let capacity = ctx.port(port).get(idx).capacity;
    let mut eos = unit.end_of_stream;
    let mut flags = BufferFlags::END_OF_FRAME;

    if unit.data.len() > capacity {
        if !ctx.partial_frames {
            return Err(EngineError::InputTooLarge {
                size: unit.data.len(),
                capacity,
            });
        }
        let rest = unit.data.split_off(capacity);
        trace!(
            "[{}] splitting access unit, {} bytes held over",
            ctx.name(),
            rest.len()
        );
        ctx.pending_input.push_front(InputData::AccessUnit(AccessUnit {
            data: rest,
            timestamp_us: unit.timestamp_us,
            end_of_stream: eos,
            codec_config: unit.codec_config,
        }));
        flags.remove(BufferFlags::END_OF_FRAME);
        eos = false;
    }
    if unit.codec_config {
        flags.insert(BufferFlags::CODEC_CONFIG);
    }
    if eos {
        flags.insert(BufferFlags::END_OF_STREAM);
    }

    let info = ctx.port_mut(port).get_mut(idx);
    let id = info.id;
    if let BufferMemory::Heap(memory) = &mut info.memory {
        memory.clear();
        memory.extend_from_slice(&unit.data);
    }
    info.range = (0, unit.data.len());
    info.flags = flags;
    info.timestamp_us = unit.timestamp_us;

    trace!(
        "[{}] empty_buffer {} ({} bytes, flags {:#x}, t={}us)",
        ctx.name(),
        id,
        unit.data.len(),
        flags.0,
        unit.timestamp_us
    );
    ctx.unit
        .empty_buffer(id, &unit.data, flags, unit.timestamp_us)?;
    ctx.port_mut(port)
        .transition(idx, BufferOwner::OwnedByHardware)?;

    if eos {
        debug!("[{}] input reached end of stream", ctx.name());
        ctx.port_mut(port).eos = true;
        ctx.input_eos_result = StreamResult::EndOfStream;
    }
    Ok(())
}

pub(super) fn on_empty_buffer_done(
    ctx: &mut Context,
    mode: PortMode,
    id: BufferId,
) -> Result<(), EngineError> {
    let port = PortIndex::Input;
    let idx = ctx.port(port).find(id)?;
    ctx.port(port)
        .get(idx)
        .expect_owner(port, BufferOwner::OwnedByHardware)?;
    ctx.port_mut(port).transition(idx, BufferOwner::OwnedByUs)?;

    match mode {
        PortMode::Keep => Ok(()),
        PortMode::Resubmit => feed_pending_input(ctx, Some(idx)),
        PortMode::Free => ctx.free_buffer(port, idx),
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

pub(super) struct FillDone {
    pub id: BufferId,
    pub length: usize,
    pub data: Bytes,
    pub flags: BufferFlags,
    pub timestamp_us: i64,
}

pub(super) fn on_fill_buffer_done(
    ctx: &mut Context,
    mode: PortMode,
    done: FillDone,
) -> Result<(), EngineError> {
    let port = PortIndex::Output;
    let idx = ctx.port(port).find(done.id)?;
    ctx.port(port)
        .get(idx)
        .expect_owner(port, BufferOwner::OwnedByHardware)?;

    match mode {
        PortMode::Resubmit if done.length > 0 || done.flags.is_eos() => {
            deliver_output(ctx, idx, done)
        }
        PortMode::Resubmit => {
            ctx.port_mut(port).transition(idx, BufferOwner::OwnedByUs)?;
            if ctx.port(port).eos {
                trace!("[{}] output already at end of stream", ctx.name());
                return Ok(());
            }
            ctx.unit.fill_buffer(done.id)?;
            ctx.port_mut(port)
                .transition(idx, BufferOwner::OwnedByHardware)
        }
        PortMode::Keep => ctx.port_mut(port).transition(idx, BufferOwner::OwnedByUs),
        PortMode::Free => {
            ctx.port_mut(port).transition(idx, BufferOwner::OwnedByUs)?;
            ctx.free_buffer(port, idx)
        }
    }
}

/// Forward a filled output buffer to the consumer. End of stream is reported
/// once, with the first buffer that carries it.
fn deliver_output(ctx: &mut Context, idx: usize, done: FillDone) -> Result<(), EngineError> {
    let port = PortIndex::Output;
    if !ctx.is_encoder() && !ctx.sent_format {
        ctx.send_format_change()?;
    }

    let is_heap = matches!(ctx.port(port).get(idx).memory, BufferMemory::Heap(_));
    let data = if !is_heap {
        Bytes::new()
    } else if let Some(trimmer) = ctx.skip_cut.as_mut() {
        Bytes::from(trimmer.process(&done.data))
    } else {
        done.data
    };
    let size = if is_heap { data.len() } else { done.length };

    let info = ctx.port_mut(port).get_mut(idx);
    if let BufferMemory::Heap(memory) = &mut info.memory {
        memory.clear();
        memory.extend_from_slice(&data);
    }
    info.range = (0, size);
    info.flags = done.flags;
    info.timestamp_us = done.timestamp_us;
    ctx.port_mut(port)
        .transition(idx, BufferOwner::OwnedByDownstream)?;

    ctx.notify(Notification::DrainThisBuffer {
        id: done.id,
        data,
        size,
        flags: done.flags,
        timestamp_us: done.timestamp_us,
    });

    if done.flags.is_eos() && !ctx.port(port).eos {
        debug!("[{}] saw output end of stream", ctx.name());
        ctx.notify(Notification::EndOfStream {
            result: ctx.input_eos_result,
        });
        ctx.port_mut(port).eos = true;
    }
    Ok(())
}

pub(super) fn on_output_buffer_drained(
    ctx: &mut Context,
    mode: PortMode,
    id: BufferId,
    render: bool,
) -> Result<(), EngineError> {
    let port = PortIndex::Output;
    let idx = ctx.port(port).find(id)?;
    let info = ctx.port(port).get(idx);
    info.expect_owner(port, BufferOwner::OwnedByDownstream)?;
    let handle = info.graphic_handle();

    let queued = match (render, handle) {
        (true, Some(handle)) => ctx
            .surface
            .as_mut()
            .map(|surface| surface.queue_buffer(handle)),
        _ => None,
    };
    match queued {
        Some(Ok(())) => ctx
            .port_mut(port)
            .transition(idx, BufferOwner::OwnedBySurface)?,
        Some(Err(e)) => {
            ctx.signal_error(&e.into());
            ctx.port_mut(port).transition(idx, BufferOwner::OwnedByUs)?;
        }
        None => ctx.port_mut(port).transition(idx, BufferOwner::OwnedByUs)?,
    }

    let rendered = ctx.port(port).get(idx).owner() == BufferOwner::OwnedBySurface;
    match mode {
        PortMode::Keep => {
            if rendered {
                ctx.dequeue_from_surface()?;
            }
            Ok(())
        }
        PortMode::Resubmit => {
            if ctx.port(port).eos {
                return Ok(());
            }
            let next = if rendered {
                ctx.dequeue_from_surface()?
            } else {
                Some(idx)
            };
            match next {
                Some(next) => {
                    let id = ctx.port(port).get(next).id;
                    ctx.unit.fill_buffer(id)?;
                    ctx.port_mut(port)
                        .transition(next, BufferOwner::OwnedByHardware)
                }
                None => {
                    warn!("[{}] no surface buffer to resubmit", ctx.name());
                    Ok(())
                }
            }
        }
        PortMode::Free => ctx.free_buffer(port, idx),
    }
}
