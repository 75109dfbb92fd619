use tracing::debug;

use crate::codec::{
    context::Context,
    message::{Command, Message},
    notify::{Notification, StreamResult},
    state::State,
    states::{Outcome, base},
};
use crate::common::{errors::EngineError, types::PortIndex};
use crate::hardware::{FlushTarget, UnitCommand, UnitEvent};

pub(super) fn on_message(
    ctx: &mut Context,
    flushed: &mut [bool; 2],
    msg: Message,
) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Shutdown { .. })
        | Message::Unit(UnitEvent::PortSettingsChanged { .. }) => Ok(Outcome::Defer(msg)),
        Message::Command(Command::Flush) => {
            debug!("[{}] flush already in progress", ctx.name());
            Ok(Outcome::Handled)
        }
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::Flush(FlushTarget::Port(port)))) => {
            if flushed[port.slot()] {
                return Err(EngineError::Protocol(format!(
                    "{} port reported flush completion twice",
                    port
                )));
            }
            flushed[port.slot()] = true;
            finish_if_reclaimed(ctx, flushed)
        }
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::Flush(FlushTarget::All))) => {
            finish_if_reclaimed(ctx, flushed)
        }
        msg if base::is_buffer_message(&msg) => {
            match base::on_message(State::Flushing { flushed: *flushed }, ctx, msg)? {
                Outcome::Handled => finish_if_reclaimed(ctx, flushed),
                other => Ok(other),
            }
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}

fn finish_if_reclaimed(ctx: &mut Context, flushed: &[bool; 2]) -> Result<Outcome, EngineError> {
    if !flushed.iter().all(|done| *done) || !ctx.all_buffers_reclaimed() {
        return Ok(Outcome::Handled);
    }

    debug!("[{}] flush complete", ctx.name());
    ctx.notify(Notification::FlushCompleted);
    for port in PortIndex::ALL {
        ctx.port_mut(port).eos = false;
    }
    ctx.input_eos_result = StreamResult::Ok;
    Ok(Outcome::Goto(State::Executing))
}
