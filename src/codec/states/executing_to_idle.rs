use tracing::debug;

use crate::codec::{
    context::Context,
    message::{Command, Message},
    state::State,
    states::{Outcome, base},
};
use crate::common::{errors::EngineError, types::PortIndex};
use crate::hardware::{UnitCommand, UnitEvent, UnitState};

pub(super) fn on_message(
    ctx: &mut Context,
    unit_idle: &mut bool,
    msg: Message,
) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Shutdown { .. }) => {
            debug!("[{}] already shutting down", ctx.name());
            Ok(Outcome::Handled)
        }
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::SetState(UnitState::Idle))) => {
            *unit_idle = true;
            finish_if_reclaimed(ctx, *unit_idle)
        }
        Message::Unit(UnitEvent::PortSettingsChanged { .. } | UnitEvent::BufferFlag { .. }) => {
            Ok(Outcome::Handled)
        }
        msg if base::is_buffer_message(&msg) => {
            match base::on_message(State::ExecutingToIdle { unit_idle: *unit_idle }, ctx, msg)? {
                Outcome::Handled => finish_if_reclaimed(ctx, *unit_idle),
                other => Ok(other),
            }
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}

/// Once the unit is idle and every buffer is back, free both ports and ask
/// the unit to unload.
fn finish_if_reclaimed(ctx: &mut Context, unit_idle: bool) -> Result<Outcome, EngineError> {
    if !unit_idle || !ctx.all_buffers_reclaimed() {
        return Ok(Outcome::Handled);
    }

    ctx.unit
        .send_command(UnitCommand::SetState(UnitState::Loaded))?;
    ctx.free_buffers_on_port(PortIndex::Input)?;
    ctx.free_buffers_on_port(PortIndex::Output)?;

    if ctx.secure && ctx.config.blank_frames_on_secure_teardown {
        ctx.push_blank_frames();
    }
    Ok(Outcome::Goto(State::IdleToLoaded))
}
