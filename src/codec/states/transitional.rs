//! States that only wait for the unit to finish a state change.

use tracing::debug;

use crate::codec::{
    context::Context,
    message::{Command, Message},
    state::State,
    states::{Outcome, resume},
};
use crate::common::{errors::EngineError, types::PortIndex};
use crate::hardware::{UnitCommand, UnitEvent, UnitState};

/// Allocate both ports. On failure the error is reported, whatever was
/// allocated is freed and the engine falls back to Loaded.
pub(super) fn entered_loaded_to_idle(ctx: &mut Context) -> Option<State> {
    let allocated = ctx
        .allocate_buffers_on_port(PortIndex::Input)
        .and_then(|_| ctx.allocate_buffers_on_port(PortIndex::Output));

    match allocated {
        Ok(()) => None,
        Err(e) => {
            ctx.signal_error(&e);
            ctx.discard_buffers();
            Some(State::Loaded)
        }
    }
}

pub(super) fn loaded_to_idle(ctx: &mut Context, msg: Message) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Flush | Command::Shutdown { .. }) => Ok(Outcome::Defer(msg)),
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::SetState(UnitState::Idle))) => {
            ctx.unit
                .send_command(UnitCommand::SetState(UnitState::Executing))?;
            Ok(Outcome::Goto(State::IdleToExecuting))
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}

pub(super) fn idle_to_executing(ctx: &mut Context, msg: Message) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Flush | Command::Shutdown { .. }) => Ok(Outcome::Defer(msg)),
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::SetState(UnitState::Executing))) => {
            resume(ctx)?;
            Ok(Outcome::Goto(State::Executing))
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}

pub(super) fn idle_to_loaded(ctx: &mut Context, msg: Message) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Shutdown { .. }) => {
            debug!("[{}] already shutting down", ctx.name());
            Ok(Outcome::Handled)
        }
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::SetState(UnitState::Loaded))) => {
            Ok(Outcome::Goto(State::Loaded))
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}
