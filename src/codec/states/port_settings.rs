use tracing::debug;

use crate::codec::{
    context::Context,
    message::{Command, Message},
    state::State,
    states::Outcome,
};
use crate::common::{errors::EngineError, types::PortIndex};
use crate::hardware::{UnitCommand, UnitEvent};

pub(super) fn on_message(ctx: &mut Context, msg: Message) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Flush | Command::Shutdown { .. } | Command::Resume) => {
            Ok(Outcome::Defer(msg))
        }
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::DisablePort(PortIndex::Output))) => {
            on_output_disabled(ctx)
        }
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::EnablePort(PortIndex::Output))) => {
            debug!("[{}] output port enabled", ctx.name());
            ctx.sent_format = false;
            if ctx.executing_active {
                ctx.submit_output_buffers()?;
            }
            Ok(Outcome::Goto(State::Executing))
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}

/// Rebuild the output port against the new definition. A port that cannot
/// be rebuilt forces a full shutdown.
fn on_output_disabled(ctx: &mut Context) -> Result<Outcome, EngineError> {
    let remaining = ctx.port(PortIndex::Output).len();
    if remaining != 0 {
        return Err(EngineError::Protocol(format!(
            "output port disabled with {} buffers still registered",
            remaining
        )));
    }

    debug!("[{}] output port disabled, reallocating", ctx.name());
    ctx.unit
        .send_command(UnitCommand::EnablePort(PortIndex::Output))?;

    if let Err(e) = ctx.allocate_buffers_on_port(PortIndex::Output) {
        ctx.signal_error(&e);
        ctx.discard_buffers();
        ctx.shutdown_in_progress = true;
        ctx.keep_session_alive = false;
        return Ok(Outcome::Goto(State::Loaded));
    }
    Ok(Outcome::Handled)
}
