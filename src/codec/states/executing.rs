use tracing::{debug, warn};

use crate::codec::{
    context::Context,
    message::{Command, Message},
    state::State,
    states::Outcome,
};
use crate::common::{errors::EngineError, types::PortIndex};
use crate::hardware::{
    FlushTarget, Parameter, SettingsIndex, UnitCommand, UnitEvent, UnitState,
};

/// Start buffers circulating: every free output buffer goes to the unit and
/// the producer is asked to fill the first input buffer.
pub(crate) fn resume(ctx: &mut Context) -> Result<(), EngineError> {
    if ctx.executing_active {
        debug!("[{}] already active", ctx.name());
        return Ok(());
    }

    ctx.submit_output_buffers()?;
    if ctx.port(PortIndex::Input).is_empty() {
        return Err(EngineError::Protocol(
            "resuming without input buffers".to_string(),
        ));
    }
    ctx.post_fill_this_buffer(0)?;

    ctx.executing_active = true;
    Ok(())
}

pub(super) fn on_message(ctx: &mut Context, msg: Message) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Shutdown { keep_session_alive }) => {
            ctx.shutdown_in_progress = true;
            ctx.keep_session_alive = keep_session_alive;
            ctx.executing_active = false;
            ctx.unit
                .send_command(UnitCommand::SetState(UnitState::Idle))?;
            Ok(Outcome::Goto(State::ExecutingToIdle { unit_idle: false }))
        }
        Message::Command(Command::Flush) => {
            ctx.executing_active = false;
            ctx.pending_input.clear();
            if let Some(trimmer) = ctx.skip_cut.as_mut() {
                trimmer.clear();
            }
            ctx.unit
                .send_command(UnitCommand::Flush(FlushTarget::All))?;
            Ok(Outcome::Goto(State::Flushing {
                flushed: [false; 2],
            }))
        }
        Message::Command(Command::Resume) => {
            resume(ctx)?;
            Ok(Outcome::Handled)
        }
        Message::Command(Command::RequestKeyframe) => {
            if ctx.is_encoder() {
                ctx.unit.set_parameter(Parameter::RequestKeyframe)?;
            } else {
                warn!("[{}] keyframe requests only apply to encoders", ctx.name());
            }
            Ok(Outcome::Handled)
        }
        Message::Command(Command::SetBitrate(bitrate)) => {
            ctx.unit.set_parameter(Parameter::Bitrate(bitrate))?;
            Ok(Outcome::Handled)
        }
        Message::Command(Command::SetKeyframeInterval(seconds)) => {
            ctx.unit
                .set_parameter(Parameter::IFrameInterval(seconds))?;
            Ok(Outcome::Handled)
        }
        Message::Unit(UnitEvent::PortSettingsChanged {
            port: PortIndex::Output,
            index,
        }) => on_output_settings_changed(ctx, index),
        Message::Unit(UnitEvent::BufferFlag { .. }) => Ok(Outcome::Handled),
        other => Ok(Outcome::Unhandled(other)),
    }
}

fn on_output_settings_changed(
    ctx: &mut Context,
    index: SettingsIndex,
) -> Result<Outcome, EngineError> {
    match index {
        SettingsIndex::Unspecified | SettingsIndex::PortDefinition => {
            debug!("[{}] output port definition changed", ctx.name());
            ctx.unit
                .send_command(UnitCommand::DisablePort(PortIndex::Output))?;
            ctx.free_output_buffers_not_owned_by_unit()?;
            Ok(Outcome::Goto(State::OutputPortSettingsChanged))
        }
        SettingsIndex::OutputCrop => {
            ctx.sent_format = false;
            Ok(Outcome::Handled)
        }
        SettingsIndex::Other(index) => {
            debug!("[{}] ignoring output settings change {:#x}", ctx.name(), index);
            Ok(Outcome::Handled)
        }
    }
}
