use tracing::{debug, info, warn};

use crate::codec::{
    configure::CodecSetup,
    context::Context,
    message::{Command, Message},
    notify::Notification,
    state::State,
    states::Outcome,
};
use crate::common::errors::EngineError;
use crate::hardware::{ParamIndex, Parameter, UnitCommand, UnitEvent, UnitState, query_optional};
use crate::surface::BoxedSurface;

pub(super) fn entered(ctx: &mut Context) -> Result<Option<State>, EngineError> {
    ctx.reset_stream();
    if !ctx.shutdown_in_progress {
        return Ok(None);
    }
    let keep = ctx.keep_session_alive;
    ctx.shutdown_in_progress = false;
    ctx.keep_session_alive = false;
    Ok(on_shutdown(ctx, keep))
}

pub(super) fn on_message(ctx: &mut Context, msg: Message) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Configure { setup, surface }) => {
            configure(ctx, *setup, surface);
            Ok(Outcome::Handled)
        }
        Message::Command(Command::Start) => {
            ctx.unit
                .send_command(UnitCommand::SetState(UnitState::Idle))?;
            Ok(Outcome::Goto(State::LoadedToIdle))
        }
        Message::Command(Command::Shutdown { keep_session_alive }) => {
            Ok(on_shutdown(ctx, keep_session_alive).into())
        }
        Message::Command(Command::Flush) => {
            ctx.notify(Notification::FlushCompleted);
            Ok(Outcome::Handled)
        }
        Message::Unit(UnitEvent::CommandComplete(UnitCommand::SetState(state))) => {
            warn!("[{}] late {:?} completion in Loaded, ignoring", ctx.name(), state);
            Ok(Outcome::Handled)
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}

/// Release the session unless asked to keep it, then acknowledge.
fn on_shutdown(ctx: &mut Context, keep_session_alive: bool) -> Option<State> {
    let next = if keep_session_alive {
        None
    } else {
        if let Err(e) = ctx.unit.release_session() {
            warn!("[{}] releasing session: {}", ctx.name(), e);
        }
        info!("[{}] session released", ctx.name());
        Some(State::Uninitialized)
    };
    ctx.notify(Notification::ShutdownCompleted);
    next
}

fn configure(ctx: &mut Context, setup: CodecSetup, surface: Option<BoxedSurface>) {
    if let Err(e) = setup.apply(ctx.unit.as_mut()) {
        ctx.signal_error(&e);
        return;
    }

    let partial_frames = match ctx.config.allow_partial_frames {
        Some(allowed) => allowed,
        None => matches!(
            query_optional(ctx.unit.as_mut(), ParamIndex::PartialFrames),
            Ok(Some(Parameter::PartialFrames(true)))
        ),
    };
    debug!(
        "[{}] configured as {} (partial frames: {}, surface: {})",
        ctx.name(),
        setup.role,
        partial_frames,
        surface.is_some()
    );

    ctx.partial_frames = partial_frames;
    ctx.surface = surface;
    ctx.setup = Some(setup);
    ctx.configured = true;
    ctx.notify(Notification::SessionConfigured);
}
