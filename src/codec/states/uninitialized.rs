use tracing::{Level, debug, info, span, warn};
use uuid::Uuid;

use crate::codec::{
    constants::SECURE_SUFFIX,
    context::Context,
    message::{Command, ComponentTarget, Message},
    notify::Notification,
    state::State,
    states::Outcome,
};
use crate::common::errors::{EngineError, UnitError, UnitErrorCode};

pub(super) fn on_message(ctx: &mut Context, msg: Message) -> Result<Outcome, EngineError> {
    match msg {
        Message::Command(Command::Allocate(target)) => {
            if allocate_session(ctx, &target)? {
                Ok(Outcome::Goto(State::Loaded))
            } else {
                Ok(Outcome::Handled)
            }
        }
        Message::Command(Command::Shutdown { keep_session_alive }) => {
            if keep_session_alive {
                warn!("no session to keep alive, shutting down anyway");
            }
            ctx.notify(Notification::ShutdownCompleted);
            Ok(Outcome::Handled)
        }
        Message::Command(Command::Flush) => {
            ctx.notify(Notification::FlushCompleted);
            Ok(Outcome::Handled)
        }
        other => Ok(Outcome::Unhandled(other)),
    }
}

/// Bind a unit session for `target`, trying every candidate component in
/// order. Reports `ComponentNotFound` and returns `false` when none binds.
fn allocate_session(ctx: &mut Context, target: &ComponentTarget) -> Result<bool, EngineError> {
    let candidates = match target {
        ComponentTarget::Named(name) => vec![name.clone()],
        ComponentTarget::ByMime { mime, encoder } => ctx.unit.find_components(mime, *encoder),
    };
    debug!("allocating session, candidates {:?}", candidates);

    let sink = ctx.event_sink();
    let mut bound = None;
    for component in candidates {
        let _span = span!(Level::DEBUG, "allocate_session", component = %component).entered();
        match ctx.unit.allocate_session(&component, sink.clone()) {
            Ok(()) => {
                bound = Some(component);
                break;
            }
            Err(e) => warn!("could not allocate {}: {}", component, e),
        }
    }

    let Some(component) = bound else {
        ctx.signal_error(&EngineError::Unit(UnitError::new(
            "allocate_session",
            UnitErrorCode::ComponentNotFound,
        )));
        return Ok(false);
    };

    let session_id = Uuid::new_v4();
    info!("[{}] session {} allocated", component, session_id);

    ctx.secure = component.ends_with(SECURE_SUFFIX);
    ctx.session_id = Some(session_id);
    ctx.component = Some(component.clone());
    ctx.reset_stream();
    ctx.notify(Notification::SessionAllocated { component });
    Ok(true)
}
