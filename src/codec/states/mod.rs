//! Per-state message handling.
//!
//! Every handler takes the [`Context`] explicitly and answers with an
//! [`Outcome`]; the engine owns the current [`State`] and performs the
//! transition. Messages a state does not recognise fall through to the
//! handlers in [`base`], which drive buffer circulation according to the
//! state's port mode.

mod base;
mod executing;
mod executing_to_idle;
mod flushing;
mod loaded;
mod port_settings;
mod transitional;
mod uninitialized;

pub(crate) use executing::resume;

use crate::codec::{context::Context, message::Message, state::State};
use crate::common::errors::EngineError;

/// What the engine should do after a state looked at a message.
pub(crate) enum Outcome {
    Handled,
    /// Neither the state nor the common handlers had a use for it.
    Unhandled(Message),
    /// Keep it until a state that can act on it is entered.
    Defer(Message),
    Goto(State),
}

impl From<Option<State>> for Outcome {
    fn from(next: Option<State>) -> Self {
        match next {
            Some(state) => Self::Goto(state),
            None => Self::Handled,
        }
    }
}

pub(crate) fn on_message(
    state: &mut State,
    ctx: &mut Context,
    msg: Message,
) -> Result<Outcome, EngineError> {
    let outcome = match state {
        State::Uninitialized => uninitialized::on_message(ctx, msg)?,
        State::Loaded => loaded::on_message(ctx, msg)?,
        State::LoadedToIdle => transitional::loaded_to_idle(ctx, msg)?,
        State::IdleToExecuting => transitional::idle_to_executing(ctx, msg)?,
        State::Executing => executing::on_message(ctx, msg)?,
        State::OutputPortSettingsChanged => port_settings::on_message(ctx, msg)?,
        State::ExecutingToIdle { unit_idle } => executing_to_idle::on_message(ctx, unit_idle, msg)?,
        State::IdleToLoaded => transitional::idle_to_loaded(ctx, msg)?,
        State::Flushing { flushed } => flushing::on_message(ctx, flushed, msg)?,
    };

    match outcome {
        Outcome::Unhandled(msg) => base::on_message(*state, ctx, msg),
        other => Ok(other),
    }
}

/// Side effects of entering `state`. May name a follow-up state to move to
/// straight away.
pub(crate) fn entered(state: State, ctx: &mut Context) -> Result<Option<State>, EngineError> {
    match state {
        State::Uninitialized => {
            ctx.clear_session();
            Ok(None)
        }
        State::Loaded => loaded::entered(ctx),
        State::LoadedToIdle => Ok(transitional::entered_loaded_to_idle(ctx)),
        State::ExecutingToIdle { .. } => {
            ctx.sent_format = false;
            Ok(None)
        }
        State::IdleToExecuting
        | State::Executing
        | State::OutputPortSettingsChanged
        | State::IdleToLoaded
        | State::Flushing { .. } => Ok(None),
    }
}
