//! `codec`: the engine that drives a hardware codec session.
//!
//! The engine is an actor: [`spawn_engine`] moves it onto its own thread and
//! returns an [`EngineHandle`]. Commands and replies go in through the handle,
//! unit events through the [`EventSink`] given to the unit, and everything the
//! client needs to know comes back as a [`Notification`].
//!
//! | Module | Contents |
//! |---|---|
//! | [`state`] / `states` | Lifecycle states and their message handlers |
//! | [`port`] / [`buffer`] | Buffer arenas and the ownership protocol |
//! | [`configure`] | Client media format, validation, unit setup |
//! | [`notify`] | Notifications to the client |

pub mod buffer;
pub mod configure;
pub mod constants;
pub mod context;
pub mod deferred;
pub mod engine;
pub mod format;
pub mod handle;
pub mod message;
mod native;
pub mod notify;
pub mod port;
pub mod skip_cut;
pub mod state;
mod states;

#[cfg(test)]
mod tests;

pub use buffer::{BufferInfo, BufferOwner};
pub use configure::{CodecSetup, MediaFormat};
pub use engine::Engine;
pub use format::OutputFormat;
pub use handle::{EngineHandle, spawn_engine};
pub use message::{AccessUnit, Command, ComponentTarget, EventSink, InputData, Message};
pub use notify::{Notification, StreamResult};
pub use port::{Port, PortMode};
pub use state::State;
