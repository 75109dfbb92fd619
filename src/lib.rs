//! Lifecycle and buffer-ownership engine for asynchronous hardware codecs.
//!
//! [`codec`] holds the engine itself; [`hardware`] and [`surface`] define the
//! two collaborators it drives, each with an in-process implementation used by
//! the runner and the tests.

pub mod buffer;
pub mod codec;
pub mod common;
pub mod configs;
pub mod hardware;
pub mod surface;
