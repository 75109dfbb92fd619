//! Lifecycle states of the engine.

use crate::codec::port::PortMode;
use crate::common::types::PortIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No hardware session bound.
    Uninitialized,
    /// Session bound, no buffers.
    Loaded,
    /// Buffers allocated, waiting for the unit to reach Idle.
    LoadedToIdle,
    /// Waiting for the unit to reach Executing.
    IdleToExecuting,
    Executing,
    /// Output port being torn down and rebuilt after a format change.
    OutputPortSettingsChanged,
    /// Draining towards Idle for a shutdown.
    ExecutingToIdle { unit_idle: bool },
    /// Buffers freed, waiting for the unit to reach Loaded.
    IdleToLoaded,
    /// Waiting for both ports to report flush completion.
    Flushing { flushed: [bool; 2] },
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Loaded => "Loaded",
            Self::LoadedToIdle => "LoadedToIdle",
            Self::IdleToExecuting => "IdleToExecuting",
            Self::Executing => "Executing",
            Self::OutputPortSettingsChanged => "OutputPortSettingsChanged",
            Self::ExecutingToIdle { .. } => "ExecutingToIdle",
            Self::IdleToLoaded => "IdleToLoaded",
            Self::Flushing { .. } => "Flushing",
        }
    }

    /// Policy for buffers returning to the engine on `port`.
    pub fn port_mode(&self, port: PortIndex) -> PortMode {
        match (self, port) {
            (Self::Executing, _) => PortMode::Resubmit,
            (Self::OutputPortSettingsChanged, PortIndex::Output) => PortMode::Free,
            (Self::OutputPortSettingsChanged, PortIndex::Input) => PortMode::Resubmit,
            _ => PortMode::Keep,
        }
    }

    /// States that can act on anything a transitional state deferred.
    pub fn replays_deferred(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Loaded | Self::Executing)
    }

    /// Whether buffers may exist on the ports in this state.
    pub fn has_buffers(&self) -> bool {
        !matches!(self, Self::Uninitialized | Self::Loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_executing_resubmits_both_ports() {
        for port in PortIndex::ALL {
            assert_eq!(State::Executing.port_mode(port), PortMode::Resubmit);
            assert_eq!(
                State::Flushing { flushed: [false; 2] }.port_mode(port),
                PortMode::Keep
            );
            assert_eq!(
                State::ExecutingToIdle { unit_idle: false }.port_mode(port),
                PortMode::Keep
            );
        }
        assert_eq!(
            State::OutputPortSettingsChanged.port_mode(PortIndex::Output),
            PortMode::Free
        );
    }
}
