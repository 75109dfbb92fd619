//! Buffer records and the ownership protocol.

use serde::Serialize;

use crate::common::{
    errors::EngineError,
    types::{BufferFlags, BufferId, GraphicHandle, PortIndex},
};

/// The party currently responsible for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BufferOwner {
    /// Free and available to the engine.
    OwnedByUs,
    /// Handed to the producer, waiting to be filled.
    OwnedByUpstream,
    /// Submitted to the hardware unit.
    OwnedByHardware,
    /// Delivered to the consumer, waiting for a release or render decision.
    OwnedByDownstream,
    /// Queued to the presentation surface.
    OwnedBySurface,
    /// The surface could not take it back; never reused.
    OwnedByUnexpected,
}

impl BufferOwner {
    pub const ALL: [BufferOwner; 6] = [
        Self::OwnedByUs,
        Self::OwnedByUpstream,
        Self::OwnedByHardware,
        Self::OwnedByDownstream,
        Self::OwnedBySurface,
        Self::OwnedByUnexpected,
    ];

    /// Whether `self -> to` is an edge of the ownership protocol on `port`.
    pub fn can_transition(self, port: PortIndex, to: BufferOwner) -> bool {
        use BufferOwner::*;

        match port {
            PortIndex::Input => matches!(
                (self, to),
                (OwnedByUs, OwnedByUpstream)
                    | (OwnedByUpstream, OwnedByUs)
                    | (OwnedByUpstream, OwnedByHardware)
                    | (OwnedByUs, OwnedByHardware)
                    | (OwnedByHardware, OwnedByUs)
            ),
            PortIndex::Output => matches!(
                (self, to),
                (OwnedByUs, OwnedByHardware)
                    | (OwnedByHardware, OwnedByDownstream)
                    | (OwnedByHardware, OwnedByUs)
                    | (OwnedByDownstream, OwnedByUs)
                    | (OwnedByDownstream, OwnedBySurface)
                    | (OwnedBySurface, OwnedByUs)
                    | (OwnedByUs, OwnedBySurface)
                    | (OwnedByUs, OwnedByUnexpected)
            ),
        }
    }

    /// Tags under which the engine may tear a buffer down: nothing else is
    /// going to hand it back.
    pub fn is_reclaimed(self) -> bool {
        matches!(
            self,
            Self::OwnedByUs | Self::OwnedBySurface | Self::OwnedByUnexpected
        )
    }
}

/// Backing memory of a buffer.
#[derive(Debug)]
pub enum BufferMemory {
    /// Engine-side heap memory, taken from the byte pool.
    Heap(Vec<u8>),
    /// A graphics buffer owned by the presentation surface.
    Graphic(GraphicHandle),
}

/// One buffer of a port.
#[derive(Debug)]
pub struct BufferInfo {
    pub id: BufferId,
    pub capacity: usize,
    pub memory: BufferMemory,
    owner: BufferOwner,
    /// Valid bytes after the last fill: (offset, length).
    pub range: (usize, usize),
    pub timestamp_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn heap(id: BufferId, capacity: usize, memory: Vec<u8>) -> Self {
        Self::with_memory(id, capacity, BufferMemory::Heap(memory))
    }

    pub fn graphic(id: BufferId, capacity: usize, handle: GraphicHandle) -> Self {
        Self::with_memory(id, capacity, BufferMemory::Graphic(handle))
    }

    fn with_memory(id: BufferId, capacity: usize, memory: BufferMemory) -> Self {
        Self {
            id,
            capacity,
            memory,
            owner: BufferOwner::OwnedByUs,
            range: (0, 0),
            timestamp_us: 0,
            flags: BufferFlags::NONE,
        }
    }

    #[inline]
    pub fn owner(&self) -> BufferOwner {
        self.owner
    }

    pub fn graphic_handle(&self) -> Option<GraphicHandle> {
        match self.memory {
            BufferMemory::Graphic(handle) => Some(handle),
            BufferMemory::Heap(_) => None,
        }
    }

    /// Move the buffer to `to`, rejecting edges outside the protocol.
    pub fn transition(&mut self, port: PortIndex, to: BufferOwner) -> Result<(), EngineError> {
        if !self.owner.can_transition(port, to) {
            return Err(EngineError::Protocol(format!(
                "illegal {} buffer {} transition {:?} -> {:?}",
                port, self.id, self.owner, to
            )));
        }
        self.owner = to;
        Ok(())
    }

    /// Require the buffer to currently be `expected`.
    pub fn expect_owner(&self, port: PortIndex, expected: BufferOwner) -> Result<(), EngineError> {
        if self.owner != expected {
            return Err(EngineError::Protocol(format!(
                "{} buffer {} is {:?}, expected {:?}",
                port, self.id, self.owner, expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_never_reaches_downstream() {
        for from in BufferOwner::ALL {
            assert!(!from.can_transition(PortIndex::Input, BufferOwner::OwnedByDownstream));
            assert!(!from.can_transition(PortIndex::Input, BufferOwner::OwnedBySurface));
        }
    }

    #[test]
    fn output_round_trip_through_surface() {
        let mut info = BufferInfo::graphic(BufferId(1), 0, GraphicHandle(9));
        let port = PortIndex::Output;
        info.transition(port, BufferOwner::OwnedByHardware).unwrap();
        info.transition(port, BufferOwner::OwnedByDownstream).unwrap();
        info.transition(port, BufferOwner::OwnedBySurface).unwrap();
        info.transition(port, BufferOwner::OwnedByUs).unwrap();
        assert_eq!(info.owner(), BufferOwner::OwnedByUs);
    }

    #[test]
    fn illegal_edge_is_a_protocol_error() {
        let mut info = BufferInfo::heap(BufferId(2), 16, Vec::new());
        let err = info
            .transition(PortIndex::Output, BufferOwner::OwnedByDownstream)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(info.owner(), BufferOwner::OwnedByUs);
    }
}
