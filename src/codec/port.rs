//! One direction of the buffer pipeline.

use crate::codec::buffer::{BufferInfo, BufferOwner};
use crate::common::{
    errors::EngineError,
    types::{BufferId, PortIndex},
};

/// What happens to a buffer right after it comes back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    /// Leave it with the engine.
    Keep,
    /// Offer it straight back to the producer (input) or the unit (output).
    Resubmit,
    /// Release it to the unit for good.
    Free,
}

/// Buffer arena of one port. Indices are allocation order and stay stable
/// until teardown; buffer ids are lookup keys into it.
#[derive(Debug)]
pub struct Port {
    index: PortIndex,
    buffers: Vec<BufferInfo>,
    pub eos: bool,
    /// Every ownership change applied on this port, oldest first.
    #[cfg(test)]
    journal: Vec<(BufferId, BufferOwner, BufferOwner)>,
}

impl Port {
    pub fn new(index: PortIndex) -> Self {
        Self {
            index,
            buffers: Vec::new(),
            eos: false,
            #[cfg(test)]
            journal: Vec::new(),
        }
    }

    pub fn index(&self) -> PortIndex {
        self.index
    }

    pub fn buffers(&self) -> &[BufferInfo] {
        &self.buffers
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn push(&mut self, info: BufferInfo) -> Result<usize, EngineError> {
        if self.position(info.id).is_some() {
            return Err(EngineError::Protocol(format!(
                "duplicate {} buffer id {}",
                self.index, info.id
            )));
        }
        self.buffers.push(info);
        Ok(self.buffers.len() - 1)
    }

    pub fn position(&self, id: BufferId) -> Option<usize> {
        self.buffers.iter().position(|b| b.id == id)
    }

    /// Index of `id`, or a protocol error for a handle we never allocated.
    pub fn find(&self, id: BufferId) -> Result<usize, EngineError> {
        self.position(id).ok_or(EngineError::UnknownBuffer {
            port: self.index,
            id,
        })
    }

    pub fn get(&self, idx: usize) -> &BufferInfo {
        &self.buffers[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut BufferInfo {
        &mut self.buffers[idx]
    }

    pub fn remove(&mut self, idx: usize) -> BufferInfo {
        self.buffers.remove(idx)
    }

    /// Drop every record without touching the unit.
    pub fn drain(&mut self) -> Vec<BufferInfo> {
        std::mem::take(&mut self.buffers)
    }

    pub fn count_owned_by(&self, owner: BufferOwner) -> usize {
        self.buffers.iter().filter(|b| b.owner() == owner).count()
    }

    pub fn all_reclaimed(&self) -> bool {
        self.buffers.iter().all(|b| b.owner().is_reclaimed())
    }

    /// Transition buffer `idx` to `to`.
    pub fn transition(&mut self, idx: usize, to: BufferOwner) -> Result<(), EngineError> {
        let index = self.index;
        let info = &mut self.buffers[idx];
        #[cfg(test)]
        let from = info.owner();
        info.transition(index, to)?;
        #[cfg(test)]
        self.journal.push((info.id, from, to));
        Ok(())
    }

    #[cfg(test)]
    pub fn journal(&self) -> &[(BufferId, BufferOwner, BufferOwner)] {
        &self.journal
    }

    /// Last buffer currently free for the engine to hand out.
    pub fn last_owned_by_us(&self) -> Option<usize> {
        self.buffers
            .iter()
            .rposition(|b| b.owner() == BufferOwner::OwnedByUs)
    }
}
