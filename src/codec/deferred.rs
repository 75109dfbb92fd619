use std::collections::VecDeque;

use crate::codec::message::{Command, Message};

/// Messages a transitional state could not act on, kept in arrival order.
#[derive(Default)]
pub struct DeferredQueue {
    queue: VecDeque<Message>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.queue.push_back(msg);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take everything queued so far. Messages deferred again while the
    /// batch is replayed land in a fresh queue behind it.
    pub fn take(&mut self) -> VecDeque<Message> {
        std::mem::take(&mut self.queue)
    }

    pub fn has_shutdown(&self) -> bool {
        self.queue
            .iter()
            .any(|m| matches!(m, Message::Command(Command::Shutdown { .. })))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.queue.iter().map(Message::name).collect()
    }
}
