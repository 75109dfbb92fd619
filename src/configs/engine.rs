use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the codec engine actor.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Mailbox depth above which posting a message logs a warning.
    #[serde(default = "default_mailbox_warn_depth")]
    pub mailbox_warn_depth: usize,
    /// Cap on input buffers held by the hardware unit at once. Unset means
    /// every free input buffer is offered upstream.
    #[serde(default)]
    pub max_in_flight_input: Option<usize>,
    /// Overrides the unit's own answer to "can you take partial frames".
    #[serde(default)]
    pub allow_partial_frames: Option<bool>,
    #[serde(default = "default_true")]
    pub blank_frames_on_secure_teardown: bool,
    /// Upper bound on a single surface dequeue.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
}

impl EngineConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_warn_depth: default_mailbox_warn_depth(),
            max_in_flight_input: None,
            allow_partial_frames: None,
            blank_frames_on_secure_teardown: true,
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
        }
    }
}

fn default_mailbox_warn_depth() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_dequeue_timeout_ms() -> u64 {
    1_000
}
