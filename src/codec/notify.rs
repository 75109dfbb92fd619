//! Notifications posted from the engine to its client.

use bytes::Bytes;
use flume::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::format::OutputFormat;
use crate::common::{
    errors::ErrorCode,
    types::{BufferFlags, BufferId, PortIndex},
};

/// How the input side of the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamResult {
    Ok,
    /// The producer reported a clean end of stream.
    EndOfStream,
    /// The producer failed before its stream ended.
    SourceFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferDescriptor {
    pub id: BufferId,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    SessionAllocated {
        component: String,
    },
    SessionConfigured,
    BuffersAllocated {
        port: PortIndex,
        buffers: Vec<BufferDescriptor>,
    },
    /// An input buffer is waiting for data. Answer with
    /// `EngineHandle::submit_input`.
    FillThisBuffer {
        id: BufferId,
        capacity: usize,
    },
    /// An output buffer holds data. Answer with `EngineHandle::release_output`.
    #[serde(rename_all = "camelCase")]
    DrainThisBuffer {
        id: BufferId,
        #[serde(skip)]
        data: Bytes,
        size: usize,
        flags: BufferFlags,
        timestamp_us: i64,
    },
    OutputFormatChanged {
        format: OutputFormat,
    },
    EndOfStream {
        result: StreamResult,
    },
    FlushCompleted,
    ShutdownCompleted,
    Error {
        code: ErrorCode,
        detail: String,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionAllocated { .. } => "session-allocated",
            Self::SessionConfigured => "session-configured",
            Self::BuffersAllocated { .. } => "buffers-allocated",
            Self::FillThisBuffer { .. } => "fill-this-buffer",
            Self::DrainThisBuffer { .. } => "drain-this-buffer",
            Self::OutputFormatChanged { .. } => "output-format-changed",
            Self::EndOfStream { .. } => "end-of-stream",
            Self::FlushCompleted => "flush-completed",
            Self::ShutdownCompleted => "shutdown-completed",
            Self::Error { .. } => "error",
        }
    }
}

/// Sending half of the notification channel.
pub struct Notifier {
    tx: Sender<Notification>,
}

impl Notifier {
    pub fn new(tx: Sender<Notification>) -> Self {
        Self { tx }
    }

    /// Deliver `notification`. A client that stopped listening is not an
    /// engine error.
    pub fn send(&self, notification: Notification) {
        trace!("notify {}", notification.name());
        if self.tx.send(notification).is_err() {
            debug!("notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Notification::EndOfStream {
            result: StreamResult::Ok,
        })
        .unwrap();
        assert_eq!(json["type"], "endOfStream");
        assert_eq!(json["result"], "ok");
    }

    #[test]
    fn drain_payload_is_not_serialized() {
        let json = serde_json::to_value(Notification::DrainThisBuffer {
            id: BufferId(3),
            data: Bytes::from_static(b"abc"),
            size: 3,
            flags: BufferFlags::END_OF_STREAM,
            timestamp_us: 40,
        })
        .unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["size"], 3);
        assert_eq!(json["timestampUs"], 40);
    }
}
