use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{BufferId, PortIndex};

/// Error codes a hardware unit can report, either synchronously from a call or
/// asynchronously through an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitErrorCode {
    Undefined,
    ComponentNotFound,
    InsufficientResources,
    BadParameter,
    UnsupportedIndex,
    UnsupportedSetting,
    IncorrectStateOperation,
    StreamCorrupt,
    Hardware,
    Other(u32),
}

impl std::fmt::Display for UnitErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::ComponentNotFound => write!(f, "component not found"),
            Self::InsufficientResources => write!(f, "insufficient resources"),
            Self::BadParameter => write!(f, "bad parameter"),
            Self::UnsupportedIndex => write!(f, "unsupported index"),
            Self::UnsupportedSetting => write!(f, "unsupported setting"),
            Self::IncorrectStateOperation => write!(f, "incorrect state operation"),
            Self::StreamCorrupt => write!(f, "stream corrupt"),
            Self::Hardware => write!(f, "hardware failure"),
            Self::Other(v) => write!(f, "vendor error {:#010x}", v),
        }
    }
}

/// A hardware unit call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {code}")]
pub struct UnitError {
    pub operation: &'static str,
    pub code: UnitErrorCode,
}

impl UnitError {
    pub fn new(operation: &'static str, code: UnitErrorCode) -> Self {
        Self { operation, code }
    }
}

/// A presentation surface call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("surface is disconnected")]
    Disconnected,
    #[error("timed out waiting for a free surface buffer")]
    Timeout,
    #[error("surface is not authenticated for protected content")]
    NotAuthenticated,
    #[error("surface rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

/// Invalid or incomplete configuration, detected before any hardware call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required field `{field}` for {mime}")]
    MissingField { field: &'static str, mime: String },
    #[error("unsupported mime type `{0}`")]
    UnsupportedMime(String),
    #[error("`{mime}` cannot be used as {role}")]
    UnsupportedRole { mime: String, role: &'static str },
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Everything the engine actor can run into while handling a message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("hardware unit error: {0}")]
    Unit(#[from] UnitError),

    #[error("presentation surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// Buffer memory or surface negotiation could not be satisfied.
    #[error("resource error: {0}")]
    Resource(String),

    /// An access unit does not fit a hardware buffer and the unit cannot take
    /// multi-part submissions.
    #[error("input of {size} bytes exceeds buffer capacity {capacity} and the unit does not accept partial frames")]
    InputTooLarge { size: usize, capacity: usize },

    #[error("unknown buffer {id} on {port} port")]
    UnknownBuffer { port: PortIndex, id: BufferId },

    /// An invariant about states or ownership tags was broken.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The client issued commands in an order the engine cannot honour.
    #[error("usage error: {0}")]
    Usage(String),

    #[error("engine is no longer running")]
    Stopped,
}

impl EngineError {
    /// Whether this error means the engine's invariants can no longer be
    /// trusted. Fatal errors stop the actor.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownBuffer { .. } | Self::Protocol(_) | Self::Usage(_)
        )
    }

    /// Client-visible code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) | Self::InputTooLarge { .. } | Self::Usage(_) | Self::Stopped => {
                ErrorCode::InvalidOperation
            }
            Self::Unit(e) => ErrorCode::from(e.code),
            Self::Surface(_) | Self::Resource(_) => ErrorCode::InsufficientResources,
            Self::UnknownBuffer { .. } | Self::Protocol(_) => ErrorCode::Protocol,
        }
    }
}

/// Error code delivered to the client in an `error` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Unknown,
    UnsupportedVideo,
    UnsupportedAudio,
    ComponentNotFound,
    InsufficientResources,
    InvalidOperation,
    Protocol,
}

impl From<UnitErrorCode> for ErrorCode {
    fn from(code: UnitErrorCode) -> Self {
        match code {
            UnitErrorCode::ComponentNotFound => Self::ComponentNotFound,
            UnitErrorCode::InsufficientResources => Self::InsufficientResources,
            UnitErrorCode::IncorrectStateOperation => Self::InvalidOperation,
            _ => Self::Unknown,
        }
    }
}

/// What kind of media session is running, used to classify unit errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaKind {
    pub is_video: bool,
    pub is_encoder: bool,
}

impl MediaKind {
    /// Map an asynchronous hardware error to the code the client sees.
    ///
    /// Some unit errors mean "this stream cannot be handled" rather than a
    /// generic failure, depending on the media type of the session.
    pub fn classify(self, code: UnitErrorCode) -> ErrorCode {
        match code {
            UnitErrorCode::StreamCorrupt if self.is_video && self.is_encoder => {
                ErrorCode::UnsupportedVideo
            }
            UnitErrorCode::BadParameter if self.is_video && !self.is_encoder => {
                ErrorCode::UnsupportedVideo
            }
            UnitErrorCode::BadParameter if !self.is_video && !self.is_encoder => {
                ErrorCode::UnsupportedAudio
            }
            other => ErrorCode::from(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_DECODER: MediaKind = MediaKind {
        is_video: true,
        is_encoder: false,
    };
    const AUDIO_DECODER: MediaKind = MediaKind {
        is_video: false,
        is_encoder: false,
    };
    const VIDEO_ENCODER: MediaKind = MediaKind {
        is_video: true,
        is_encoder: true,
    };

    #[test]
    fn bad_parameter_is_unsupported_format_for_decoders() {
        assert_eq!(
            VIDEO_DECODER.classify(UnitErrorCode::BadParameter),
            ErrorCode::UnsupportedVideo
        );
        assert_eq!(
            AUDIO_DECODER.classify(UnitErrorCode::BadParameter),
            ErrorCode::UnsupportedAudio
        );
        assert_eq!(
            VIDEO_ENCODER.classify(UnitErrorCode::BadParameter),
            ErrorCode::Unknown
        );
    }

    #[test]
    fn corrupt_stream_only_special_for_video_encoders() {
        assert_eq!(
            VIDEO_ENCODER.classify(UnitErrorCode::StreamCorrupt),
            ErrorCode::UnsupportedVideo
        );
        assert_eq!(
            VIDEO_DECODER.classify(UnitErrorCode::StreamCorrupt),
            ErrorCode::Unknown
        );
    }

    #[test]
    fn protocol_errors_are_fatal() {
        assert!(EngineError::Protocol("x".into()).is_fatal());
        assert!(
            EngineError::UnknownBuffer {
                port: PortIndex::Input,
                id: BufferId(7)
            }
            .is_fatal()
        );
        assert!(!EngineError::Resource("oom".into()).is_fatal());
    }
}
