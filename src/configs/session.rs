use serde::{Deserialize, Serialize};

use crate::codec::MediaFormat;
use crate::hardware::LoopbackConfig;

/// What the demo runner feeds through the engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Explicit component to allocate. When unset the unit is asked for
    /// every component matching `format.mime`.
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default = "default_format")]
    pub format: MediaFormat,
    #[serde(default = "default_access_units")]
    pub access_units: usize,
    #[serde(default = "default_access_unit_size")]
    pub access_unit_size: usize,
    /// Timestamp step between generated access units.
    #[serde(default = "default_frame_duration_us")]
    pub frame_duration_us: i64,
    /// Back the output port with an in-memory presentation surface.
    #[serde(default)]
    pub use_surface: bool,
    #[serde(default = "default_true")]
    pub auto_run: bool,
    #[serde(default)]
    pub loopback: LoopbackConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            component: None,
            format: default_format(),
            access_units: default_access_units(),
            access_unit_size: default_access_unit_size(),
            frame_duration_us: default_frame_duration_us(),
            use_surface: false,
            auto_run: true,
            loopback: LoopbackConfig::default(),
        }
    }
}

fn default_format() -> MediaFormat {
    MediaFormat {
        mime: "video/avc".to_string(),
        width: Some(320),
        height: Some(240),
        ..MediaFormat::default()
    }
}

fn default_access_units() -> usize {
    30
}

fn default_access_unit_size() -> usize {
    4_096
}

fn default_frame_duration_us() -> i64 {
    33_333
}

fn default_true() -> bool {
    true
}
