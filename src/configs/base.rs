use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub logging: LoggingConfig,
  #[serde(default)]
  pub engine: EngineConfig,
  #[serde(default)]
  pub session: SessionConfig,
}

impl Config {
  /// Load `config.toml`, falling back to `config.default.toml`, and finally
  /// to built-in defaults when neither file exists.
  pub fn load() -> AnyResult<Self> {
    let config_path = if Path::new("config.toml").exists() {
      "config.toml"
    } else if Path::new("config.default.toml").exists() {
      "config.default.toml"
    } else {
      crate::log_println!("No configuration file found, using defaults");
      return Ok(Self::default());
    };

    crate::log_println!("Loading configuration from: {}", config_path);
    let config_str = std::fs::read_to_string(config_path)?;
    Self::parse(&config_str)
  }

  pub fn parse(config_str: &str) -> AnyResult<Self> {
    let config: Config = toml::from_str(config_str)?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_is_valid() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.engine.dequeue_timeout_ms, 1_000);
    assert!(config.engine.blank_frames_on_secure_teardown);
    assert_eq!(config.session.format.mime, "video/avc");
    assert!(config.logging.file.is_none());
  }

  #[test]
  fn sections_override_defaults() {
    let config = Config::parse(
      r#"
        [logging]
        level = "debug"

        [logging.file]
        path = "logs/hwcodec.log"

        [engine]
        max_in_flight_input = 2
        allow_partial_frames = true

        [session]
        access_units = 4
        use_surface = true

        [session.format]
        mime = "audio/mp4a-latm"
        channel_count = 2
        sample_rate = 44100
      "#,
    )
    .unwrap();

    assert_eq!(config.logging.level.as_deref(), Some("debug"));
    assert_eq!(config.logging.file.as_ref().map(|f| f.max_lines), Some(10_000));
    assert_eq!(config.engine.max_in_flight_input, Some(2));
    assert_eq!(config.engine.allow_partial_frames, Some(true));
    assert_eq!(config.session.access_units, 4);
    assert!(config.session.use_surface);
    assert_eq!(config.session.format.channel_count, Some(2));
  }
}
