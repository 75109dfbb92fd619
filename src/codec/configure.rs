//! Client-facing media format and its translation into unit parameters.
//!
//! [`MediaFormat::validate`] runs on the caller's thread and rejects missing
//! or contradictory fields before anything reaches the engine. The resulting
//! [`CodecSetup`] is applied to the unit from the Loaded state.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::constants::*;
use crate::common::{
    errors::{ConfigError, EngineError, MediaKind},
    types::PortIndex,
};
use crate::hardware::{
    AudioCoding, AudioPortFormat, HardwareUnit, ParamIndex, Parameter, PortDefinition, PortFormat,
    VideoCoding, VideoPortFormat,
};

/// Format description supplied with `configure` / `setup`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFormat {
    pub mime: String,
    pub encoder: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub stride: Option<u32>,
    pub slice_height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub bitrate: Option<u32>,
    /// Seconds between sync frames.
    pub i_frame_interval: Option<i32>,
    pub color_format: Option<u32>,
    pub channel_count: Option<u32>,
    pub sample_rate: Option<u32>,
    pub aac_profile: Option<u32>,
    pub is_adts: bool,
    pub flac_compression_level: Option<i32>,
    pub max_input_size: Option<usize>,
    pub encoder_delay: Option<u32>,
    pub encoder_padding: Option<u32>,
    pub channel_mask: Option<u32>,
    pub store_metadata_in_buffers: bool,
    pub prepend_sps_pps_to_idr: bool,
}

/// Per-codec parameters that survived validation.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecParams {
    VideoDecoder {
        coding: VideoCoding,
        width: u32,
        height: u32,
    },
    VideoEncoder {
        coding: VideoCoding,
        width: u32,
        height: u32,
        stride: u32,
        slice_height: u32,
        frame_rate: u32,
        bitrate: u32,
        i_frame_interval: i32,
        color_format: u32,
    },
    Audio {
        coding: AudioCoding,
        channels: u32,
        sample_rate: u32,
        bitrate: u32,
    },
    /// Nothing beyond the component role, e.g. MP3 and Vorbis decoders.
    RoleOnly,
}

/// A validated [`MediaFormat`].
#[derive(Debug, Clone, PartialEq)]
pub struct CodecSetup {
    pub mime: String,
    pub encoder: bool,
    pub role: &'static str,
    pub kind: MediaKind,
    pub params: CodecParams,
    pub max_input_size: Option<usize>,
    pub encoder_delay: u32,
    pub encoder_padding: u32,
    pub channel_mask: Option<u32>,
    pub store_metadata_in_buffers: bool,
    pub prepend_sps_pps_to_idr: bool,
}

fn video_coding(mime: &str) -> Option<VideoCoding> {
    let coding = match mime.to_ascii_lowercase().as_str() {
        MIME_VIDEO_AVC => VideoCoding::Avc,
        MIME_VIDEO_HEVC => VideoCoding::Hevc,
        MIME_VIDEO_MPEG4 => VideoCoding::Mpeg4,
        MIME_VIDEO_H263 => VideoCoding::H263,
        MIME_VIDEO_VP8 => VideoCoding::Vp8,
        MIME_VIDEO_VP9 => VideoCoding::Vp9,
        _ => return None,
    };
    Some(coding)
}

impl MediaFormat {
    fn require<T: Copy>(&self, field: &'static str, value: Option<T>) -> Result<T, ConfigError> {
        value.ok_or_else(|| ConfigError::MissingField {
            field,
            mime: self.mime.clone(),
        })
    }

    fn require_positive(&self, field: &'static str, value: Option<u32>) -> Result<u32, ConfigError> {
        match self.require(field, value)? {
            0 => Err(ConfigError::InvalidValue {
                field,
                reason: "must be greater than zero".to_string(),
            }),
            v => Ok(v),
        }
    }

    /// Check the format and resolve the role and codec parameters.
    pub fn validate(&self) -> Result<CodecSetup, ConfigError> {
        let entry =
            role_entry(&self.mime).ok_or_else(|| ConfigError::UnsupportedMime(self.mime.clone()))?;
        let role = if self.encoder {
            entry.encoder
        } else {
            entry.decoder
        }
        .ok_or_else(|| ConfigError::UnsupportedRole {
            mime: self.mime.clone(),
            role: if self.encoder { "encoder" } else { "decoder" },
        })?;

        let mime = entry.mime;
        let is_flac = mime == MIME_AUDIO_FLAC;
        let bitrate = if self.encoder && !is_flac {
            Some(self.require("bitrate", self.bitrate)?)
        } else {
            self.bitrate
        };

        let params = if let Some(coding) = video_coding(mime) {
            let width = self.require_positive("width", self.width)?;
            let height = self.require_positive("height", self.height)?;
            if self.encoder {
                CodecParams::VideoEncoder {
                    coding,
                    width,
                    height,
                    stride: self.stride.unwrap_or(width),
                    slice_height: self.slice_height.unwrap_or(height),
                    frame_rate: self.require_positive("frame_rate", self.frame_rate)?,
                    bitrate: bitrate.unwrap_or_default(),
                    i_frame_interval: self.require("i_frame_interval", self.i_frame_interval)?,
                    color_format: self.require("color_format", self.color_format)?,
                }
            } else {
                CodecParams::VideoDecoder {
                    coding,
                    width,
                    height,
                }
            }
        } else {
            self.audio_params(mime, bitrate.unwrap_or_default())?
        };

        Ok(CodecSetup {
            mime: mime.to_string(),
            encoder: self.encoder,
            role,
            kind: MediaKind {
                is_video: mime.starts_with("video/"),
                is_encoder: self.encoder,
            },
            params,
            max_input_size: self.max_input_size,
            encoder_delay: self.encoder_delay.unwrap_or(0),
            encoder_padding: self.encoder_padding.unwrap_or(0),
            channel_mask: self.channel_mask,
            store_metadata_in_buffers: self.encoder && self.store_metadata_in_buffers,
            prepend_sps_pps_to_idr: self.encoder && self.prepend_sps_pps_to_idr,
        })
    }

    fn audio_params(&self, mime: &str, bitrate: u32) -> Result<CodecParams, ConfigError> {
        let audio = |coding, channels, sample_rate| CodecParams::Audio {
            coding,
            channels,
            sample_rate,
            bitrate,
        };

        let params = match mime {
            MIME_AUDIO_AAC => audio(
                AudioCoding::Aac {
                    profile: self.aac_profile.unwrap_or(0),
                    adts: self.is_adts,
                },
                self.require_positive("channel_count", self.channel_count)?,
                self.require_positive("sample_rate", self.sample_rate)?,
            ),
            MIME_AUDIO_AMR_NB => audio(AudioCoding::AmrNb, 1, NARROWBAND_SAMPLE_RATE),
            MIME_AUDIO_AMR_WB => audio(AudioCoding::AmrWb, 1, WIDEBAND_SAMPLE_RATE),
            MIME_AUDIO_G711_ALAW | MIME_AUDIO_G711_MLAW => {
                let coding = if mime == MIME_AUDIO_G711_ALAW {
                    AudioCoding::G711ALaw
                } else {
                    AudioCoding::G711MuLaw
                };
                audio(
                    coding,
                    self.require_positive("channel_count", self.channel_count)?,
                    NARROWBAND_SAMPLE_RATE,
                )
            }
            MIME_AUDIO_FLAC if self.encoder => {
                let level = match self.flac_compression_level {
                    None => FLAC_DEFAULT_COMPRESSION_LEVEL,
                    Some(level) if level < 0 => {
                        warn!("FLAC compression level {} outside 0..=8, using 0", level);
                        0
                    }
                    Some(level) if level as u32 > FLAC_MAX_COMPRESSION_LEVEL => {
                        warn!("FLAC compression level {} outside 0..=8, using 8", level);
                        FLAC_MAX_COMPRESSION_LEVEL
                    }
                    Some(level) => level as u32,
                };
                audio(
                    AudioCoding::Flac {
                        compression_level: level,
                    },
                    self.require_positive("channel_count", self.channel_count)?,
                    self.require_positive("sample_rate", self.sample_rate)?,
                )
            }
            MIME_AUDIO_FLAC => audio(
                AudioCoding::Flac {
                    compression_level: FLAC_DEFAULT_COMPRESSION_LEVEL,
                },
                self.channel_count.unwrap_or(0),
                self.sample_rate.unwrap_or(0),
            ),
            MIME_AUDIO_RAW => audio(
                AudioCoding::Pcm,
                self.require_positive("channel_count", self.channel_count)?,
                self.require_positive("sample_rate", self.sample_rate)?,
            ),
            _ => CodecParams::RoleOnly,
        };
        Ok(params)
    }
}

// ── Applying a setup to the unit ─────────────────────────────────────────────

/// Read the current definition of `port`.
pub(crate) fn read_port_definition(
    unit: &mut dyn HardwareUnit,
    port: PortIndex,
) -> Result<PortDefinition, EngineError> {
    match unit.get_parameter(ParamIndex::PortDefinition(port))? {
        Parameter::PortDefinition(def) => Ok(def),
        other => Err(EngineError::Protocol(format!(
            "unit answered {} port definition query with {}",
            port,
            other.name()
        ))),
    }
}

fn update_port(
    unit: &mut dyn HardwareUnit,
    port: PortIndex,
    f: impl FnOnce(&mut PortDefinition),
) -> Result<(), EngineError> {
    let mut def = read_port_definition(unit, port)?;
    f(&mut def);
    unit.set_parameter(Parameter::PortDefinition(def))?;
    Ok(())
}

impl CodecSetup {
    /// Push role, port formats and encoder options to the unit.
    pub(crate) fn apply(&self, unit: &mut dyn HardwareUnit) -> Result<(), EngineError> {
        unit.set_parameter(Parameter::ComponentRole(self.role.to_string()))?;

        if self.store_metadata_in_buffers {
            unit.set_parameter(Parameter::StoreMetadataInBuffers {
                port: PortIndex::Input,
                enable: true,
            })?;
        }
        if self.prepend_sps_pps_to_idr {
            unit.set_parameter(Parameter::PrependSpsPpsToIdr(true))?;
        }

        match &self.params {
            CodecParams::VideoDecoder {
                coding,
                width,
                height,
            } => {
                update_port(unit, PortIndex::Input, |def| {
                    def.format = PortFormat::Video(VideoPortFormat {
                        coding: *coding,
                        ..VideoPortFormat::raw(*width, *height, 0)
                    });
                })?;
                update_port(unit, PortIndex::Output, |def| {
                    let color = def.format.video().map(|v| v.color_format).unwrap_or(0);
                    def.format = PortFormat::Video(VideoPortFormat::raw(*width, *height, color));
                })?;
            }
            CodecParams::VideoEncoder {
                coding,
                width,
                height,
                stride,
                slice_height,
                frame_rate,
                bitrate,
                i_frame_interval,
                color_format,
            } => {
                update_port(unit, PortIndex::Input, |def| {
                    def.format = PortFormat::Video(VideoPortFormat {
                        stride: *stride,
                        slice_height: *slice_height,
                        frame_rate: *frame_rate,
                        ..VideoPortFormat::raw(*width, *height, *color_format)
                    });
                })?;
                update_port(unit, PortIndex::Output, |def| {
                    def.format = PortFormat::Video(VideoPortFormat {
                        coding: *coding,
                        frame_rate: *frame_rate,
                        bitrate: *bitrate,
                        ..VideoPortFormat::raw(*width, *height, 0)
                    });
                })?;
                unit.set_parameter(Parameter::Bitrate(*bitrate))?;
                unit.set_parameter(Parameter::IFrameInterval(*i_frame_interval))?;
            }
            CodecParams::Audio {
                coding,
                channels,
                sample_rate,
                bitrate,
            } => {
                let coded = AudioPortFormat {
                    coding: *coding,
                    channels: *channels,
                    sample_rate: *sample_rate,
                    bitrate: *bitrate,
                };
                let pcm = AudioPortFormat {
                    coding: AudioCoding::Pcm,
                    bitrate: 0,
                    ..coded.clone()
                };
                let (input, output) = if self.encoder {
                    (pcm, coded)
                } else {
                    (coded, pcm)
                };
                update_port(unit, PortIndex::Input, |def| {
                    def.format = PortFormat::Audio(input)
                })?;
                update_port(unit, PortIndex::Output, |def| {
                    def.format = PortFormat::Audio(output)
                })?;
            }
            CodecParams::RoleOnly => {}
        }

        if let Some(size) = self.max_input_size {
            raise_min_buffer_size(unit, PortIndex::Input, size)?;
        }
        Ok(())
    }
}

fn raise_min_buffer_size(
    unit: &mut dyn HardwareUnit,
    port: PortIndex,
    size: usize,
) -> Result<(), EngineError> {
    let def = read_port_definition(unit, port)?;
    if def.buffer_size >= size {
        return Ok(());
    }
    debug!("raising {} buffer size {} -> {}", port, def.buffer_size, size);
    unit.set_parameter(Parameter::PortDefinition(PortDefinition {
        buffer_size: size,
        ..def
    }))?;

    let applied = read_port_definition(unit, port)?.buffer_size;
    if applied < size {
        return Err(EngineError::Resource(format!(
            "{} buffer size stuck at {} after requesting {}",
            port, applied, size
        )));
    }
    Ok(())
}
