//! Description of the decoded output, announced to the client whenever it
//! may have changed.

use serde::Serialize;

use crate::codec::{
    configure::read_port_definition,
    constants::{MIME_AUDIO_RAW, MIME_VIDEO_RAW},
};
use crate::common::{
    errors::EngineError,
    types::{PortIndex, Rect},
};
use crate::hardware::{
    AudioCoding, HardwareUnit, ParamIndex, Parameter, PortFormat, query_optional,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputFormat {
    #[serde(rename_all = "camelCase")]
    Video {
        mime: &'static str,
        width: u32,
        height: u32,
        stride: u32,
        slice_height: u32,
        color_format: u32,
        crop: Rect,
    },
    #[serde(rename_all = "camelCase")]
    Audio {
        mime: &'static str,
        channels: u32,
        sample_rate: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_mask: Option<u32>,
    },
}

impl OutputFormat {
    /// Read the current output port definition (and crop, for video) from
    /// the unit.
    pub fn query(
        unit: &mut dyn HardwareUnit,
        channel_mask: Option<u32>,
    ) -> Result<Self, EngineError> {
        let def = read_port_definition(unit, PortIndex::Output)?;
        match def.format {
            PortFormat::Video(video) => {
                let crop = match query_optional(unit, ParamIndex::OutputCrop)? {
                    Some(Parameter::OutputCrop(rect)) => rect,
                    _ => Rect::full(video.width, video.height),
                };
                if !crop.fits_within(video.width, video.height) {
                    return Err(EngineError::Protocol(format!(
                        "crop {:?} exceeds {}x{} frame",
                        crop, video.width, video.height
                    )));
                }

                Ok(Self::Video {
                    mime: MIME_VIDEO_RAW,
                    width: video.width,
                    height: video.height,
                    stride: video.stride,
                    slice_height: video.slice_height,
                    color_format: video.color_format,
                    crop,
                })
            }
            PortFormat::Audio(audio) => {
                if audio.coding != AudioCoding::Pcm {
                    return Err(EngineError::Protocol(format!(
                        "audio output is {:?}, expected PCM",
                        audio.coding
                    )));
                }
                Ok(Self::Audio {
                    mime: MIME_AUDIO_RAW,
                    channels: audio.channels,
                    sample_rate: audio.sample_rate,
                    channel_mask,
                })
            }
        }
    }

    pub fn crop(&self) -> Option<Rect> {
        match self {
            Self::Video { crop, .. } => Some(*crop),
            Self::Audio { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{LoopbackConfig, LoopbackUnit};

    #[test]
    fn video_crop_defaults_to_full_frame() {
        let mut unit = LoopbackUnit::new(LoopbackConfig::default());
        let format = OutputFormat::query(&mut unit, None).unwrap();
        assert_eq!(format.crop(), Some(Rect::full(320, 240)));
    }

    #[test]
    fn crop_outside_frame_is_rejected() {
        let mut unit = LoopbackUnit::new(LoopbackConfig {
            crop: Some(Rect {
                left: 300,
                top: 0,
                width: 64,
                height: 64,
            }),
            ..LoopbackConfig::default()
        });
        assert!(OutputFormat::query(&mut unit, None).is_err());
    }
}
