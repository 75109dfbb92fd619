//! Parameter structures exchanged through `get_parameter` / `set_parameter`.

use serde::{Deserialize, Serialize};

use crate::common::types::{PortIndex, Rect};

/// Planar YUV 4:2:0.
pub const COLOR_FORMAT_YUV420_PLANAR: u32 = 19;
/// Semi-planar YUV 4:2:0, the usual hardware decoder output.
pub const COLOR_FORMAT_YUV420_SEMIPLANAR: u32 = 21;

/// Which parameter to read back from the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamIndex {
    PortDefinition(PortIndex),
    OutputCrop,
    /// Graphics usage bits the unit needs on surface buffers.
    GraphicUsage,
    /// Whether the unit accepts one access unit split over several buffers.
    PartialFrames,
    ChannelMask,
}

/// Which setting a port-settings-changed event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingsIndex {
    /// Unspecified; treated as a full port definition change.
    Unspecified,
    PortDefinition,
    OutputCrop,
    Other(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    PortDefinition(PortDefinition),
    OutputCrop(Rect),
    GraphicUsage(u64),
    PartialFrames(bool),
    ChannelMask(u32),
    ComponentRole(String),
    StoreMetadataInBuffers { port: PortIndex, enable: bool },
    PrependSpsPpsToIdr(bool),
    Bitrate(u32),
    /// Seconds between sync frames; negative disables periodic sync frames.
    IFrameInterval(i32),
    RequestKeyframe,
}

impl Parameter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PortDefinition(_) => "port-definition",
            Self::OutputCrop(_) => "output-crop",
            Self::GraphicUsage(_) => "graphic-usage",
            Self::PartialFrames(_) => "partial-frames",
            Self::ChannelMask(_) => "channel-mask",
            Self::ComponentRole(_) => "component-role",
            Self::StoreMetadataInBuffers { .. } => "store-metadata-in-buffers",
            Self::PrependSpsPpsToIdr(_) => "prepend-sps-pps-to-idr",
            Self::Bitrate(_) => "bitrate",
            Self::IFrameInterval(_) => "i-frame-interval",
            Self::RequestKeyframe => "request-keyframe",
        }
    }
}

/// Buffer requirements and data format of one port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortDefinition {
    pub port: PortIndex,
    pub buffer_count: u32,
    pub min_buffer_count: u32,
    pub buffer_size: usize,
    pub enabled: bool,
    pub format: PortFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortFormat {
    Video(VideoPortFormat),
    Audio(AudioPortFormat),
}

impl PortFormat {
    pub fn video(&self) -> Option<&VideoPortFormat> {
        match self {
            Self::Video(v) => Some(v),
            Self::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioPortFormat> {
        match self {
            Self::Audio(a) => Some(a),
            Self::Video(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoPortFormat {
    pub coding: VideoCoding,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub slice_height: u32,
    pub color_format: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
}

impl VideoPortFormat {
    pub fn raw(width: u32, height: u32, color_format: u32) -> Self {
        Self {
            coding: VideoCoding::Raw,
            width,
            height,
            stride: width,
            slice_height: height,
            color_format,
            frame_rate: 0,
            bitrate: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioPortFormat {
    pub coding: AudioCoding,
    pub channels: u32,
    pub sample_rate: u32,
    pub bitrate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCoding {
    Raw,
    Avc,
    Hevc,
    Mpeg4,
    H263,
    Vp8,
    Vp9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCoding {
    Pcm,
    Aac { profile: u32, adts: bool },
    AmrNb,
    AmrWb,
    G711ALaw,
    G711MuLaw,
    Flac { compression_level: u32 },
    Mp3,
    Vorbis,
}
