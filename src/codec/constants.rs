//! Mime types, component roles and fixed tuning values.

pub const MIME_VIDEO_AVC: &str = "video/avc";
pub const MIME_VIDEO_HEVC: &str = "video/hevc";
pub const MIME_VIDEO_MPEG4: &str = "video/mp4v-es";
pub const MIME_VIDEO_H263: &str = "video/3gpp";
pub const MIME_VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
pub const MIME_VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
pub const MIME_VIDEO_RAW: &str = "video/raw";
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
pub const MIME_AUDIO_AMR_NB: &str = "audio/3gpp";
pub const MIME_AUDIO_AMR_WB: &str = "audio/amr-wb";
pub const MIME_AUDIO_MPEG: &str = "audio/mpeg";
pub const MIME_AUDIO_VORBIS: &str = "audio/vorbis";
pub const MIME_AUDIO_G711_ALAW: &str = "audio/g711-alaw";
pub const MIME_AUDIO_G711_MLAW: &str = "audio/g711-mlaw";
pub const MIME_AUDIO_FLAC: &str = "audio/flac";
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// Decoder and encoder role strings per mime type. `None` means the role
/// does not exist for that direction.
pub struct RoleEntry {
    pub mime: &'static str,
    pub decoder: Option<&'static str>,
    pub encoder: Option<&'static str>,
}

pub const ROLE_TABLE: &[RoleEntry] = &[
    RoleEntry {
        mime: MIME_VIDEO_AVC,
        decoder: Some("video_decoder.avc"),
        encoder: Some("video_encoder.avc"),
    },
    RoleEntry {
        mime: MIME_VIDEO_HEVC,
        decoder: Some("video_decoder.hevc"),
        encoder: Some("video_encoder.hevc"),
    },
    RoleEntry {
        mime: MIME_VIDEO_MPEG4,
        decoder: Some("video_decoder.mpeg4"),
        encoder: Some("video_encoder.mpeg4"),
    },
    RoleEntry {
        mime: MIME_VIDEO_H263,
        decoder: Some("video_decoder.h263"),
        encoder: Some("video_encoder.h263"),
    },
    RoleEntry {
        mime: MIME_VIDEO_VP8,
        decoder: Some("video_decoder.vp8"),
        encoder: Some("video_encoder.vp8"),
    },
    RoleEntry {
        mime: MIME_VIDEO_VP9,
        decoder: Some("video_decoder.vp9"),
        encoder: None,
    },
    RoleEntry {
        mime: MIME_AUDIO_AAC,
        decoder: Some("audio_decoder.aac"),
        encoder: Some("audio_encoder.aac"),
    },
    RoleEntry {
        mime: MIME_AUDIO_AMR_NB,
        decoder: Some("audio_decoder.amrnb"),
        encoder: Some("audio_encoder.amrnb"),
    },
    RoleEntry {
        mime: MIME_AUDIO_AMR_WB,
        decoder: Some("audio_decoder.amrwb"),
        encoder: Some("audio_encoder.amrwb"),
    },
    RoleEntry {
        mime: MIME_AUDIO_MPEG,
        decoder: Some("audio_decoder.mp3"),
        encoder: None,
    },
    RoleEntry {
        mime: MIME_AUDIO_VORBIS,
        decoder: Some("audio_decoder.vorbis"),
        encoder: None,
    },
    RoleEntry {
        mime: MIME_AUDIO_G711_ALAW,
        decoder: Some("audio_decoder.g711alaw"),
        encoder: None,
    },
    RoleEntry {
        mime: MIME_AUDIO_G711_MLAW,
        decoder: Some("audio_decoder.g711mlaw"),
        encoder: None,
    },
    RoleEntry {
        mime: MIME_AUDIO_FLAC,
        decoder: Some("audio_decoder.flac"),
        encoder: Some("audio_encoder.flac"),
    },
    RoleEntry {
        mime: MIME_AUDIO_RAW,
        decoder: Some("audio_decoder.raw"),
        encoder: None,
    },
];

pub fn role_entry(mime: &str) -> Option<&'static RoleEntry> {
    ROLE_TABLE.iter().find(|e| e.mime.eq_ignore_ascii_case(mime))
}

/// AMR narrowband and G.711 are always 8 kHz; AMR wideband is 16 kHz.
pub const NARROWBAND_SAMPLE_RATE: u32 = 8_000;
pub const WIDEBAND_SAMPLE_RATE: u32 = 16_000;

pub const FLAC_DEFAULT_COMPRESSION_LEVEL: u32 = 5;
pub const FLAC_MAX_COMPRESSION_LEVEL: u32 = 8;

/// Bytes per PCM sample on raw audio ports.
pub const PCM_SAMPLE_BYTES: usize = 2;

/// Suffix marking a component that only handles protected content.
pub const SECURE_SUFFIX: &str = ".secure";
