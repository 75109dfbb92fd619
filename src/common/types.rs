use serde::{Deserialize, Serialize};

/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// One direction of the engine's buffer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortIndex {
    Input,
    Output,
}

impl PortIndex {
    pub const ALL: [PortIndex; 2] = [PortIndex::Input, PortIndex::Output];

    /// Slot of this port in two-element per-port arrays.
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }
}

impl std::fmt::Display for PortIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Opaque buffer handle assigned by the hardware unit at allocation time.
///
/// Only ever used as a lookup key into a port's buffer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(pub u32);

impl From<u32> for BufferId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Handle of a graphics buffer owned by a presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphicHandle(pub u64);

impl std::fmt::Display for GraphicHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gb#{}", self.0)
    }
}

/// Per-buffer flags exchanged with the hardware unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    pub const END_OF_STREAM: Self = Self(0x01);
    pub const END_OF_FRAME: Self = Self(0x10);
    pub const SYNC_FRAME: Self = Self(0x20);
    pub const CODEC_CONFIG: Self = Self(0x80);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_eos(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Inclusive-exclusive rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }

    /// Whether the rectangle fits inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.left.saturating_add(self.width) <= width
            && self.top.saturating_add(self.height) <= height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_slots_are_distinct() {
        assert_eq!(PortIndex::Input.slot(), 0);
        assert_eq!(PortIndex::Output.slot(), 1);
    }

    #[test]
    fn flag_bits() {
        let mut flags = BufferFlags::END_OF_FRAME | BufferFlags::CODEC_CONFIG;
        assert!(flags.contains(BufferFlags::CODEC_CONFIG));
        assert!(!flags.is_eos());
        flags.remove(BufferFlags::END_OF_FRAME);
        flags.insert(BufferFlags::END_OF_STREAM);
        assert_eq!(flags, BufferFlags(0x81));
    }

    #[test]
    fn crop_bounds() {
        assert!(Rect::full(320, 240).fits_within(320, 240));
        let r = Rect {
            left: 8,
            top: 0,
            width: 320,
            height: 240,
        };
        assert!(!r.fits_within(320, 240));
    }
}
