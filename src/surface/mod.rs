//! `surface`: presentation surfaces that can back the output port.
//!
//! A surface owns a queue of graphics buffers. The engine dequeues them,
//! registers each with the hardware unit, and hands rendered frames back with
//! `queue_buffer`. `dequeue_buffer` is the only call allowed to block, and
//! only up to the given timeout.

pub mod memory;

pub use memory::{MemorySurface, SurfaceSnapshot};

use std::time::Duration;

use crate::common::{
    errors::SurfaceError,
    types::{GraphicHandle, Rect},
};

/// Graphics buffer usage: written by software often.
pub const USAGE_SW_WRITE_OFTEN: u64 = 0x0000_0030;
/// Graphics buffer usage: protected content, must only reach a secure path.
pub const USAGE_PROTECTED: u64 = 0x0000_4000;
/// 32-bit RGBX, used for blank filler frames.
pub const PIXEL_FORMAT_RGBX_8888: u32 = 2;

/// Which producer is connected to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceApi {
    Media,
    Cpu,
}

pub trait PresentationSurface: Send {
    fn connect(&mut self, api: SurfaceApi) -> Result<(), SurfaceError>;

    fn disconnect(&mut self, api: SurfaceApi) -> Result<(), SurfaceError>;

    fn set_geometry(&mut self, width: u32, height: u32, format: u32) -> Result<(), SurfaceError>;

    fn set_usage(&mut self, usage: u64) -> Result<(), SurfaceError>;

    /// Reallocate the surface's buffer set with `count` buffers.
    fn set_buffer_count(&mut self, count: u32) -> Result<(), SurfaceError>;

    /// Buffers the consumer may hold at any time and that therefore can
    /// never be dequeued together.
    fn min_undequeued_buffers(&self) -> Result<u32, SurfaceError>;

    /// Whether queued buffers go straight to the display compositor.
    fn queues_to_composer(&self) -> Result<bool, SurfaceError>;

    /// Take a free buffer, waiting at most `timeout`.
    fn dequeue_buffer(&mut self, timeout: Duration) -> Result<GraphicHandle, SurfaceError>;

    /// Present a buffer.
    fn queue_buffer(&mut self, handle: GraphicHandle) -> Result<(), SurfaceError>;

    /// Return a dequeued buffer without presenting it.
    fn cancel_buffer(&mut self, handle: GraphicHandle) -> Result<(), SurfaceError>;

    fn set_crop(&mut self, crop: Rect) -> Result<(), SurfaceError>;

    /// Clear a dequeued buffer to black.
    fn fill_blank(&mut self, handle: GraphicHandle) -> Result<(), SurfaceError>;
}

pub type BoxedSurface = Box<dyn PresentationSurface>;
