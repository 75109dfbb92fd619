//! Byte memory shared by the codec engine: a size-bucketed pool backing
//! heap port buffers, and a ring used to hold back trailing audio.

pub mod pool;
pub mod ring;

pub use pool::{BufferPool, PoolStats, get_byte_pool};
pub use ring::RingBuffer;
