//! Encoder delay / padding trimming for PCM output.
//!
//! The first `skip` bytes of the stream are dropped and the newest `cut`
//! bytes are always held back, so whatever is still held when the stream
//! ends (the padding) never reaches the consumer.

use crate::buffer::RingBuffer;

/// Initial ring size on top of the held-back tail.
const RING_HEADROOM: usize = 4 * 1024;

pub struct SkipCut {
    skip: usize,
    front: usize,
    cut: usize,
    ring: RingBuffer,
}

impl SkipCut {
    pub fn new(skip: usize, cut: usize) -> Self {
        Self {
            skip,
            front: skip,
            cut,
            ring: RingBuffer::new(cut + RING_HEADROOM),
        }
    }

    /// Build a trimmer for `delay` and `padding` frames of `frame_size` bytes.
    /// Returns `None` when there is nothing to trim.
    pub fn for_frames(delay: u32, padding: u32, frame_size: usize) -> Option<Self> {
        if delay == 0 && padding == 0 {
            return None;
        }
        Some(Self::new(
            delay as usize * frame_size,
            padding as usize * frame_size,
        ))
    }

    /// Feed one output buffer and return the bytes that may be delivered.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let skipped = self.front.min(data.len());
        self.front -= skipped;
        let data = &data[skipped..];

        if self.ring.remaining() < data.len() {
            self.ring.grow(self.ring.len() + data.len());
        }
        self.ring.write(data);

        let ready = self.ring.len().saturating_sub(self.cut);
        let mut out = Vec::with_capacity(ready);
        self.ring.read_into(ready, &mut out);
        out
    }

    /// Bytes currently held back.
    pub fn held(&self) -> usize {
        self.ring.len()
    }

    /// Forget held data and start skipping again, as after a flush.
    pub fn clear(&mut self) {
        self.ring.clear();
        self.front = self.skip;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_front_and_holds_tail() {
        let mut sc = SkipCut::new(4, 3);
        let a = sc.process(&[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(a, vec![4]);
        let b = sc.process(&[8, 9]);
        assert_eq!(b, vec![5, 6]);
        assert_eq!(sc.held(), 3);
    }

    #[test]
    fn skip_spans_several_buffers() {
        let mut sc = SkipCut::new(6, 0);
        assert!(sc.process(&[1, 2, 3, 4]).is_empty());
        assert_eq!(sc.process(&[5, 6, 7, 8]), vec![7, 8]);
    }

    #[test]
    fn grows_for_large_buffers() {
        let mut sc = SkipCut::new(0, 2);
        let big = vec![7u8; RING_HEADROOM * 3];
        let out = sc.process(&big);
        assert_eq!(out.len(), big.len() - 2);
    }

    #[test]
    fn clear_rearms_skip() {
        let mut sc = SkipCut::new(2, 0);
        assert_eq!(sc.process(&[1, 2, 3]), vec![3]);
        sc.clear();
        assert_eq!(sc.process(&[1, 2, 3]), vec![3]);
        assert!(SkipCut::for_frames(0, 0, 4).is_none());
    }
}
