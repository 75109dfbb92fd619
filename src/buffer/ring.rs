//! Fixed-size circular byte buffer backed by the global [`BufferPool`].
//!
//! [`BufferPool`]: crate::buffer::BufferPool

use crate::buffer::pool::get_byte_pool;

pub struct RingBuffer {
    buf: Vec<u8>,
    size: usize,
    write_offset: usize,
    read_offset: usize,
    length: usize,
}

impl RingBuffer {
    /// Create a new `RingBuffer` holding up to `size` bytes.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            buf: get_byte_pool().acquire_zeroed(size),
            size,
            write_offset: 0,
            read_offset: 0,
            length: 0,
        }
    }

    /// Bytes currently available to read.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Bytes that can still be written before old data is overwritten.
    pub fn remaining(&self) -> usize {
        self.size - self.length
    }

    /// Write `chunk`. When the ring is full the **oldest** data is
    /// overwritten.
    pub fn write(&mut self, chunk: &[u8]) {
        // Only the newest `size` bytes of an oversized chunk can survive.
        let chunk = if chunk.len() > self.size {
            &chunk[chunk.len() - self.size..]
        } else {
            chunk
        };
        let to_write = chunk.len();
        let available_at_end = self.size - self.write_offset;

        if to_write <= available_at_end {
            self.buf[self.write_offset..self.write_offset + to_write].copy_from_slice(chunk);
        } else {
            self.buf[self.write_offset..].copy_from_slice(&chunk[..available_at_end]);
            self.buf[..to_write - available_at_end].copy_from_slice(&chunk[available_at_end..]);
        }

        let new_len = self.length + to_write;
        if new_len > self.size {
            let overwritten = new_len - self.size;
            self.read_offset = (self.read_offset + overwritten) % self.size;
            self.length = self.size;
        } else {
            self.length = new_len;
        }

        self.write_offset = (self.write_offset + to_write) % self.size;
    }

    /// Read up to `n` bytes into `out`, returning how many were copied.
    pub fn read_into(&mut self, n: usize, out: &mut Vec<u8>) -> usize {
        let to_read = n.min(self.length);
        if to_read == 0 {
            return 0;
        }

        let available_at_end = self.size - self.read_offset;
        if to_read <= available_at_end {
            out.extend_from_slice(&self.buf[self.read_offset..self.read_offset + to_read]);
        } else {
            out.extend_from_slice(&self.buf[self.read_offset..]);
            out.extend_from_slice(&self.buf[..to_read - available_at_end]);
        }

        self.read_offset = (self.read_offset + to_read) % self.size;
        self.length -= to_read;
        to_read
    }

    /// Skip `n` bytes without copying. Returns the bytes actually skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let to_skip = n.min(self.length);
        self.read_offset = (self.read_offset + to_skip) % self.size;
        self.length -= to_skip;
        to_skip
    }

    /// Enlarge the ring to at least `size` bytes, keeping unread data.
    pub fn grow(&mut self, size: usize) {
        if size <= self.size {
            return;
        }
        let mut pending = Vec::with_capacity(self.length);
        self.read_into(self.length, &mut pending);

        let old = std::mem::replace(&mut self.buf, get_byte_pool().acquire_zeroed(size));
        get_byte_pool().release(old);
        self.size = size;
        self.clear();
        self.write(&pending);
    }

    pub fn clear(&mut self) {
        self.write_offset = 0;
        self.read_offset = 0;
        self.length = 0;
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            get_byte_pool().release(std::mem::take(&mut self.buf));
        }
    }
}
