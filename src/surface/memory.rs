//! `MemorySurface`: an in-process presentation surface.
//!
//! Models a buffer queue with a consumer that keeps at most
//! `min_undequeued` presented buffers on screen; queueing more releases the
//! oldest back to the free list. Clones share the same queue so the owner can
//! watch what the engine does with it.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::common::{
    errors::SurfaceError,
    types::{GraphicHandle, Rect},
};
use crate::surface::{PresentationSurface, SurfaceApi};

/// Point-in-time view of the surface, for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSnapshot {
    pub connected: Option<SurfaceApi>,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub usage: u64,
    pub crop: Option<Rect>,
    pub buffer_count: usize,
    pub free: usize,
    pub dequeued: usize,
    pub presented: usize,
    pub queued_total: usize,
    pub cancelled_total: usize,
    pub blank_frames: usize,
}

struct Inner {
    connected: Option<SurfaceApi>,
    width: u32,
    height: u32,
    format: u32,
    usage: u64,
    crop: Option<Rect>,
    min_undequeued: u32,
    queues_to_composer: bool,
    next_handle: u64,
    all: Vec<GraphicHandle>,
    free: VecDeque<GraphicHandle>,
    dequeued: HashSet<GraphicHandle>,
    presented: VecDeque<GraphicHandle>,
    blanked: HashSet<GraphicHandle>,
    queued_total: usize,
    cancelled_total: usize,
    blank_frames: usize,
}

impl Inner {
    fn owns(&self, handle: GraphicHandle, operation: &'static str) -> Result<(), SurfaceError> {
        if self.dequeued.contains(&handle) {
            Ok(())
        } else {
            Err(SurfaceError::Rejected {
                operation,
                reason: format!("{} is not dequeued", handle),
            })
        }
    }

    fn require_connected(&self) -> Result<(), SurfaceError> {
        match self.connected {
            Some(_) => Ok(()),
            None => Err(SurfaceError::Disconnected),
        }
    }
}

#[derive(Clone)]
pub struct MemorySurface {
    inner: Arc<Mutex<Inner>>,
    available: Arc<Condvar>,
}

impl MemorySurface {
    pub fn new(min_undequeued: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                connected: Some(SurfaceApi::Media),
                width: 0,
                height: 0,
                format: 0,
                usage: 0,
                crop: None,
                min_undequeued,
                queues_to_composer: true,
                next_handle: 1,
                all: Vec::new(),
                free: VecDeque::new(),
                dequeued: HashSet::new(),
                presented: VecDeque::new(),
                blanked: HashSet::new(),
                queued_total: 0,
                cancelled_total: 0,
                blank_frames: 0,
            })),
            available: Arc::new(Condvar::new()),
        }
    }

    /// A surface whose consumer is not the display compositor, as for a
    /// screen recorder or texture.
    pub fn offscreen(min_undequeued: u32) -> Self {
        let surface = Self::new(min_undequeued);
        surface.inner.lock().queues_to_composer = false;
        surface
    }

    pub fn snapshot(&self) -> SurfaceSnapshot {
        let g = self.inner.lock();
        SurfaceSnapshot {
            connected: g.connected,
            width: g.width,
            height: g.height,
            format: g.format,
            usage: g.usage,
            crop: g.crop,
            buffer_count: g.all.len(),
            free: g.free.len(),
            dequeued: g.dequeued.len(),
            presented: g.presented.len(),
            queued_total: g.queued_total,
            cancelled_total: g.cancelled_total,
            blank_frames: g.blank_frames,
        }
    }

    /// Put a buffer the engine has never seen at the head of the free list.
    pub fn inject_foreign_buffer(&self) -> GraphicHandle {
        let mut g = self.inner.lock();
        let handle = GraphicHandle(g.next_handle);
        g.next_handle += 1;
        g.all.push(handle);
        g.free.push_front(handle);
        self.available.notify_one();
        handle
    }

    /// Release every presented buffer, as a consumer tearing down would.
    pub fn release_presented(&self) {
        let mut g = self.inner.lock();
        while let Some(handle) = g.presented.pop_front() {
            g.free.push_back(handle);
        }
        self.available.notify_all();
    }
}

impl PresentationSurface for MemorySurface {
    fn connect(&mut self, api: SurfaceApi) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        match g.connected {
            None => {
                g.connected = Some(api);
                Ok(())
            }
            Some(current) => Err(SurfaceError::Rejected {
                operation: "connect",
                reason: format!("already connected as {:?}", current),
            }),
        }
    }

    fn disconnect(&mut self, api: SurfaceApi) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        if g.connected != Some(api) {
            return Err(SurfaceError::Rejected {
                operation: "disconnect",
                reason: format!("{:?} is not connected", api),
            });
        }
        g.connected = None;
        Ok(())
    }

    fn set_geometry(&mut self, width: u32, height: u32, format: u32) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        g.require_connected()?;
        g.width = width;
        g.height = height;
        g.format = format;
        Ok(())
    }

    fn set_usage(&mut self, usage: u64) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        g.require_connected()?;
        g.usage = usage;
        Ok(())
    }

    fn set_buffer_count(&mut self, count: u32) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        g.require_connected()?;
        if count <= g.min_undequeued {
            return Err(SurfaceError::Rejected {
                operation: "set_buffer_count",
                reason: format!("{} buffers cannot cover {} undequeued", count, g.min_undequeued),
            });
        }

        let first = g.next_handle;
        g.next_handle += count as u64;
        g.all = (first..first + count as u64).map(GraphicHandle).collect();
        g.free = g.all.iter().copied().collect();
        g.dequeued.clear();
        g.presented.clear();
        g.blanked.clear();
        self.available.notify_all();
        Ok(())
    }

    fn min_undequeued_buffers(&self) -> Result<u32, SurfaceError> {
        Ok(self.inner.lock().min_undequeued)
    }

    fn queues_to_composer(&self) -> Result<bool, SurfaceError> {
        Ok(self.inner.lock().queues_to_composer)
    }

    fn dequeue_buffer(&mut self, timeout: Duration) -> Result<GraphicHandle, SurfaceError> {
        let mut g = self.inner.lock();
        g.require_connected()?;

        if g.free.is_empty() {
            let timed_out = self.available.wait_for(&mut g, timeout).timed_out();
            if timed_out && g.free.is_empty() {
                return Err(SurfaceError::Timeout);
            }
        }

        let handle = g.free.pop_front().ok_or(SurfaceError::Timeout)?;
        g.dequeued.insert(handle);
        trace!("surface dequeued {}", handle);
        Ok(handle)
    }

    fn queue_buffer(&mut self, handle: GraphicHandle) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        g.require_connected()?;
        g.owns(handle, "queue_buffer")?;

        g.dequeued.remove(&handle);
        g.presented.push_back(handle);
        g.queued_total += 1;
        if g.blanked.remove(&handle) {
            g.blank_frames += 1;
        }

        while g.presented.len() > g.min_undequeued.max(1) as usize {
            if let Some(done) = g.presented.pop_front() {
                g.free.push_back(done);
            }
        }
        self.available.notify_one();
        Ok(())
    }

    fn cancel_buffer(&mut self, handle: GraphicHandle) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        g.owns(handle, "cancel_buffer")?;

        g.dequeued.remove(&handle);
        g.blanked.remove(&handle);
        g.free.push_back(handle);
        g.cancelled_total += 1;
        self.available.notify_one();
        Ok(())
    }

    fn set_crop(&mut self, crop: Rect) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        g.require_connected()?;
        g.crop = Some(crop);
        Ok(())
    }

    fn fill_blank(&mut self, handle: GraphicHandle) -> Result<(), SurfaceError> {
        let mut g = self.inner.lock();
        g.owns(handle, "fill_blank")?;
        g.blanked.insert(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(5);

    #[test]
    fn consumer_keeps_at_most_min_undequeued() {
        let mut surface = MemorySurface::new(2);
        surface.set_buffer_count(4).unwrap();

        let handles: Vec<_> = (0..4).map(|_| surface.dequeue_buffer(SHORT).unwrap()).collect();
        assert_eq!(surface.dequeue_buffer(SHORT), Err(SurfaceError::Timeout));

        for h in &handles[..3] {
            surface.queue_buffer(*h).unwrap();
        }
        let snap = surface.snapshot();
        assert_eq!(snap.presented, 2);
        assert_eq!(snap.free, 1);
        assert_eq!(surface.dequeue_buffer(SHORT).unwrap(), handles[0]);
    }

    #[test]
    fn cancel_requires_a_dequeued_buffer() {
        let mut surface = MemorySurface::new(1);
        surface.set_buffer_count(2).unwrap();
        let h = surface.dequeue_buffer(SHORT).unwrap();
        surface.cancel_buffer(h).unwrap();
        assert!(surface.cancel_buffer(h).is_err());
        assert_eq!(surface.snapshot().cancelled_total, 1);
    }

    #[test]
    fn producers_are_exclusive() {
        let mut surface = MemorySurface::new(1);
        assert!(surface.connect(SurfaceApi::Cpu).is_err());
        surface.disconnect(SurfaceApi::Media).unwrap();
        surface.connect(SurfaceApi::Cpu).unwrap();
        assert_eq!(surface.snapshot().connected, Some(SurfaceApi::Cpu));
        assert!(surface.set_geometry(1, 1, 0).is_ok());
    }

    #[test]
    fn blank_frames_are_counted_on_queue() {
        let mut surface = MemorySurface::new(1);
        surface.set_buffer_count(3).unwrap();
        let h = surface.dequeue_buffer(SHORT).unwrap();
        surface.fill_blank(h).unwrap();
        surface.queue_buffer(h).unwrap();
        assert_eq!(surface.snapshot().blank_frames, 1);
    }
}
