//! Bounded image buffer pool.
//!
//! Stands in for the hardware-side reader that owns the output buffers. The
//! pool never grows: when every slot is either filled or leased, the next
//! frame the hardware produces is dropped.

use super::{FrameReadyListener, ImagePool, SurfaceHandle};
use crate::capture::{HardwareImage, PixelFormat, PlaneBuffer};
use crate::lock;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Configuration for the image pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Number of buffer slots.
    pub depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Yuv420,
            width: 640,
            height: 480,
            depth: 1,
        }
    }
}

/// Counters over the lifetime of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Frames written into a free slot.
    pub produced: u64,
    /// Frames dropped because no slot was free.
    pub dropped: u64,
    pub acquired: u64,
    pub released: u64,
    /// Releases of a slot that was not leased.
    pub invalid_releases: u64,
}

struct PoolInner {
    free: Vec<(usize, Vec<PlaneBuffer>)>,
    pending: VecDeque<HardwareImage>,
    leased: Vec<bool>,
    stats: PoolStats,
}

/// In-memory [`ImagePool`] with a fixed number of slots.
pub struct SimulatedImagePool {
    surface: SurfaceHandle,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    listener: Mutex<Option<FrameReadyListener>>,
}

impl SimulatedImagePool {
    pub fn new(surface: SurfaceHandle, config: PoolConfig) -> Self {
        let depth = config.depth.max(1);
        let free = (0..depth)
            .map(|slot| (slot, allocate_planes(&config)))
            .collect();
        Self {
            surface,
            inner: Mutex::new(PoolInner {
                free,
                pending: VecDeque::with_capacity(depth),
                leased: vec![false; depth],
                stats: PoolStats::default(),
            }),
            listener: Mutex::new(None),
            config,
        }
    }

    /// Writes a frame into a free slot and notifies the listener.
    ///
    /// Returns false if the frame was dropped.
    pub fn produce(&self, timestamp_nanos: i64) -> bool {
        {
            let mut inner = lock(&self.inner);
            let Some((slot, mut planes)) = inner.free.pop() else {
                inner.stats.dropped += 1;
                tracing::trace!(surface = %self.surface, "No free slot, frame dropped");
                return false;
            };
            for plane in &mut planes {
                plane.data.fill(timestamp_nanos as u8);
            }
            inner.pending.push_back(HardwareImage::new(
                slot,
                self.config.format,
                self.config.width,
                self.config.height,
                timestamp_nanos,
                planes,
            ));
            inner.stats.produced += 1;
        }

        // Cloned out so the listener runs without holding the lock.
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener();
        }
        true
    }

    /// Number of slots currently leased out.
    pub fn outstanding(&self) -> usize {
        lock(&self.inner).leased.iter().filter(|l| **l).count()
    }

    /// Number of filled slots waiting to be acquired.
    pub fn pending(&self) -> usize {
        lock(&self.inner).pending.len()
    }

    pub fn stats(&self) -> PoolStats {
        lock(&self.inner).stats
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl ImagePool for SimulatedImagePool {
    fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    fn acquire_next(&self) -> Option<HardwareImage> {
        let mut inner = lock(&self.inner);
        let image = inner.pending.pop_front()?;
        inner.leased[image.slot()] = true;
        inner.stats.acquired += 1;
        Some(image)
    }

    fn release(&self, image: HardwareImage) {
        let mut inner = lock(&self.inner);
        let slot = image.slot();
        if !inner.leased.get(slot).copied().unwrap_or(false) {
            inner.stats.invalid_releases += 1;
            tracing::error!(surface = %self.surface, slot, "Release of a slot that is not leased");
            return;
        }
        inner.leased[slot] = false;
        inner.free.push((slot, image.into_planes()));
        inner.stats.released += 1;
    }

    fn set_listener(&self, listener: Option<FrameReadyListener>) {
        *lock(&self.listener) = listener;
    }
}

fn allocate_planes(config: &PoolConfig) -> Vec<PlaneBuffer> {
    let (w, h) = (config.width as usize, config.height as usize);
    match config.format {
        PixelFormat::Gray8 => vec![PlaneBuffer {
            data: vec![0u8; w * h],
            row_stride: w,
            pixel_stride: 1,
        }],
        PixelFormat::Yuv420 => {
            let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
            let chroma = PlaneBuffer {
                data: vec![0u8; cw * ch],
                row_stride: cw,
                pixel_stride: 1,
            };
            vec![
                PlaneBuffer {
                    data: vec![0u8; w * h],
                    row_stride: w,
                    pixel_stride: 1,
                },
                chroma.clone(),
                chroma,
            ]
        }
    }
}
