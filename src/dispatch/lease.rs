//! Scoped buffer lease.

use crate::capture::{FrameBuffer, HardwareImage};
use crate::hal::ImagePool;

/// Temporary ownership of one filled pool slot.
///
/// The image goes back to the pool when the lease is dropped, on every path
/// out of the scope that holds it, including unwinding.
pub struct BufferLease<'p, P: ImagePool + ?Sized> {
    pool: &'p P,
    image: Option<HardwareImage>,
}

impl<'p, P: ImagePool + ?Sized> BufferLease<'p, P> {
    /// Takes the next filled buffer, if the pool has one.
    pub fn acquire(pool: &'p P) -> Option<Self> {
        pool.acquire_next().map(|image| Self {
            pool,
            image: Some(image),
        })
    }

    /// Pool slot held by this lease.
    pub fn slot(&self) -> Option<usize> {
        self.image.as_ref().map(HardwareImage::slot)
    }

    /// Runs `f` with a view of the leased buffer. The view cannot escape the
    /// call.
    pub fn with_frame<R>(&self, f: impl FnOnce(&FrameBuffer<'_>) -> R) -> Option<R> {
        self.image.as_ref().map(|image| f(&image.view()))
    }
}

impl<P: ImagePool + ?Sized> Drop for BufferLease<'_, P> {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            tracing::trace!(slot = image.slot(), "Releasing buffer");
            self.pool.release(image);
        }
    }
}
