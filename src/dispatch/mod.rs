//! Frame handoff from the hardware pool to the downstream consumer.
//!
//! On every frame-ready notification the dispatcher leases at most one
//! buffer, hands a borrowed view to the consumer on the calling thread and
//! releases the buffer before returning, whatever the consumer did. Nothing
//! is queued: with a pool of depth one, frames that arrive while the consumer
//! is still busy are dropped by the hardware.

mod lease;

pub use lease::BufferLease;

use crate::capture::{FrameBuffer, FrameSink};
use crate::hal::{ImagePool, SurfaceHandle};
use crate::lock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use thiserror::Error;

/// Failure reported by a downstream consumer.
#[derive(Debug, Clone, Error)]
#[error("frame consumer failed: {0}")]
pub struct ConsumerError(pub String);

impl ConsumerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Downstream receiver of frames.
///
/// Called synchronously on the hardware's delivery thread; it must not block
/// indefinitely and cannot keep the frame past the call.
///
/// A consumer must not call back into the session (`close`, `open`, ...).
/// Closing waits for the in-flight delivery and for the delivery thread, so a
/// consumer doing either deadlocks against it. Signal another thread
/// instead. Stopping its own dispatcher with [`FrameSink::shutdown`] is fine.
pub trait FrameConsumer: Send + Sync {
    fn on_frame(&self, frame: &FrameBuffer<'_>) -> Result<(), ConsumerError>;
}

impl<F> FrameConsumer for F
where
    F: Fn(&FrameBuffer<'_>) -> Result<(), ConsumerError> + Send + Sync,
{
    fn on_frame(&self, frame: &FrameBuffer<'_>) -> Result<(), ConsumerError> {
        self(frame)
    }
}

/// Result of one frame-ready notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    ConsumerFailed,
    ConsumerPanicked,
    /// Nothing was pending in the pool.
    NoBuffer,
    /// The dispatcher is shut down; any pending buffer was returned unseen.
    Stopped,
}

/// Counters over the lifetime of a dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub consumer_failures: u64,
    pub empty_acquisitions: u64,
    pub released: u64,
    /// Notifications that arrived while shut down.
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    consumer_failures: AtomicU64,
    empty_acquisitions: AtomicU64,
    released: AtomicU64,
    rejected: AtomicU64,
}

/// Bridges an [`ImagePool`] to a [`FrameConsumer`].
pub struct FrameDispatcher<P: ImagePool> {
    pool: Arc<P>,
    consumer: Box<dyn FrameConsumer>,
    running: AtomicBool,
    // Held for the whole of a delivery, so shutdown waits for it.
    delivery: Mutex<()>,
    delivering: Mutex<Option<ThreadId>>,
    counters: Counters,
}

impl<P: ImagePool> FrameDispatcher<P> {
    /// Creates a running dispatcher. The consumer is injected here and is
    /// the only place frames go.
    pub fn new(pool: Arc<P>, consumer: impl FrameConsumer + 'static) -> Self {
        Self {
            pool,
            consumer: Box::new(consumer),
            running: AtomicBool::new(true),
            delivery: Mutex::new(()),
            delivering: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Creates a dispatcher and installs it as the pool's frame-ready
    /// listener. The pool only holds a weak reference.
    pub fn attach(pool: Arc<P>, consumer: impl FrameConsumer + 'static) -> Arc<Self> {
        let dispatcher = Arc::new(Self::new(Arc::clone(&pool), consumer));
        let weak = Arc::downgrade(&dispatcher);
        pool.set_listener(Some(Arc::new(move || {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.on_frame_ready();
            }
        })));
        dispatcher
    }

    /// Handles one frame-ready notification.
    pub fn on_frame_ready(&self) -> DispatchOutcome {
        let _delivery = lock(&self.delivery);

        let Some(lease) = BufferLease::acquire(&*self.pool) else {
            self.counters.empty_acquisitions.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(surface = %self.pool.surface(), "Frame ready but nothing to acquire");
            return DispatchOutcome::NoBuffer;
        };

        if !self.running.load(Ordering::SeqCst) {
            drop(lease);
            self.counters.released.fetch_add(1, Ordering::Relaxed);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Stopped;
        }

        *lock(&self.delivering) = Some(thread::current().id());
        let consumer = &self.consumer;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            lease
                .with_frame(|frame| consumer.on_frame(frame))
                .unwrap_or(Ok(()))
        }));
        *lock(&self.delivering) = None;
        drop(lease);
        self.counters.released.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(Ok(())) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Delivered
            }
            Ok(Err(e)) => {
                self.counters.consumer_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Frame consumer failed");
                DispatchOutcome::ConsumerFailed
            }
            Err(_) => {
                self.counters.consumer_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Frame consumer panicked");
                DispatchOutcome::ConsumerPanicked
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            consumer_failures: self.counters.consumer_failures.load(Ordering::Relaxed),
            empty_acquisitions: self.counters.empty_acquisitions.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

impl<P: ImagePool> FrameSink for FrameDispatcher<P> {
    fn surface(&self) -> SurfaceHandle {
        self.pool.surface()
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        // From inside the consumer the current delivery is the last one.
        if *lock(&self.delivering) != Some(thread::current().id()) {
            drop(lock(&self.delivery));
        }
        tracing::debug!(surface = %self.pool.surface(), "Frame dispatcher stopped");
    }

    fn resume(&self) {
        self.running.store(true, Ordering::SeqCst);
    }
}
