//! Camera capture session library
//!
//! Drives a camera device through its open, configure and stream lifecycle
//! and hands each produced frame to a downstream consumer exactly once,
//! returning the hardware buffer as soon as the consumer is done with it.
//!
//! # Architecture
//!
//! ```text
//! CameraSession ──(worker thread)──► CameraBackend
//!       │                                 │
//!  FrameSinkRegistry               ImagePool per surface
//!       │                                 │
//!       └──────────── FrameDispatcher ◄───┘ ──► FrameConsumer
//! ```
//!
//! # Design Principles
//!
//! - **Single worker**: every hardware call and callback runs on one thread
//! - **Report, don't retry**: failures become an `Error` state plus an observer event
//! - **Scoped buffers**: a frame never outlives the consumer call that sees it
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vision_camera::{
//!     capture::{FpsRange, FrameBuffer},
//!     dispatch::{ConsumerError, FrameDispatcher},
//!     hal::{PoolConfig, SimulatedDevice, SimulatedHardware, SimulatedImagePool, SurfaceHandle},
//!     session::CameraSession,
//! };
//!
//! fn count(_frame: &FrameBuffer<'_>) -> Result<(), ConsumerError> {
//!     Ok(())
//! }
//!
//! let hardware = SimulatedHardware::new()
//!     .with_device(SimulatedDevice::new("0", vec![FpsRange::new(15, 30)]))
//!     .stream_frames();
//! let pool = Arc::new(SimulatedImagePool::new(SurfaceHandle::new(1), PoolConfig::default()));
//! hardware.register_pool(Arc::clone(&pool));
//! let dispatcher = FrameDispatcher::attach(pool, count);
//!
//! let session = CameraSession::builder(hardware.camera()).build().unwrap();
//! session.add_sink(dispatcher).unwrap();
//! session.open("0", true).unwrap();
//! // ... frames flow into `count` ...
//! session.close().unwrap();
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod dispatch;
pub mod hal;
pub mod metrics;
pub mod session;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export commonly used types at crate root
pub use capture::{CaptureConfiguration, FileConfig, FpsRange, FrameBuffer, FrameSink};
pub use dispatch::{FrameConsumer, FrameDispatcher};
pub use hal::{CameraBackend, ImagePool, SimulatedHardware};
pub use metrics::{CaptureMetrics, MetricsSnapshot};
pub use session::{CameraSession, SessionError, SessionEvent, SessionState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Locks a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
