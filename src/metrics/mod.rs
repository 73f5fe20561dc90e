//! Prometheus metrics for the capture pipeline.
//!
//! # Metrics Exposed
//!
//! ## Session
//! - `vision_camera_session_state` - Numeric session state (-1 for error)
//! - `vision_camera_streaming` - 1 while the repeating request is armed
//!
//! ## Frame handoff
//! - `vision_camera_frames_delivered_total` - Frames the consumer accepted
//! - `vision_camera_consumer_failures_total` - Frames the consumer failed on
//! - `vision_camera_empty_acquisitions_total` - Notifications with no pending buffer
//! - `vision_camera_buffers_released_total` - Buffers returned to the pool
//! - `vision_camera_frames_rejected_total` - Frames discarded after shutdown
//!
//! Exporting the text format is left to the embedding application.
//!
//! # Example
//!
//! ```no_run
//! use vision_camera::dispatch::DispatchStats;
//! use vision_camera::metrics::{CaptureMetrics, MetricsSnapshot};
//! use vision_camera::session::SessionState;
//!
//! let metrics = CaptureMetrics::new().expect("Failed to create registry");
//! let snapshot = MetricsSnapshot::from_components(SessionState::Streaming, &DispatchStats::default());
//! metrics.update(&snapshot);
//! println!("{}", metrics.encode().expect("Failed to encode"));
//! ```

mod collector;

pub use collector::{CaptureMetrics, MetricsError, MetricsSnapshot};
