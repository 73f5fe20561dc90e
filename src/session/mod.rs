//! Camera device and capture-session lifecycle.
//!
//! ```text
//! Closed → Opening → Open → Configuring → Streaming
//!             ↓                  ↓            ↓
//!           Error ←──────────────┴────────────┘
//! ```
//!
//! Every hardware call and every hardware callback runs on the session's
//! [`WorkerContext`]. Failures after `open` are reported only through the
//! [`SessionObserver`]; the session never retries on its own.

mod camera;
mod state;
mod worker;

pub use camera::{CameraSession, CameraSessionBuilder, SessionError};
pub use state::{
    DeviceErrorCode, DisconnectReason, FailureKind, SessionEvent, SessionObserver, SessionState,
};
pub use worker::{WorkerContext, WorkerError, WorkerHandle};
