//! Hardware abstraction layer.
//!
//! The camera hardware is modeled as a [`CameraBackend`] (device and session
//! control, answered asynchronously through an [`EventSink`]) and one
//! [`ImagePool`] per output surface (the bounded buffer pool frames land in).
//! Real drivers and the [`SimulatedCamera`] used by tests and the demo binary
//! both sit behind these traits.

mod pool;
mod simulated;

pub use pool::{PoolConfig, PoolStats, SimulatedImagePool};
pub use simulated::{SimulatedCamera, SimulatedDevice, SimulatedHardware, SimulationLog};

use crate::capture::{CaptureRequest, FpsRange, HardwareImage};
use crate::session::{DeviceErrorCode, FailureKind, SessionEvent};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by hardware-facing calls.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera access error: {0:?}")]
    Access(DeviceErrorCode),
    #[error("camera device already closed")]
    DeviceClosed,
    #[error("capture session no longer active")]
    SessionClosed,
    #[error("invalid capture request: {0}")]
    InvalidRequest(String),
}

impl HalError {
    /// True when the failure comes from the device or session being closed
    /// underneath an in-flight call.
    pub fn is_race(&self) -> bool {
        matches!(self, HalError::DeviceClosed | HalError::SessionClosed)
    }

    pub fn failure_kind(&self) -> FailureKind {
        if self.is_race() {
            FailureKind::ConfigurationRace
        } else {
            FailureKind::DeviceAccess
        }
    }

    /// Error code forwarded to the session observer.
    pub fn error_code(&self) -> DeviceErrorCode {
        match self {
            HalError::Access(code) => *code,
            _ => DeviceErrorCode::Device,
        }
    }
}

/// Opaque handle of an output surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(u64);

impl SurfaceHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Handle of an opened camera device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    id: String,
    token: u64,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, token: u64) -> Self {
        Self {
            id: id.into(),
            token,
        }
    }

    /// Device identifier the handle was opened for.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Handle of a configured capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub const fn new(token: u64) -> Self {
        Self(token)
    }
}

/// Read-only device description.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCharacteristics {
    pub device_id: String,
    /// Advertised target frame-rate ranges.
    pub fps_ranges: Vec<FpsRange>,
    /// Supported exposure time range in nanoseconds.
    pub exposure_range_nanos: Option<(i64, i64)>,
    /// Closest focus distance the lens reaches, in diopters.
    pub min_focus_distance: Option<f32>,
}

/// Route by which hardware callbacks re-enter the owning session.
///
/// Posting never runs the callback inline; it queues it on the session's
/// worker. `post` returns false once the session has stopped listening.
#[derive(Clone)]
pub struct EventSink {
    post: Arc<dyn Fn(SessionEvent) -> bool + Send + Sync>,
}

impl EventSink {
    pub fn new(post: impl Fn(SessionEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            post: Arc::new(post),
        }
    }

    pub fn post(&self, event: SessionEvent) -> bool {
        (self.post)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Device and session control.
///
/// All methods are only ever called from the owning session's worker thread.
/// `open_device` and `create_session` complete asynchronously by posting
/// [`SessionEvent`]s to the given sink.
pub trait CameraBackend: Send + 'static {
    /// Lists the identifiers of the attached devices.
    fn enumerate_devices(&mut self) -> Result<Vec<String>, HalError>;

    /// Queries the characteristics of a device.
    fn characteristics(&mut self, device_id: &str) -> Result<DeviceCharacteristics, HalError>;

    /// Starts acquiring a device. Completion arrives as `Opened`, `Error` or
    /// `Disconnected`.
    ///
    /// If posting `Opened` fails, nobody owns the handle any more and the
    /// backend releases the device itself. This covers a session closed
    /// while the open was still pending.
    fn open_device(&mut self, device_id: &str, events: EventSink) -> Result<(), HalError>;

    /// Starts configuring a capture session over the given outputs.
    /// Completion arrives as `SessionConfigured` or `SessionConfigureFailed`.
    fn create_session(
        &mut self,
        device: &DeviceHandle,
        outputs: &[SurfaceHandle],
        events: EventSink,
    ) -> Result<(), HalError>;

    /// Installs the repeating request on a configured session.
    fn set_repeating_request(
        &mut self,
        session: &SessionHandle,
        request: &CaptureRequest,
    ) -> Result<(), HalError>;

    /// Releases a device and any session on it.
    fn close_device(&mut self, device: DeviceHandle);
}

/// Callback the pool invokes each time a frame lands in a slot.
pub type FrameReadyListener = Arc<dyn Fn() + Send + Sync>;

/// A bounded pool of hardware-owned image buffers behind one surface.
pub trait ImagePool: Send + Sync + 'static {
    fn surface(&self) -> SurfaceHandle;

    /// Takes the oldest filled buffer out of the pool, if any.
    fn acquire_next(&self) -> Option<HardwareImage>;

    /// Returns a buffer to the pool so the hardware can refill it.
    fn release(&self, image: HardwareImage);

    /// Installs (or clears) the frame-ready listener.
    fn set_listener(&self, listener: Option<FrameReadyListener>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_race_classification() {
        assert!(HalError::DeviceClosed.is_race());
        assert!(HalError::SessionClosed.is_race());
        assert!(!HalError::Access(DeviceErrorCode::Service).is_race());

        assert_eq!(
            HalError::SessionClosed.failure_kind(),
            FailureKind::ConfigurationRace
        );
        assert_eq!(
            HalError::Enumeration("bus".into()).failure_kind(),
            FailureKind::DeviceAccess
        );
    }

    #[test]
    fn test_error_code_passthrough() {
        assert_eq!(
            HalError::Access(DeviceErrorCode::CameraInUse).error_code(),
            DeviceErrorCode::CameraInUse
        );
        assert_eq!(HalError::DeviceClosed.error_code(), DeviceErrorCode::Device);
    }
}
