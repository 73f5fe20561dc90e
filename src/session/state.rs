//! Session states, hardware events and the observer interface.

use crate::hal::{DeviceHandle, SessionHandle};
use std::fmt;

/// Failure categories a session can end up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Capture permission was not granted.
    PermissionDenied,
    /// Hardware or driver failure during open, configuration or a query.
    DeviceAccess,
    /// Arming the repeating request raced a concurrent close.
    ConfigurationRace,
    /// The hardware rejected the session configuration.
    ConfigureFailed,
    /// The device went away (unplugged, reclaimed by the OS).
    Disconnected,
}

/// Lifecycle state of a [`CameraSession`](super::CameraSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Opening,
    Open,
    Configuring,
    Streaming,
    Error(FailureKind),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Configuring => "configuring",
            SessionState::Streaming => "streaming",
            SessionState::Error(_) => "error",
        }
    }

    /// Numeric code exported as a metric.
    pub fn code(&self) -> i64 {
        match self {
            SessionState::Closed => 0,
            SessionState::Opening => 1,
            SessionState::Open => 2,
            SessionState::Configuring => 3,
            SessionState::Streaming => 4,
            SessionState::Error(_) => -1,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionState::Error(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(kind) => write!(f, "error({:?})", kind),
            other => f.write_str(other.name()),
        }
    }
}

/// Device error codes reported by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorCode {
    CameraInUse,
    MaxCamerasInUse,
    Disabled,
    Device,
    Service,
}

impl DeviceErrorCode {
    /// Maps a numeric driver code. Unknown codes are treated as device faults.
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => DeviceErrorCode::CameraInUse,
            2 => DeviceErrorCode::MaxCamerasInUse,
            3 => DeviceErrorCode::Disabled,
            5 => DeviceErrorCode::Service,
            _ => DeviceErrorCode::Device,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    Unplugged,
    /// Taken over by a higher-priority client.
    Reclaimed,
    Unknown,
}

/// Callbacks delivered by the hardware, consumed by the session's dispatch
/// function and forwarded to the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened(DeviceHandle),
    Disconnected(DisconnectReason),
    Error(DeviceErrorCode),
    SessionConfigured(SessionHandle),
    SessionConfigureFailed,
    SessionClosed,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Opened(_) => "opened",
            SessionEvent::Disconnected(_) => "disconnected",
            SessionEvent::Error(_) => "error",
            SessionEvent::SessionConfigured(_) => "session_configured",
            SessionEvent::SessionConfigureFailed => "session_configure_failed",
            SessionEvent::SessionClosed => "session_closed",
        }
    }

    /// True for the events that signal a failure to the observer.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionEvent::Disconnected(_)
                | SessionEvent::Error(_)
                | SessionEvent::SessionConfigureFailed
        )
    }
}

/// Receives session notifications. Runs on the session's worker thread.
pub trait SessionObserver: Send + 'static {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(&SessionEvent) + Send + 'static,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_codes() {
        assert_eq!(DeviceErrorCode::from_raw(1), DeviceErrorCode::CameraInUse);
        assert_eq!(DeviceErrorCode::from_raw(4), DeviceErrorCode::Device);
        assert_eq!(DeviceErrorCode::from_raw(42), DeviceErrorCode::Device);
    }

    #[test]
    fn test_failure_events() {
        assert!(SessionEvent::SessionConfigureFailed.is_failure());
        assert!(SessionEvent::Error(DeviceErrorCode::Service).is_failure());
        assert!(!SessionEvent::SessionClosed.is_failure());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
        assert_eq!(
            SessionState::Error(FailureKind::Disconnected).to_string(),
            "error(Disconnected)"
        );
        assert_eq!(SessionState::default(), SessionState::Closed);
    }
}
