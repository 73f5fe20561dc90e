//! Output targets a session streams into.

use crate::hal::SurfaceHandle;
use std::sync::Arc;
use thiserror::Error;

/// An output target registered with a session.
///
/// The session only needs the opaque surface handle. Sinks that deliver
/// frames somewhere (see [`FrameDispatcher`](crate::dispatch::FrameDispatcher))
/// also get told when the session stops and restarts.
pub trait FrameSink: Send + Sync {
    /// The hardware surface frames are written into.
    fn surface(&self) -> SurfaceHandle;

    /// Stops deliveries. No frame reaches a consumer after this returns.
    fn shutdown(&self) {}

    /// Re-enables deliveries after a shutdown.
    fn resume(&self) {}
}

impl FrameSink for SurfaceHandle {
    fn surface(&self) -> SurfaceHandle {
        *self
    }
}

/// Errors from registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("sinks are frozen while the session is open")]
    Frozen,
    #[error("surface {0} is already registered")]
    Duplicate(SurfaceHandle),
}

/// Ordered set of output sinks.
///
/// Frozen by the session on open and thawed again on close.
#[derive(Default)]
pub struct FrameSinkRegistry {
    sinks: Vec<Arc<dyn FrameSink>>,
    frozen: bool,
}

impl FrameSinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink. Rejected while frozen or if its surface is already present.
    pub fn add_sink(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen);
        }
        let surface = sink.surface();
        if self.sinks.iter().any(|s| s.surface() == surface) {
            return Err(RegistryError::Duplicate(surface));
        }
        self.sinks.push(sink);
        Ok(())
    }

    /// Surfaces in registration order.
    pub fn surfaces(&self) -> Vec<SurfaceHandle> {
        self.sinks.iter().map(|s| s.surface()).collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Registered sinks, in order.
    pub fn entries(&self) -> Vec<Arc<dyn FrameSink>> {
        self.sinks.clone()
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn thaw(&mut self) {
        self.frozen = false;
    }
}
