//! Metrics collection and registry.

use crate::dispatch::DispatchStats;
use crate::session::SessionState;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of session and dispatch state for a metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Numeric session state, -1 for error.
    pub state_code: i64,
    pub streaming: bool,
    pub frames_delivered: u64,
    pub consumer_failures: u64,
    pub empty_acquisitions: u64,
    pub buffers_released: u64,
    pub frames_rejected: u64,
}

impl MetricsSnapshot {
    /// Creates a snapshot from the current session state and dispatcher counters.
    pub fn from_components(state: SessionState, dispatch: &DispatchStats) -> Self {
        Self {
            state_code: state.code(),
            streaming: state == SessionState::Streaming,
            frames_delivered: dispatch.delivered,
            consumer_failures: dispatch.consumer_failures,
            empty_acquisitions: dispatch.empty_acquisitions,
            buffers_released: dispatch.released,
            frames_rejected: dispatch.rejected,
        }
    }
}

/// Prometheus registry for a capture pipeline.
pub struct CaptureMetrics {
    registry: Registry,

    session_state: IntGauge,
    streaming: IntGauge,

    frames_delivered: IntCounter,
    consumer_failures: IntCounter,
    empty_acquisitions: IntCounter,
    buffers_released: IntCounter,
    frames_rejected: IntCounter,
}

impl CaptureMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let session_state = IntGauge::new(
            "vision_camera_session_state",
            "Session state (0=closed, 1=opening, 2=open, 3=configuring, 4=streaming, -1=error)",
        )?;
        let streaming = IntGauge::new(
            "vision_camera_streaming",
            "Whether the repeating request is armed (1=streaming)",
        )?;
        let frames_delivered = IntCounter::new(
            "vision_camera_frames_delivered_total",
            "Frames handed to the consumer successfully",
        )?;
        let consumer_failures = IntCounter::new(
            "vision_camera_consumer_failures_total",
            "Frames the consumer failed or panicked on",
        )?;
        let empty_acquisitions = IntCounter::new(
            "vision_camera_empty_acquisitions_total",
            "Frame-ready notifications with nothing to acquire",
        )?;
        let buffers_released = IntCounter::new(
            "vision_camera_buffers_released_total",
            "Buffers returned to the hardware pool",
        )?;
        let frames_rejected = IntCounter::new(
            "vision_camera_frames_rejected_total",
            "Frames discarded because the dispatcher was stopped",
        )?;

        registry.register(Box::new(session_state.clone()))?;
        registry.register(Box::new(streaming.clone()))?;
        registry.register(Box::new(frames_delivered.clone()))?;
        registry.register(Box::new(consumer_failures.clone()))?;
        registry.register(Box::new(empty_acquisitions.clone()))?;
        registry.register(Box::new(buffers_released.clone()))?;
        registry.register(Box::new(frames_rejected.clone()))?;

        Ok(Self {
            registry,
            session_state,
            streaming,
            frames_delivered,
            consumer_failures,
            empty_acquisitions,
            buffers_released,
            frames_rejected,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.session_state.set(snapshot.state_code);
        self.streaming.set(i64::from(snapshot.streaming));

        // Counters only move forward, so increment by the difference
        advance(&self.frames_delivered, snapshot.frames_delivered);
        advance(&self.consumer_failures, snapshot.consumer_failures);
        advance(&self.empty_acquisitions, snapshot.empty_acquisitions);
        advance(&self.buffers_released, snapshot.buffers_released);
        advance(&self.frames_rejected, snapshot.frames_rejected);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
