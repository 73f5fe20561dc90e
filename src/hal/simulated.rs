//! Scriptable camera hardware for tests and demos.
//!
//! [`SimulatedHardware`] is the shared hardware state; [`SimulatedCamera`] is
//! the backend half handed to a session. The hardware handle stays with the
//! caller, which uses it to inject frames, disconnects and errors and to read
//! back what the session asked the hardware to do.

use super::{
    CameraBackend, DeviceCharacteristics, DeviceHandle, EventSink, HalError, ImagePool,
    SessionHandle, SimulatedImagePool, SurfaceHandle,
};
use crate::capture::{CaptureRequest, FpsRange};
use crate::lock;
use crate::session::{DeviceErrorCode, DisconnectReason, SessionEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A device the simulated hardware exposes.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub id: String,
    pub fps_ranges: Vec<FpsRange>,
    pub exposure_range_nanos: Option<(i64, i64)>,
    pub min_focus_distance: Option<f32>,
}

impl SimulatedDevice {
    pub fn new(id: impl Into<String>, fps_ranges: Vec<FpsRange>) -> Self {
        Self {
            id: id.into(),
            fps_ranges,
            exposure_range_nanos: Some((13_611, 100_000_000)),
            min_focus_distance: Some(10.0),
        }
    }

    fn characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics {
            device_id: self.id.clone(),
            fps_ranges: self.fps_ranges.clone(),
            exposure_range_nanos: self.exposure_range_nanos,
            min_focus_distance: self.min_focus_distance,
        }
    }
}

/// Record of the calls the hardware received.
#[derive(Debug, Clone, Default)]
pub struct SimulationLog {
    pub enumerations: usize,
    pub device_opens: usize,
    pub device_closes: usize,
    /// Output lists of every session configuration, in order.
    pub configured_outputs: Vec<Vec<SurfaceHandle>>,
    /// Every repeating request that was installed.
    pub requests: Vec<CaptureRequest>,
}

#[derive(Debug, Default)]
struct Behavior {
    fail_enumeration: bool,
    open_error: Option<DeviceErrorCode>,
    hold_open: bool,
    fail_characteristics: bool,
    fail_configure: bool,
    close_before_arming: bool,
    stream_frames: bool,
}

#[derive(Default)]
struct SimState {
    devices: Vec<SimulatedDevice>,
    behavior: Behavior,
    events: Option<EventSink>,
    held_open: Option<String>,
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
    repeating: Option<CaptureRequest>,
    pools: Vec<Arc<SimulatedImagePool>>,
    log: SimulationLog,
    next_token: u64,
    clock_nanos: i64,
}

impl SimState {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

/// Shared state of the simulated camera hardware.
#[derive(Clone, Default)]
pub struct SimulatedHardware {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: SimulatedDevice) -> Self {
        lock(&self.state).devices.push(device);
        self
    }

    /// Device enumeration fails.
    pub fn fail_enumeration(self) -> Self {
        lock(&self.state).behavior.fail_enumeration = true;
        self
    }

    /// Device open completes with an error callback instead of `Opened`.
    pub fn open_error(self, code: DeviceErrorCode) -> Self {
        lock(&self.state).behavior.open_error = Some(code);
        self
    }

    /// Device open never completes until [`complete_open`](Self::complete_open).
    pub fn hold_open(self) -> Self {
        lock(&self.state).behavior.hold_open = true;
        self
    }

    pub fn fail_characteristics(self) -> Self {
        lock(&self.state).behavior.fail_characteristics = true;
        self
    }

    /// Session configuration completes with `SessionConfigureFailed`.
    pub fn fail_configure(self) -> Self {
        lock(&self.state).behavior.fail_configure = true;
        self
    }

    /// Arming the repeating request fails as if the device closed underneath.
    pub fn close_before_arming(self) -> Self {
        lock(&self.state).behavior.close_before_arming = true;
        self
    }

    /// Produce frames on a sensor thread at the requested frame duration.
    pub fn stream_frames(self) -> Self {
        lock(&self.state).behavior.stream_frames = true;
        self
    }

    /// Creates the backend half to hand to a session.
    pub fn camera(&self) -> SimulatedCamera {
        SimulatedCamera {
            hardware: self.clone(),
            streamer: None,
        }
    }

    /// Connects an image pool to its surface.
    pub fn register_pool(&self, pool: Arc<SimulatedImagePool>) {
        lock(&self.state).pools.push(pool);
    }

    /// Writes one frame into every pool targeted by the repeating request.
    ///
    /// Returns the number of pools that accepted the frame.
    pub fn emit_frame(&self) -> usize {
        let (pools, timestamp) = {
            let mut state = lock(&self.state);
            let Some(request) = state.repeating.as_ref() else {
                return 0;
            };
            let step = request.frame_duration_nanos.unwrap_or(33_333_333);
            let targets = request.targets.clone();
            state.clock_nanos += step;
            let pools: Vec<_> = state
                .pools
                .iter()
                .filter(|p| targets.contains(&p.surface()))
                .cloned()
                .collect();
            (pools, state.clock_nanos)
        };
        pools.iter().filter(|p| p.produce(timestamp)).count()
    }

    /// Completes an open held back by [`hold_open`](Self::hold_open).
    pub fn complete_open(&self) -> bool {
        let (events, handle) = {
            let mut state = lock(&self.state);
            let Some(id) = state.held_open.take() else {
                return false;
            };
            let handle = DeviceHandle::new(id, state.token());
            state.device = Some(handle.clone());
            (state.events.clone(), handle)
        };
        if post(events, SessionEvent::Opened(handle.clone())) {
            return true;
        }
        self.abandon_open(&handle);
        false
    }

    /// Releases a device whose `Opened` callback had no receiver.
    fn abandon_open(&self, handle: &DeviceHandle) {
        let mut state = lock(&self.state);
        if state.device.as_ref() == Some(handle) {
            tracing::debug!(device = handle.id(), "Open completed after close, releasing device");
            state.device = None;
            state.events = None;
            state.log.device_closes += 1;
        }
    }

    /// Simulates the device being unplugged.
    pub fn disconnect(&self) -> bool {
        let events = lock(&self.state).events.clone();
        post(events, SessionEvent::Disconnected(DisconnectReason::Unplugged))
    }

    /// Simulates a fatal device error.
    pub fn raise_error(&self, code: DeviceErrorCode) -> bool {
        let events = lock(&self.state).events.clone();
        post(events, SessionEvent::Error(code))
    }

    /// Simulates the capture session being torn down by the hardware.
    pub fn close_session(&self) -> bool {
        let events = {
            let mut state = lock(&self.state);
            state.session = None;
            state.repeating = None;
            state.events.clone()
        };
        post(events, SessionEvent::SessionClosed)
    }

    pub fn log(&self) -> SimulationLog {
        lock(&self.state).log.clone()
    }

    pub fn is_device_open(&self) -> bool {
        lock(&self.state).device.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).repeating.is_some()
    }
}

fn post(events: Option<EventSink>, event: SessionEvent) -> bool {
    events.map(|e| e.post(event)).unwrap_or(false)
}

struct Streamer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`CameraBackend`] over [`SimulatedHardware`].
pub struct SimulatedCamera {
    hardware: SimulatedHardware,
    streamer: Option<Streamer>,
}

impl SimulatedCamera {
    fn start_streaming(&mut self, frame_duration: Duration) {
        self.stop_streaming();
        let hardware = self.hardware.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("sim-sensor".into())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    hardware.emit_frame();
                    thread::sleep(frame_duration);
                }
            });
        match spawned {
            Ok(handle) => self.streamer = Some(Streamer { stop, handle }),
            Err(e) => tracing::warn!(error = %e, "Failed to start sensor thread"),
        }
    }

    fn stop_streaming(&mut self) {
        if let Some(streamer) = self.streamer.take() {
            streamer.stop.store(true, Ordering::Release);
            if streamer.handle.join().is_err() {
                tracing::error!("Sensor thread panicked");
            }
        }
    }
}

impl CameraBackend for SimulatedCamera {
    fn enumerate_devices(&mut self) -> Result<Vec<String>, HalError> {
        let mut state = lock(&self.hardware.state);
        state.log.enumerations += 1;
        if state.behavior.fail_enumeration {
            return Err(HalError::Enumeration("camera service unavailable".into()));
        }
        Ok(state.devices.iter().map(|d| d.id.clone()).collect())
    }

    fn characteristics(&mut self, device_id: &str) -> Result<DeviceCharacteristics, HalError> {
        let state = lock(&self.hardware.state);
        if state.behavior.fail_characteristics {
            return Err(HalError::Access(DeviceErrorCode::Device));
        }
        state
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .map(SimulatedDevice::characteristics)
            .ok_or_else(|| HalError::DeviceNotFound(device_id.to_string()))
    }

    fn open_device(&mut self, device_id: &str, events: EventSink) -> Result<(), HalError> {
        let event = {
            let mut state = lock(&self.hardware.state);
            if !state.devices.iter().any(|d| d.id == device_id) {
                return Err(HalError::DeviceNotFound(device_id.to_string()));
            }
            state.log.device_opens += 1;
            state.events = Some(events.clone());

            if let Some(code) = state.behavior.open_error {
                SessionEvent::Error(code)
            } else if state.behavior.hold_open {
                state.held_open = Some(device_id.to_string());
                return Ok(());
            } else {
                let handle = DeviceHandle::new(device_id, state.token());
                state.device = Some(handle.clone());
                SessionEvent::Opened(handle)
            }
        };
        let opened = match &event {
            SessionEvent::Opened(handle) => Some(handle.clone()),
            _ => None,
        };
        if !events.post(event) {
            if let Some(handle) = opened {
                self.hardware.abandon_open(&handle);
            }
        }
        Ok(())
    }

    fn create_session(
        &mut self,
        device: &DeviceHandle,
        outputs: &[SurfaceHandle],
        events: EventSink,
    ) -> Result<(), HalError> {
        let event = {
            let mut state = lock(&self.hardware.state);
            if state.device.as_ref() != Some(device) {
                return Err(HalError::DeviceClosed);
            }
            state.log.configured_outputs.push(outputs.to_vec());
            state.events = Some(events.clone());

            if state.behavior.fail_configure {
                SessionEvent::SessionConfigureFailed
            } else {
                let session = SessionHandle::new(state.token());
                state.session = Some(session);
                SessionEvent::SessionConfigured(session)
            }
        };
        events.post(event);
        Ok(())
    }

    fn set_repeating_request(
        &mut self,
        session: &SessionHandle,
        request: &CaptureRequest,
    ) -> Result<(), HalError> {
        let stream = {
            let mut state = lock(&self.hardware.state);
            if state.behavior.close_before_arming {
                return Err(HalError::DeviceClosed);
            }
            if state.session != Some(*session) {
                return Err(HalError::SessionClosed);
            }
            if request.targets.is_empty() {
                return Err(HalError::InvalidRequest("request has no targets".into()));
            }
            state.log.requests.push(request.clone());
            state.repeating = Some(request.clone());
            state.behavior.stream_frames
        };

        if stream {
            let nanos = request.frame_duration_nanos.unwrap_or(33_333_333).max(1);
            self.start_streaming(Duration::from_nanos(nanos as u64));
        }
        Ok(())
    }

    fn close_device(&mut self, device: DeviceHandle) {
        self.stop_streaming();
        let mut state = lock(&self.hardware.state);
        if state.device.as_ref() == Some(&device) {
            state.device = None;
            state.session = None;
            state.repeating = None;
            state.events = None;
            state.log.device_closes += 1;
        } else {
            tracing::debug!(device = device.id(), "Close of a device that is not open");
        }
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}
