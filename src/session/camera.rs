//! Camera session state machine.
//!
//! The public [`CameraSession`] is a thin handle. While open, everything that
//! touches hardware lives in a [`SessionCore`] owned by the session's worker
//! thread: the backend, the device and session handles, the configuration
//! snapshot and the observer. Hardware callbacks are posted onto the same
//! worker and fed through [`SessionCore::dispatch`], so they never run
//! concurrently with each other or with hardware calls.

use super::state::{FailureKind, SessionEvent, SessionObserver, SessionState};
use super::worker::{WorkerContext, WorkerError, WorkerHandle};
use crate::capture::{
    select_fps_range, CaptureConfiguration, CaptureRequest, ConfigError, FrameSink,
    FrameSinkRegistry, RegistryError,
};
use crate::hal::{
    CameraBackend, DeviceCharacteristics, DeviceHandle, EventSink, HalError, SessionHandle,
    SurfaceHandle,
};
use crate::lock;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors returned by the public session API.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("capture permission not granted")]
    PermissionDenied,
    #[error("session is already open")]
    AlreadyOpen,
    #[error("no output sinks registered")]
    NoSinks,
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("device enumeration failed: {0}")]
    Enumeration(HalError),
    #[error("no device is open")]
    NoDevice,
    #[error("camera backend is unavailable")]
    BackendUnavailable,
    #[error("invalid capture configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sinks(#[from] RegistryError),
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
    #[error("hardware error: {0}")]
    Hal(#[from] HalError),
}

impl SessionError {
    /// Failure category, for errors that map onto one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SessionError::PermissionDenied => Some(FailureKind::PermissionDenied),
            SessionError::DeviceNotFound(_) | SessionError::Enumeration(_) => {
                Some(FailureKind::DeviceAccess)
            }
            SessionError::Hal(e) => Some(e.failure_kind()),
            _ => None,
        }
    }
}

/// State shared between the public handle and the worker.
#[derive(Default)]
struct Shared {
    state: Mutex<SessionState>,
    worker_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn on_worker(&self) -> bool {
        *lock(&self.worker_thread) == Some(thread::current().id())
    }

    fn get(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set(&self, next: SessionState) {
        let mut state = lock(&self.state);
        let prev = *state;
        if prev != next {
            debug!(from = %prev, to = %next, "Session state transition");
            *state = next;
        }
    }
}

/// Hardware-facing half of a session. Only ever touched on the worker.
pub(crate) struct SessionCore<B> {
    backend: B,
    config: CaptureConfiguration,
    observer: Option<Box<dyn SessionObserver>>,
    shared: Arc<Shared>,
    device_id: String,
    surfaces: Vec<SurfaceHandle>,
    events: Option<EventSink>,
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
    request: Option<CaptureRequest>,
}

impl<B: CameraBackend> SessionCore<B> {
    fn state(&self) -> SessionState {
        self.shared.get()
    }

    fn set_state(&self, next: SessionState) {
        self.shared.set(next);
    }

    fn notify(&self, event: &SessionEvent) {
        match &self.observer {
            Some(observer) => observer.on_event(event),
            None => debug!(event = event.name(), "No observer, event dropped"),
        }
    }

    /// Single entry point for hardware callbacks.
    fn dispatch(&mut self, event: SessionEvent) {
        let state = self.state();
        if state == SessionState::Closed {
            debug!(event = event.name(), "Ignoring event for closed session");
            return;
        }

        match &event {
            SessionEvent::Opened(device) => self.on_opened(device.clone()),
            SessionEvent::Disconnected(reason) => {
                warn!(device = %self.device_id, ?reason, "Camera disconnected");
                self.fail(FailureKind::Disconnected);
                self.notify(&event);
            }
            SessionEvent::Error(code) => {
                error!(device = %self.device_id, ?code, "Camera device error");
                self.fail(FailureKind::DeviceAccess);
                self.notify(&event);
            }
            SessionEvent::SessionConfigured(session) => self.on_configured(*session),
            SessionEvent::SessionConfigureFailed => {
                if state != SessionState::Configuring {
                    debug!(%state, "Stale configure failure ignored");
                    return;
                }
                error!(device = %self.device_id, "Capture session configuration failed");
                self.fail(FailureKind::ConfigureFailed);
                self.notify(&event);
            }
            SessionEvent::SessionClosed => {
                self.session = None;
                if state == SessionState::Streaming {
                    info!(device = %self.device_id, "Capture session closed by hardware");
                    self.set_state(SessionState::Open);
                }
            }
        }
    }

    fn acquire_device(&mut self, events: EventSink) {
        self.events = Some(events.clone());
        info!(device = %self.device_id, "Requesting camera device");
        if let Err(e) = self.backend.open_device(&self.device_id, events) {
            self.hardware_failure(e);
        }
    }

    fn on_opened(&mut self, device: DeviceHandle) {
        if self.state() != SessionState::Opening || self.device.is_some() {
            warn!(device = device.id(), state = %self.state(), "Unexpected device open, releasing");
            self.backend.close_device(device);
            return;
        }
        info!(device = device.id(), "Camera device opened");
        self.device = Some(device.clone());
        self.set_state(SessionState::Open);
        self.notify(&SessionEvent::Opened(device));
        // The observer may have closed the session.
        if self.state() == SessionState::Open {
            self.configure();
        }
    }

    /// Merges the configuration with the device's fps ranges and submits the
    /// outputs for a new capture session.
    fn configure(&mut self) {
        let (Some(device), Some(events)) = (self.device.clone(), self.events.clone()) else {
            return;
        };

        let characteristics = match self.backend.characteristics(device.id()) {
            Ok(c) => c,
            Err(e) => return self.hardware_failure(e),
        };

        let fps_range = match self.config.target_fps_range {
            Some(fixed) => {
                if !characteristics.fps_ranges.contains(&fixed) {
                    warn!(range = %fixed, "Fixed fps range is not advertised by the device");
                }
                Some(fixed)
            }
            None => select_fps_range(&characteristics.fps_ranges),
        };
        match fps_range {
            Some(range) => info!(range = %range, "Target fps range selected"),
            None => warn!("Device advertises no fps ranges, leaving target unset"),
        }

        self.request = Some(CaptureRequest::build(&self.config, fps_range, &self.surfaces));
        self.set_state(SessionState::Configuring);

        if let Err(e) = self.backend.create_session(&device, &self.surfaces, events) {
            self.hardware_failure(e);
        }
    }

    fn on_configured(&mut self, session: SessionHandle) {
        if self.state() != SessionState::Configuring {
            debug!(state = %self.state(), "Stale session configuration ignored");
            return;
        }
        let Some(request) = self.request.as_ref() else {
            return;
        };

        match self.backend.set_repeating_request(&session, request) {
            Ok(()) => {
                self.session = Some(session);
                self.set_state(SessionState::Streaming);
                info!(
                    device = %self.device_id,
                    outputs = self.surfaces.len(),
                    "Repeating request armed, streaming"
                );
            }
            Err(e) => self.hardware_failure(e),
        }
    }

    /// Converts a hardware error into a state transition and notification.
    /// Races with a concurrent close are only logged.
    fn hardware_failure(&mut self, e: HalError) {
        if e.is_race() {
            warn!(error = %e, state = %self.state(), "Configuration raced a close, leaving state as is");
            return;
        }
        error!(device = %self.device_id, error = %e, "Camera hardware failure");
        self.fail(e.failure_kind());
        self.notify(&SessionEvent::Error(e.error_code()));
    }

    fn fail(&mut self, kind: FailureKind) {
        self.release_device();
        self.set_state(SessionState::Error(kind));
    }

    fn release_device(&mut self) {
        self.session = None;
        if let Some(device) = self.device.take() {
            self.backend.close_device(device);
        }
    }

    fn characteristics(&mut self) -> Result<DeviceCharacteristics, SessionError> {
        let device = self.device.as_ref().ok_or(SessionError::NoDevice)?;
        let id = device.id().to_string();
        Ok(self.backend.characteristics(&id)?)
    }

    fn teardown(&mut self) {
        self.release_device();
        self.events = None;
        self.request = None;
        self.set_state(SessionState::Closed);
    }
}

fn event_sink<B: CameraBackend>(worker: WorkerHandle<SessionCore<B>>) -> EventSink {
    EventSink::new(move |event| {
        worker
            .post(move |core: &mut SessionCore<B>| core.dispatch(event))
            .is_ok()
    })
}

struct Lifecycle<B> {
    parked: Option<SessionCore<B>>,
    worker: Option<WorkerContext<SessionCore<B>>>,
    // Worker stopped from its own thread; joined by the next caller.
    detached: Option<JoinHandle<SessionCore<B>>>,
}

/// Builder for a [`CameraSession`].
pub struct CameraSessionBuilder<B> {
    backend: B,
    config: CaptureConfiguration,
    observer: Option<Box<dyn SessionObserver>>,
    worker_name: String,
}

impl<B: CameraBackend> CameraSessionBuilder<B> {
    pub fn config(mut self, config: CaptureConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: impl SessionObserver) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Validates the configuration and builds a closed session.
    pub fn build(self) -> Result<CameraSession<B>, SessionError> {
        self.config.validate()?;
        let shared = Arc::new(Shared::default());
        let core = SessionCore {
            backend: self.backend,
            config: self.config,
            observer: self.observer,
            shared: Arc::clone(&shared),
            device_id: String::new(),
            surfaces: Vec::new(),
            events: None,
            device: None,
            session: None,
            request: None,
        };
        Ok(CameraSession {
            worker_name: self.worker_name,
            shared,
            sinks: Mutex::new(FrameSinkRegistry::new()),
            lifecycle: Mutex::new(Lifecycle {
                parked: Some(core),
                worker: None,
                detached: None,
            }),
        })
    }
}

/// A camera device session for fixed-parameter machine-vision capture.
///
/// All methods take `&self` and may be called from any thread. `open` returns
/// once device acquisition has been requested; progress after that is
/// reported through the observer and [`state`](Self::state). `close` blocks
/// until the worker has drained.
pub struct CameraSession<B: CameraBackend> {
    worker_name: String,
    shared: Arc<Shared>,
    sinks: Mutex<FrameSinkRegistry>,
    lifecycle: Mutex<Lifecycle<B>>,
}

impl<B: CameraBackend> CameraSession<B> {
    pub fn builder(backend: B) -> CameraSessionBuilder<B> {
        CameraSessionBuilder {
            backend,
            config: CaptureConfiguration::default(),
            observer: None,
            worker_name: "camera-worker".to_string(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.get()
    }

    /// The failure that put the session into `Error`, if it is there.
    pub fn last_failure(&self) -> Option<FailureKind> {
        match self.state() {
            SessionState::Error(kind) => Some(kind),
            _ => None,
        }
    }

    /// Locks the lifecycle. On the worker thread the lock may be held by a
    /// close that is waiting for this very worker, so it is only tried.
    fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle<B>>, SessionError> {
        if !self.shared.on_worker() {
            return Ok(lock(&self.lifecycle));
        }
        match self.lifecycle.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => Err(WorkerError::Reentrant.into()),
        }
    }

    /// True while a worker thread is running for this session.
    pub fn is_worker_running(&self) -> bool {
        self.lifecycle()
            .map(|l| l.worker.is_some())
            .unwrap_or(true)
    }

    /// Registers an output sink. Only allowed while the session is closed.
    pub fn add_sink(&self, sink: Arc<dyn FrameSink>) -> Result<(), SessionError> {
        let surface = sink.surface();
        lock(&self.sinks).add_sink(sink).map_err(|e| {
            warn!(%surface, error = %e, "Sink not added");
            SessionError::from(e)
        })
    }

    /// Joins a worker that was stopped from its own thread and parks the
    /// core it hands back. The join happens outside the lifecycle lock.
    fn reclaim(&self) -> Result<(), SessionError> {
        let Some(join) = self.lifecycle()?.detached.take() else {
            return Ok(());
        };
        if join.thread().id() == thread::current().id() {
            self.lifecycle()?.detached = Some(join);
            return Err(WorkerError::Reentrant.into());
        }
        let core = join.join().map_err(|_| {
            error!("Detached camera worker panicked, backend lost");
            WorkerError::Panicked
        })?;
        debug!("Reclaimed backend from detached worker");
        self.lifecycle()?.parked = Some(core);
        Ok(())
    }

    /// Replaces the capture configuration. Only allowed while closed.
    pub fn reconfigure(&self, config: CaptureConfiguration) -> Result<(), SessionError> {
        config.validate()?;
        self.reclaim()?;
        let mut lifecycle = self.lifecycle()?;
        if lifecycle.worker.is_some() {
            return Err(SessionError::AlreadyOpen);
        }
        let core = lifecycle
            .parked
            .as_mut()
            .ok_or(SessionError::BackendUnavailable)?;
        core.config = config;
        Ok(())
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Option<CaptureConfiguration> {
        if let Err(e) = self.reclaim() {
            debug!(error = %e, "Backend not reclaimed");
        }
        let lifecycle = self.lifecycle().ok()?;
        if let Some(core) = lifecycle.parked.as_ref() {
            return Some(core.config.clone());
        }
        let handle = lifecycle.worker.as_ref()?.handle();
        drop(lifecycle);
        handle.call(|core| core.config.clone()).ok()
    }

    /// Starts opening `device_id`.
    ///
    /// Fails without touching the hardware when permission was not granted,
    /// and without starting a worker when the device cannot be enumerated.
    pub fn open(&self, device_id: &str, permission_granted: bool) -> Result<(), SessionError> {
        if !permission_granted {
            warn!(device = device_id, "Capture permission not granted");
            return Err(SessionError::PermissionDenied);
        }

        self.reclaim()?;
        let mut lifecycle = self.lifecycle()?;
        if lifecycle.worker.is_some() {
            return Err(SessionError::AlreadyOpen);
        }
        let mut core = lifecycle
            .parked
            .take()
            .ok_or(SessionError::BackendUnavailable)?;

        let surfaces = match self.prepare(&mut core, device_id) {
            Ok(surfaces) => surfaces,
            Err(e) => {
                lifecycle.parked = Some(core);
                return Err(e);
            }
        };

        core.device_id = device_id.to_string();
        core.surfaces = surfaces;
        self.shared.set(SessionState::Opening);

        let worker = match WorkerContext::spawn(&self.worker_name, core) {
            Ok(worker) => worker,
            Err(e) => {
                error!(error = %e, "Failed to start camera worker");
                self.shared.set(SessionState::Closed);
                self.thaw_sinks();
                return Err(e.into());
            }
        };

        *lock(&self.shared.worker_thread) = Some(worker.thread_id());
        let events = event_sink(worker.handle());
        worker.post(move |core| core.acquire_device(events))?;
        lifecycle.worker = Some(worker);
        Ok(())
    }

    /// Enumerates devices and freezes the sink registry.
    fn prepare(
        &self,
        core: &mut SessionCore<B>,
        device_id: &str,
    ) -> Result<Vec<SurfaceHandle>, SessionError> {
        let mut sinks = lock(&self.sinks);
        if sinks.is_empty() {
            warn!("Open requested with no output sinks");
            return Err(SessionError::NoSinks);
        }

        let devices = core.backend.enumerate_devices().map_err(|e| {
            error!(error = %e, "Device enumeration failed");
            SessionError::Enumeration(e)
        })?;
        if !devices.iter().any(|d| d == device_id) {
            warn!(device = device_id, available = ?devices, "Device not found");
            return Err(SessionError::DeviceNotFound(device_id.to_string()));
        }

        sinks.freeze();
        let entries = sinks.entries();
        drop(sinks);
        for sink in &entries {
            sink.resume();
        }
        Ok(entries.iter().map(|s| s.surface()).collect())
    }

    fn thaw_sinks(&self) {
        let entries = lock(&self.sinks).entries();
        for sink in &entries {
            sink.shutdown();
        }
        lock(&self.sinks).thaw();
    }

    /// Queries the characteristics of the open device.
    pub fn characteristics(&self) -> Result<DeviceCharacteristics, SessionError> {
        let handle = self
            .lifecycle()?
            .worker
            .as_ref()
            .map(|w| w.handle())
            .ok_or(SessionError::NoDevice)?;
        handle.call(|core| core.characteristics())?
    }

    /// Releases the device, stops the worker and waits for it to drain.
    ///
    /// Safe to call from any state and any number of times. When called from
    /// the worker thread (for instance from an observer), the worker is told
    /// to stop but not waited for; the next `open` from another thread joins
    /// it and takes the backend back.
    pub fn close(&self) -> Result<(), SessionError> {
        let Ok(mut lifecycle) = self.lifecycle() else {
            // Another thread is closing and waiting on this worker.
            debug!("Close already in progress");
            return Ok(());
        };

        let Some(worker) = lifecycle.worker.take() else {
            debug!("Close on a closed session");
            return Ok(());
        };

        self.thaw_sinks();
        if let Err(e) = worker.post(|core| core.teardown()) {
            warn!(error = %e, "Teardown could not be queued");
        }

        if worker.is_current() {
            debug!("Session closed from its own worker, join deferred");
            lifecycle.detached = worker.stop_detached();
        } else {
            match worker.stop_and_join() {
                Ok(core) => lifecycle.parked = Some(core),
                Err(e) => error!(error = %e, "Camera worker did not stop cleanly"),
            }
        }
        *lock(&self.shared.worker_thread) = None;
        self.shared.set(SessionState::Closed);
        info!("Camera session closed");
        Ok(())
    }
}

impl<B: CameraBackend> Drop for CameraSession<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Close on drop failed");
        }
    }
}
