use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use vision_camera::capture::{
    AutoExposureMode, AutoFocusMode, CaptureConfiguration, FpsRange, FrameBuffer, PixelFormat,
    RegistryError, WhiteBalanceMode,
};
use vision_camera::dispatch::{ConsumerError, FrameDispatcher};
use vision_camera::hal::{
    PoolConfig, SimulatedCamera, SimulatedDevice, SimulatedHardware, SimulatedImagePool,
    SurfaceHandle,
};
use vision_camera::session::{
    CameraSession, DeviceErrorCode, FailureKind, SessionError, SessionEvent, SessionState,
};

type Session = CameraSession<SimulatedCamera>;
type Events = Arc<Mutex<Vec<SessionEvent>>>;

struct Rig {
    hardware: SimulatedHardware,
    pool: Arc<SimulatedImagePool>,
    dispatcher: Arc<FrameDispatcher<SimulatedImagePool>>,
    delivered: Arc<AtomicUsize>,
    events: Events,
    session: Session,
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn device() -> SimulatedDevice {
    SimulatedDevice::new(
        "0",
        vec![
            FpsRange::new(15, 15),
            FpsRange::new(15, 30),
            FpsRange::new(24, 30),
        ],
    )
}

fn surface() -> SurfaceHandle {
    SurfaceHandle::new(1)
}

fn recorder() -> (Events, impl Fn(&SessionEvent) + Send + 'static) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |e: &SessionEvent| sink.lock().unwrap().push(e.clone()))
}

fn rig_with(hardware: SimulatedHardware, config: CaptureConfiguration) -> Rig {
    let pool = Arc::new(SimulatedImagePool::new(
        surface(),
        PoolConfig {
            format: PixelFormat::Gray8,
            width: 16,
            height: 8,
            depth: 1,
        },
    ));
    hardware.register_pool(Arc::clone(&pool));

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let dispatcher = FrameDispatcher::attach(Arc::clone(&pool), move |f: &FrameBuffer<'_>| {
        assert!(f.is_valid());
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), ConsumerError>(())
    });

    let (events, observer) = recorder();
    let session = CameraSession::builder(hardware.camera())
        .config(config)
        .observer(observer)
        .build()
        .unwrap();
    session.add_sink(dispatcher.clone()).unwrap();

    Rig {
        hardware,
        pool,
        dispatcher,
        delivered,
        events,
        session,
    }
}

fn rig(hardware: SimulatedHardware) -> Rig {
    rig_with(hardware, CaptureConfiguration::default())
}

fn streaming_rig() -> Rig {
    let rig = rig(SimulatedHardware::new().with_device(device()));
    rig.session.open("0", true).unwrap();
    assert!(wait_until(|| rig.session.state() == SessionState::Streaming));
    rig
}

fn events(rig: &Rig) -> Vec<SessionEvent> {
    rig.events.lock().unwrap().clone()
}

#[test]
fn test_open_reaches_streaming_and_delivers() {
    let rig = streaming_rig();

    assert!(matches!(events(&rig).as_slice(), [SessionEvent::Opened(_)]));
    assert_eq!(rig.hardware.emit_frame(), 1);
    assert_eq!(rig.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(rig.pool.outstanding(), 0);
    assert_eq!(rig.pool.stats().released, 1);
}

#[test]
fn test_request_uses_fastest_range_and_manual_controls() {
    let rig = streaming_rig();
    let log = rig.hardware.log();

    assert_eq!(log.requests.len(), 1);
    let request = &log.requests[0];
    assert_eq!(request.target_fps_range, Some(FpsRange::new(24, 30)));
    assert_eq!(request.targets, vec![surface()]);
    assert_eq!(request.af_mode, AutoFocusMode::Off);
    assert_eq!(request.ae_mode, AutoExposureMode::Off);
    assert_eq!(request.awb_mode, WhiteBalanceMode::Auto);
    assert_eq!(request.focus_distance_diopters, Some(0.333));
    assert_eq!(request.exposure_time_nanos, Some(8_000_000));
    assert_eq!(request.frame_duration_nanos, Some(16_666_668));
}

#[test]
fn test_fixed_fps_range_overrides_selection() {
    let config = CaptureConfiguration {
        target_fps_range: Some(FpsRange::new(15, 30)),
        ..Default::default()
    };
    let rig = rig_with(SimulatedHardware::new().with_device(device()), config);
    rig.session.open("0", true).unwrap();
    assert!(wait_until(|| rig.session.state() == SessionState::Streaming));

    assert_eq!(
        rig.hardware.log().requests[0].target_fps_range,
        Some(FpsRange::new(15, 30))
    );
}

#[test]
fn test_sinks_frozen_while_open() {
    let rig = streaming_rig();

    let err = rig
        .session
        .add_sink(Arc::new(SurfaceHandle::new(9)))
        .unwrap_err();
    assert!(matches!(err, SessionError::Sinks(RegistryError::Frozen)));
    assert_eq!(rig.hardware.log().configured_outputs, vec![vec![surface()]]);

    rig.session.close().unwrap();
    assert!(rig.session.add_sink(Arc::new(SurfaceHandle::new(9))).is_ok());
}

#[test]
fn test_close_is_idempotent() {
    let rig = streaming_rig();

    rig.session.close().unwrap();
    assert_eq!(rig.session.state(), SessionState::Closed);
    rig.session.close().unwrap();
    assert_eq!(rig.session.state(), SessionState::Closed);

    assert!(!rig.session.is_worker_running());
    assert!(!rig.hardware.is_device_open());
    assert_eq!(rig.hardware.log().device_closes, 1);
}

#[test]
fn test_close_on_never_opened_session() {
    let rig = rig(SimulatedHardware::new().with_device(device()));
    rig.session.close().unwrap();
    assert_eq!(rig.session.state(), SessionState::Closed);
}

#[test]
fn test_nothing_delivered_after_close() {
    let rig = streaming_rig();
    rig.session.close().unwrap();
    let before = events(&rig);

    assert_eq!(rig.hardware.emit_frame(), 0);
    assert!(!rig.hardware.disconnect());
    // A late frame that was already in flight in the hardware.
    rig.pool.produce(99);

    assert_eq!(rig.delivered.load(Ordering::SeqCst), 0);
    assert_eq!(rig.dispatcher.stats().rejected, 1);
    assert_eq!(rig.pool.outstanding(), 0);
    assert_eq!(events(&rig), before);
    assert_eq!(rig.session.state(), SessionState::Closed);
}

#[test]
fn test_sensor_thread_stops_with_close() {
    let rig = rig(
        SimulatedHardware::new()
            .with_device(device())
            .stream_frames(),
    );
    rig.session.open("0", true).unwrap();
    assert!(wait_until(|| rig.delivered.load(Ordering::SeqCst) >= 3));

    rig.session.close().unwrap();
    let after_close = rig.delivered.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(rig.delivered.load(Ordering::SeqCst), after_close);
    assert_eq!(rig.pool.outstanding(), 0);
}

#[test]
fn test_permission_denied_touches_nothing() {
    let rig = rig(SimulatedHardware::new().with_device(device()));

    let err = rig.session.open("0", false).unwrap_err();

    assert!(matches!(err, SessionError::PermissionDenied));
    assert_eq!(err.kind(), Some(FailureKind::PermissionDenied));
    assert!(!rig.session.is_worker_running());
    assert_eq!(rig.session.state(), SessionState::Closed);
    let log = rig.hardware.log();
    assert_eq!(log.enumerations, 0);
    assert_eq!(log.device_opens, 0);
    assert!(events(&rig).is_empty());
}

#[test]
fn test_configure_failure_reported_once() {
    let rig = rig(
        SimulatedHardware::new()
            .with_device(device())
            .fail_configure(),
    );
    rig.session.open("0", true).unwrap();

    assert!(wait_until(|| rig.session.state()
        == SessionState::Error(FailureKind::ConfigureFailed)));
    assert!(wait_until(|| !rig.hardware.is_device_open()));

    let failures = events(&rig)
        .iter()
        .filter(|e| **e == SessionEvent::SessionConfigureFailed)
        .count();
    assert_eq!(failures, 1);
    assert!(rig.hardware.log().requests.is_empty());
}

#[test]
fn test_disconnect_while_streaming() {
    let rig = streaming_rig();

    assert!(rig.hardware.disconnect());
    assert!(wait_until(|| rig.session.state()
        == SessionState::Error(FailureKind::Disconnected)));
    assert!(wait_until(|| !rig.hardware.is_device_open()));
    assert_eq!(rig.session.last_failure(), Some(FailureKind::Disconnected));
    assert!(events(&rig)
        .iter()
        .any(|e| matches!(e, SessionEvent::Disconnected(_))));

    // Error is terminal until close.
    assert!(matches!(
        rig.session.characteristics(),
        Err(SessionError::NoDevice)
    ));
    rig.session.close().unwrap();
    assert_eq!(rig.session.state(), SessionState::Closed);
}

#[test]
fn test_open_error_callback() {
    let rig = rig(
        SimulatedHardware::new()
            .with_device(device())
            .open_error(DeviceErrorCode::CameraInUse),
    );
    rig.session.open("0", true).unwrap();

    assert!(wait_until(|| rig.session.state()
        == SessionState::Error(FailureKind::DeviceAccess)));
    assert!(events(&rig).contains(&SessionEvent::Error(DeviceErrorCode::CameraInUse)));
}

#[test]
fn test_close_racing_configuration_is_not_an_error() {
    let rig = rig(
        SimulatedHardware::new()
            .with_device(device())
            .close_before_arming(),
    );
    rig.session.open("0", true).unwrap();

    assert!(wait_until(|| rig.hardware.log().configured_outputs.len() == 1));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(rig.session.state(), SessionState::Configuring);
    assert!(!events(&rig).iter().any(SessionEvent::is_failure));
    assert!(rig.hardware.log().requests.is_empty());
}

#[test]
fn test_hardware_session_close_returns_to_open() {
    let rig = streaming_rig();

    assert!(rig.hardware.close_session());
    assert!(wait_until(|| rig.session.state() == SessionState::Open));
    assert!(rig.hardware.is_device_open());
}

#[test]
fn test_enumeration_failure() {
    let rig = rig(
        SimulatedHardware::new()
            .with_device(device())
            .fail_enumeration(),
    );

    let err = rig.session.open("0", true).unwrap_err();

    assert!(matches!(err, SessionError::Enumeration(_)));
    assert_eq!(err.kind(), Some(FailureKind::DeviceAccess));
    assert!(!rig.session.is_worker_running());
    assert_eq!(rig.session.state(), SessionState::Closed);
    assert!(rig.session.add_sink(Arc::new(SurfaceHandle::new(2))).is_ok());
}

#[test]
fn test_unknown_device() {
    let rig = rig(SimulatedHardware::new().with_device(device()));

    let err = rig.session.open("7", true).unwrap_err();

    assert!(matches!(err, SessionError::DeviceNotFound(ref id) if id == "7"));
    assert_eq!(rig.hardware.log().device_opens, 0);
}

#[test]
fn test_open_without_sinks() {
    let hardware = SimulatedHardware::new().with_device(device());
    let session = CameraSession::builder(hardware.camera()).build().unwrap();

    assert!(matches!(session.open("0", true), Err(SessionError::NoSinks)));
    assert_eq!(hardware.log().enumerations, 0);
}

#[test]
fn test_open_twice() {
    let rig = streaming_rig();
    assert!(matches!(
        rig.session.open("0", true),
        Err(SessionError::AlreadyOpen)
    ));
    assert_eq!(rig.hardware.log().device_opens, 1);
}

#[test]
fn test_reopen_after_close() {
    let rig = streaming_rig();
    rig.session.close().unwrap();

    rig.session.open("0", true).unwrap();
    assert!(wait_until(|| rig.session.state() == SessionState::Streaming));

    assert_eq!(rig.hardware.log().device_opens, 2);
    assert_eq!(rig.hardware.emit_frame(), 1);
    assert_eq!(rig.delivered.load(Ordering::SeqCst), 1);
}

#[test]
fn test_characteristics() {
    let rig = rig(SimulatedHardware::new().with_device(device()));
    assert!(matches!(
        rig.session.characteristics(),
        Err(SessionError::NoDevice)
    ));

    rig.session.open("0", true).unwrap();
    assert!(wait_until(|| rig.session.state() == SessionState::Streaming));

    let characteristics = rig.session.characteristics().unwrap();
    assert_eq!(characteristics.device_id, "0");
    assert_eq!(characteristics.fps_ranges.len(), 3);
}

#[test]
fn test_reconfigure_only_while_closed() {
    let rig = streaming_rig();
    let config = CaptureConfiguration::with_exposure(4_000_000);

    assert!(matches!(
        rig.session.reconfigure(config.clone()),
        Err(SessionError::AlreadyOpen)
    ));
    assert_eq!(rig.session.config(), Some(CaptureConfiguration::default()));

    rig.session.close().unwrap();
    rig.session.reconfigure(config).unwrap();
    rig.session.open("0", true).unwrap();
    assert!(wait_until(|| rig.session.state() == SessionState::Streaming));

    assert_eq!(rig.hardware.log().requests[1].exposure_time_nanos, Some(4_000_000));
}

#[test]
fn test_invalid_config_rejected_at_build() {
    let hardware = SimulatedHardware::new().with_device(device());
    let config = CaptureConfiguration {
        exposure_time_nanos: 20_000_000,
        frame_duration_nanos: 16_666_668,
        ..Default::default()
    };

    let result = CameraSession::builder(hardware.camera()).config(config).build();
    assert!(matches!(result, Err(SessionError::Config(_))));
}

#[test]
fn test_close_mid_opening() {
    let rig = rig(
        SimulatedHardware::new()
            .with_device(device())
            .hold_open(),
    );
    rig.session.open("0", true).unwrap();
    assert!(wait_until(|| rig.hardware.log().device_opens == 1));
    assert_eq!(rig.session.state(), SessionState::Opening);

    rig.session.close().unwrap();

    assert!(!rig.hardware.complete_open());
    assert_eq!(rig.session.state(), SessionState::Closed);
    assert!(events(&rig).is_empty());
    assert!(!rig.hardware.is_device_open());
    assert_eq!(rig.hardware.log().device_closes, 1);
}

#[test]
fn test_failing_consumer_does_not_affect_session() {
    let hardware = SimulatedHardware::new().with_device(device());
    let pool = Arc::new(SimulatedImagePool::new(surface(), PoolConfig::default()));
    hardware.register_pool(Arc::clone(&pool));
    let dispatcher = FrameDispatcher::attach(Arc::clone(&pool), |_: &FrameBuffer<'_>| {
        Err::<(), _>(ConsumerError::new("downstream closed"))
    });

    let session = CameraSession::builder(hardware.camera()).build().unwrap();
    session.add_sink(dispatcher.clone()).unwrap();
    session.open("0", true).unwrap();
    assert!(wait_until(|| session.state() == SessionState::Streaming));

    hardware.emit_frame();
    hardware.emit_frame();

    assert_eq!(dispatcher.stats().consumer_failures, 2);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(session.state(), SessionState::Streaming);
}

#[test]
fn test_observer_may_close_from_worker() {
    let hardware = SimulatedHardware::new().with_device(device());
    let slot: Arc<OnceLock<Weak<Session>>> = Arc::new(OnceLock::new());
    let closer = Arc::clone(&slot);
    let closed = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&closed);

    let session = Arc::new(
        CameraSession::builder(hardware.camera())
            .observer(move |event: &SessionEvent| {
                // Only the first open is cut short.
                if matches!(event, SessionEvent::Opened(_)) && count.load(Ordering::SeqCst) == 0 {
                    if let Some(session) = closer.get().and_then(Weak::upgrade) {
                        session.close().unwrap();
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .build()
            .unwrap(),
    );
    slot.set(Arc::downgrade(&session)).unwrap();
    session.add_sink(Arc::new(surface())).unwrap();

    session.open("0", true).unwrap();

    assert!(wait_until(|| closed.load(Ordering::SeqCst) == 1));
    assert!(wait_until(|| !hardware.is_device_open()));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.is_worker_running());
    assert!(hardware.log().configured_outputs.is_empty());

    // The backend comes back for the next open.
    session.open("0", true).unwrap();
    assert!(wait_until(|| session.state() == SessionState::Streaming));
    assert_eq!(hardware.log().device_opens, 2);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    session.close().unwrap();
}

#[test]
fn test_reconfigure_after_close_from_worker() {
    let hardware = SimulatedHardware::new().with_device(device());
    let slot: Arc<OnceLock<Weak<Session>>> = Arc::new(OnceLock::new());
    let closer = Arc::clone(&slot);

    let session = Arc::new(
        CameraSession::builder(hardware.camera())
            .observer(move |event: &SessionEvent| {
                if matches!(event, SessionEvent::Opened(_)) {
                    if let Some(session) = closer.get().and_then(Weak::upgrade) {
                        session.close().unwrap();
                    }
                }
            })
            .build()
            .unwrap(),
    );
    slot.set(Arc::downgrade(&session)).unwrap();
    session.add_sink(Arc::new(surface())).unwrap();
    session.open("0", true).unwrap();
    assert!(wait_until(|| hardware.log().device_closes == 1));

    let config = CaptureConfiguration::with_exposure(2_000_000);
    session.reconfigure(config.clone()).unwrap();
    assert_eq!(session.config(), Some(config));
}
