//! Camera Session Demo CLI
//!
//! Opens a simulated camera, streams frames into a counting consumer and
//! prints the dispatcher counters and the metrics text on exit.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use vision_camera::{
    capture::{FileConfig, FpsRange, FrameBuffer, PixelFormat},
    dispatch::{ConsumerError, FrameDispatcher},
    hal::{PoolConfig, SimulatedDevice, SimulatedHardware, SimulatedImagePool, SurfaceHandle},
    metrics::{CaptureMetrics, MetricsSnapshot},
    session::{CameraSession, SessionEvent},
};

#[derive(Debug, Parser)]
#[command(name = "vision-camera", version, about = "Simulated camera capture session")]
struct Args {
    /// TOML configuration file with [capture] and [session] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device id to open, overrides the config file
    #[arg(short, long)]
    device: Option<String>,

    /// Stop after this many delivered frames
    #[arg(short, long, default_value_t = 120)]
    frames: u64,

    /// Behave as if the capture permission was refused
    #[arg(long)]
    deny_permission: bool,
}

/// Streaming simulator with the configured device and, when it differs, the
/// one asked for on the command line.
fn simulated_hardware(configured: &str, requested: &str) -> SimulatedHardware {
    let fps_ranges = vec![
        FpsRange::new(15, 15),
        FpsRange::new(15, 30),
        FpsRange::new(24, 30),
        FpsRange::new(30, 60),
    ];
    let mut hardware = SimulatedHardware::new()
        .with_device(SimulatedDevice::new(configured, fps_ranges.clone()))
        .stream_frames();
    if requested != configured {
        hardware = hardware.with_device(SimulatedDevice::new(requested, fps_ranges));
    }
    hardware
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Camera session demo v{}", vision_camera::VERSION);

    let file_config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };
    let settings = &file_config.session;
    let device_id = args.device.clone().unwrap_or_else(|| settings.device_id.clone());

    let hardware = simulated_hardware(&settings.device_id, &device_id);

    let pool = Arc::new(SimulatedImagePool::new(
        SurfaceHandle::new(1),
        PoolConfig {
            format: PixelFormat::Yuv420,
            width: settings.width,
            height: settings.height,
            depth: settings.pool_depth,
        },
    ));
    hardware.register_pool(Arc::clone(&pool));

    let delivered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&delivered);
    let dispatcher = FrameDispatcher::attach(Arc::clone(&pool), move |frame: &FrameBuffer<'_>| {
        if !frame.is_valid() {
            return Err(ConsumerError::new("malformed frame"));
        }
        counter.fetch_add(1, Ordering::Relaxed);
        Ok::<(), ConsumerError>(())
    });

    let session = match CameraSession::builder(hardware.camera())
        .config(file_config.capture.clone())
        .worker_name(settings.worker_name.clone())
        .observer(|event: &SessionEvent| match event {
            SessionEvent::Opened(device) => info!(device = device.id(), "Observer: device opened"),
            other if other.is_failure() => warn!(event = ?other, "Observer: session failure"),
            other => info!(event = other.name(), "Observer: event"),
        })
        .build()
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = session.add_sink(dispatcher.clone()) {
        eprintln!("Failed to register output: {}", e);
        std::process::exit(1);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    if let Err(e) = session.open(&device_id, !args.deny_permission) {
        eprintln!("Failed to open camera {}: {}", device_id, e);
        std::process::exit(1);
    }

    info!("Streaming up to {} frames...", args.frames);
    while delivered.load(Ordering::Relaxed) < args.frames && !stop.load(Ordering::SeqCst) {
        let state = session.state();
        if state.is_error() {
            warn!("Session entered {}, stopping", state);
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    let final_state = session.state();
    if let Err(e) = session.close() {
        warn!("Close failed: {}", e);
    }

    let stats = dispatcher.stats();
    info!(
        "Delivered {} frames, {} consumer failures, {} buffers released, {} dropped by the pool",
        stats.delivered,
        stats.consumer_failures,
        stats.released,
        pool.stats().dropped
    );

    match CaptureMetrics::new() {
        Ok(metrics) => {
            metrics.update(&MetricsSnapshot::from_components(final_state, &stats));
            match metrics.encode() {
                Ok(text) => println!("{}", text),
                Err(e) => warn!("Failed to encode metrics: {}", e),
            }
        }
        Err(e) => warn!("Failed to create metrics registry: {}", e),
    }

    info!("Done. Final state before close: {}", final_state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_camera::hal::CameraBackend;

    #[test]
    fn test_requested_device_is_attached() {
        let mut camera = simulated_hardware("0", "usb-2").camera();
        assert_eq!(
            camera.enumerate_devices().unwrap(),
            vec!["0".to_string(), "usb-2".to_string()]
        );
    }

    #[test]
    fn test_same_device_attached_once() {
        let mut camera = simulated_hardware("0", "0").camera();
        assert_eq!(camera.enumerate_devices().unwrap(), vec!["0".to_string()]);
    }
}
