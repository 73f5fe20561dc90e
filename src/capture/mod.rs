//! Capture parameters, requests, frames and output sinks.
//!
//! Everything here is plain data plus validation; nothing in this module
//! talks to hardware.

mod config;
mod frame;
mod request;
mod sinks;

pub use config::{CaptureConfiguration, ConfigError, FileConfig, FpsRange, SessionSettings};
pub use frame::{FrameBuffer, HardwareImage, PixelFormat, PlaneBuffer, PlaneView};
pub use request::{
    select_fps_range, AutoExposureMode, AutoFocusMode, CaptureRequest, ControlMode,
    RequestTemplate, WhiteBalanceMode,
};
pub use sinks::{FrameSink, FrameSinkRegistry, RegistryError};
