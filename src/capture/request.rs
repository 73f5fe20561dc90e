//! Merged capture request submitted to the hardware.
//!
//! A request is the combination of a [`CaptureConfiguration`] snapshot, the
//! frame-rate range chosen for the device and the registered output surfaces.

use super::config::{CaptureConfiguration, FpsRange};
use crate::hal::SurfaceHandle;

/// Request template used to create the repeating request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
}

/// 3A control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFocusMode {
    Off,
    ContinuousVideo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoExposureMode {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhiteBalanceMode {
    Off,
    Auto,
}

/// A fully merged repeating capture request.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub control_mode: ControlMode,
    pub af_mode: AutoFocusMode,
    pub ae_mode: AutoExposureMode,
    pub awb_mode: WhiteBalanceMode,
    /// Lens focus distance; only set when auto-focus is off.
    pub focus_distance_diopters: Option<f32>,
    /// Sensor exposure time; only set when auto-exposure is off.
    pub exposure_time_nanos: Option<i64>,
    /// Sensor sensitivity; only set when auto-exposure is off.
    pub sensitivity_iso: Option<i32>,
    pub frame_duration_nanos: Option<i64>,
    pub target_fps_range: Option<FpsRange>,
    pub targets: Vec<SurfaceHandle>,
}

impl CaptureRequest {
    /// Merges a configuration with the selected fps range and the outputs.
    pub fn build(
        config: &CaptureConfiguration,
        fps_range: Option<FpsRange>,
        targets: &[SurfaceHandle],
    ) -> Self {
        let manual_exposure = !config.auto_exposure_enabled;
        let manual_focus = !config.auto_focus_enabled;

        Self {
            template: RequestTemplate::Preview,
            control_mode: ControlMode::Auto,
            af_mode: if manual_focus {
                AutoFocusMode::Off
            } else {
                AutoFocusMode::ContinuousVideo
            },
            ae_mode: if manual_exposure {
                AutoExposureMode::Off
            } else {
                AutoExposureMode::On
            },
            awb_mode: if config.auto_white_balance_enabled {
                WhiteBalanceMode::Auto
            } else {
                WhiteBalanceMode::Off
            },
            focus_distance_diopters: manual_focus.then_some(config.focus_distance_diopters),
            exposure_time_nanos: manual_exposure.then_some(config.exposure_time_nanos),
            sensitivity_iso: if manual_exposure {
                config.sensitivity_iso
            } else {
                None
            },
            frame_duration_nanos: Some(config.frame_duration_nanos),
            target_fps_range: fps_range,
            targets: targets.to_vec(),
        }
    }
}

/// Picks the range with the highest upper bound, ties broken by the highest
/// lower bound. Returns `None` for an empty list.
pub fn select_fps_range(ranges: &[FpsRange]) -> Option<FpsRange> {
    ranges.iter().copied().max_by_key(|r| (r.max, r.min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_select_prefers_upper_then_lower_bound() {
        let ranges = [
            FpsRange::new(15, 15),
            FpsRange::new(15, 30),
            FpsRange::new(24, 30),
        ];
        assert_eq!(select_fps_range(&ranges), Some(FpsRange::new(24, 30)));
    }

    #[test]
    fn test_select_ignores_advertised_order() {
        let ranges = [
            FpsRange::new(30, 60),
            FpsRange::new(7, 30),
            FpsRange::new(15, 60),
        ];
        assert_eq!(select_fps_range(&ranges), Some(FpsRange::new(30, 60)));
    }

    #[test]
    fn test_select_empty() {
        assert_eq!(select_fps_range(&[]), None);
    }

    #[test]
    fn test_manual_values_written_when_auto_off() {
        let config = CaptureConfiguration {
            auto_focus_enabled: false,
            auto_exposure_enabled: false,
            exposure_time_nanos: 8_000_000,
            sensitivity_iso: Some(400),
            ..Default::default()
        };
        let targets = [SurfaceHandle::new(7)];
        let request = CaptureRequest::build(&config, Some(FpsRange::new(24, 30)), &targets);

        assert_eq!(request.af_mode, AutoFocusMode::Off);
        assert_eq!(request.ae_mode, AutoExposureMode::Off);
        assert_eq!(request.awb_mode, WhiteBalanceMode::Auto);
        assert_eq!(request.exposure_time_nanos, Some(8_000_000));
        assert_eq!(request.focus_distance_diopters, Some(0.333));
        assert_eq!(request.sensitivity_iso, Some(400));
        assert_eq!(request.frame_duration_nanos, Some(16_666_668));
        assert_eq!(request.target_fps_range, Some(FpsRange::new(24, 30)));
        assert_eq!(request.targets, vec![SurfaceHandle::new(7)]);
    }

    #[test]
    fn test_manual_values_omitted_when_auto_on() {
        let config = CaptureConfiguration {
            auto_focus_enabled: true,
            auto_exposure_enabled: true,
            sensitivity_iso: Some(400),
            ..Default::default()
        };
        let request = CaptureRequest::build(&config, None, &[]);

        assert_eq!(request.af_mode, AutoFocusMode::ContinuousVideo);
        assert_eq!(request.ae_mode, AutoExposureMode::On);
        assert_eq!(request.exposure_time_nanos, None);
        assert_eq!(request.focus_distance_diopters, None);
        assert_eq!(request.sensitivity_iso, None);
    }

    proptest! {
        #[test]
        fn prop_selected_range_dominates(
            raw in prop::collection::vec((1i32..120, 0i32..120), 1..16)
        ) {
            let ranges: Vec<FpsRange> = raw
                .into_iter()
                .map(|(min, span)| FpsRange::new(min, min + span))
                .collect();
            let chosen = select_fps_range(&ranges).unwrap();

            prop_assert!(ranges.contains(&chosen));
            for r in &ranges {
                prop_assert!(r.max < chosen.max || (r.max == chosen.max && r.min <= chosen.min));
            }
        }
    }
}
