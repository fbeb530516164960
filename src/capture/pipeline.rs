//! GStreamer launch lines for the supported capture sources

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::{CaptureError, CaptureSource, Config};

/// Name the backend looks up to pull samples
pub const APPSINK_NAME: &str = "appsink";

/// Rotation / mirror code, numbered like nvvidconv's `flip-method`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FlipMethod {
    #[default]
    None,
    CounterClockwise,
    Rotate180,
    Clockwise,
    HorizontalFlip,
    UpperRightDiagonal,
    VerticalFlip,
    UpperLeftDiagonal,
}

impl FlipMethod {
    pub fn code(self) -> u8 {
        match self {
            FlipMethod::None => 0,
            FlipMethod::CounterClockwise => 1,
            FlipMethod::Rotate180 => 2,
            FlipMethod::Clockwise => 3,
            FlipMethod::HorizontalFlip => 4,
            FlipMethod::UpperRightDiagonal => 5,
            FlipMethod::VerticalFlip => 6,
            FlipMethod::UpperLeftDiagonal => 7,
        }
    }

    /// Equivalent `videoflip method=` nick
    pub fn videoflip_method(self) -> &'static str {
        match self {
            FlipMethod::None => "none",
            FlipMethod::CounterClockwise => "counterclockwise",
            FlipMethod::Rotate180 => "rotate-180",
            FlipMethod::Clockwise => "clockwise",
            FlipMethod::HorizontalFlip => "horizontal-flip",
            FlipMethod::UpperRightDiagonal => "upper-right-diagonal",
            FlipMethod::VerticalFlip => "vertical-flip",
            FlipMethod::UpperLeftDiagonal => "upper-left-diagonal",
        }
    }
}

impl TryFrom<u8> for FlipMethod {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => FlipMethod::None,
            1 => FlipMethod::CounterClockwise,
            2 => FlipMethod::Rotate180,
            3 => FlipMethod::Clockwise,
            4 => FlipMethod::HorizontalFlip,
            5 => FlipMethod::UpperRightDiagonal,
            6 => FlipMethod::VerticalFlip,
            7 => FlipMethod::UpperLeftDiagonal,
            other => return Err(format!("flip_method must be 0-7, got {}", other)),
        })
    }
}

impl From<FlipMethod> for u8 {
    fn from(flip: FlipMethod) -> Self {
        flip.code()
    }
}

/// appsink properties matching the delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppSinkSettings {
    pub max_buffers: u32,
    pub drop: bool,
    pub sync: bool,
}

impl AppSinkSettings {
    pub fn for_config(config: &Config) -> Self {
        if config.capture.low_latency {
            // Keep only the newest buffer inside GStreamer too
            Self {
                max_buffers: 1,
                drop: true,
                sync: false,
            }
        } else {
            Self {
                max_buffers: config.pipeline.queue_depth as u32,
                drop: false,
                sync: false,
            }
        }
    }
}

fn convert_threads(config: &Config) -> usize {
    config.gstreamer.convert_threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    })
}

/// Build the launch line for the configured source
pub fn describe(config: &Config) -> Result<String, CaptureError> {
    if let Some(custom) = &config.gstreamer.custom_pipeline {
        return Ok(custom.clone());
    }

    let capture = &config.capture;
    let threads = convert_threads(config);

    let pipeline = match &capture.source {
        CaptureSource::Argus {
            sensor_id,
            sensor_mode,
        } => {
            // Temporal noise reduction and high quality scaling cost ISP time, not CPU
            let (tnr_mode, interpolation) = if capture.low_latency {
                (0, "Nearest")
            } else {
                (2, "Nicest")
            };
            // BGRx out of nvvidconv then videoconvert to BGR: nvvidconv has no packed BGR
            format!(
                "nvarguscamerasrc sensor-id={} sensor-mode={} tnr-mode={} ! \
                 video/x-raw(memory:NVMM), framerate={}/1 ! \
                 nvvidconv flip-method={} interpolation-method={} output-buffers=1 ! \
                 video/x-raw, width={}, height={}, format=BGRx ! \
                 videoconvert n-threads={} ! \
                 video/x-raw, format=BGR ! \
                 appsink name={}",
                sensor_id,
                sensor_mode,
                tnr_mode,
                capture.framerate,
                capture.flip_method.code(),
                interpolation,
                capture.width,
                capture.height,
                threads,
                APPSINK_NAME
            )
        }
        CaptureSource::V4l2 { device } => {
            let device = device.as_deref().unwrap_or("/dev/video0");
            format!(
                "v4l2src device={} ! \
                 video/x-raw, width={}, height={}, framerate={}/1 ! \
                 videoflip method={} ! \
                 videoconvert n-threads={} ! \
                 video/x-raw, format=BGR ! \
                 appsink name={}",
                device,
                capture.width,
                capture.height,
                capture.framerate,
                capture.flip_method.videoflip_method(),
                threads,
                APPSINK_NAME
            )
        }
        CaptureSource::Synthetic => {
            return Err(CaptureError::InvalidConfig(
                "the synthetic source has no GStreamer pipeline".into(),
            ))
        }
    };

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CaptureConfig;

    fn argus_config(low_latency: bool) -> Config {
        let mut config = Config::with_size(1280, 720);
        config.capture = config
            .capture
            .with_flip(FlipMethod::Rotate180)
            .with_low_latency(low_latency);
        config.gstreamer.convert_threads = Some(4);
        config
    }

    #[test]
    fn test_flip_method_codes() {
        for code in 0..=7u8 {
            let flip = FlipMethod::try_from(code).unwrap();
            assert_eq!(u8::from(flip), code);
        }
        assert!(FlipMethod::try_from(8).is_err());
        assert_eq!(FlipMethod::default(), FlipMethod::None);
    }

    #[test]
    fn test_argus_low_latency_pipeline() {
        let pipeline = describe(&argus_config(true)).unwrap();
        assert!(pipeline.starts_with("nvarguscamerasrc sensor-id=0 sensor-mode=0 tnr-mode=0"));
        assert!(pipeline.contains("framerate=30/1"));
        assert!(pipeline.contains("flip-method=2 interpolation-method=Nearest output-buffers=1"));
        assert!(pipeline.contains("width=1280, height=720, format=BGRx"));
        assert!(pipeline.contains("videoconvert n-threads=4"));
        assert!(pipeline.ends_with("format=BGR ! appsink name=appsink"));
    }

    #[test]
    fn test_argus_quality_pipeline() {
        let pipeline = describe(&argus_config(false)).unwrap();
        assert!(pipeline.contains("tnr-mode=2"));
        assert!(pipeline.contains("interpolation-method=Nicest"));
    }

    #[test]
    fn test_v4l2_pipeline() {
        let mut config = Config::default();
        config.capture = CaptureConfig::default()
            .with_source(CaptureSource::V4l2 {
                device: Some("/dev/video3".into()),
            })
            .with_flip(FlipMethod::Clockwise)
            .with_framerate(15);
        config.gstreamer.convert_threads = Some(2);

        let pipeline = describe(&config).unwrap();
        assert!(pipeline.starts_with("v4l2src device=/dev/video3"));
        assert!(pipeline.contains("width=640, height=480, framerate=15/1"));
        assert!(pipeline.contains("videoflip method=clockwise"));
        assert!(pipeline.contains("appsink name=appsink"));
    }

    #[test]
    fn test_v4l2_defaults_to_video0() {
        let mut config = Config::default();
        config.capture.source = CaptureSource::V4l2 { device: None };
        assert!(describe(&config).unwrap().contains("device=/dev/video0"));
    }

    #[test]
    fn test_custom_pipeline_is_verbatim() {
        let mut config = Config::default();
        let custom = "videotestsrc ! videoconvert ! video/x-raw, format=BGR ! appsink name=appsink";
        config.gstreamer.custom_pipeline = Some(custom.into());
        assert_eq!(describe(&config).unwrap(), custom);
    }

    #[test]
    fn test_synthetic_has_no_pipeline() {
        let mut config = Config::default();
        config.capture.source = CaptureSource::Synthetic;
        assert!(describe(&config).is_err());
    }

    #[test]
    fn test_appsink_settings() {
        let mut config = Config::default();
        assert_eq!(
            AppSinkSettings::for_config(&config),
            AppSinkSettings {
                max_buffers: 1,
                drop: true,
                sync: false
            }
        );

        config.capture.low_latency = false;
        config.pipeline.queue_depth = 6;
        let settings = AppSinkSettings::for_config(&config);
        assert_eq!(settings.max_buffers, 6);
        assert!(!settings.drop);
    }
}
