//! Newest-frame capture sessions.
//!
//! A [`CaptureSession`] owns a capture backend and a producer thread that
//! pumps frames into a single-slot exchange. Readers always get the most
//! recently captured frame; frames nobody asked for in time are dropped.

pub mod capture;
pub mod error;
pub mod pipeline;
pub mod session;
#[cfg(feature = "v4l2-probe")]
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{
    CaptureBackend, FlipMethod, Frame, FrameMetadata, OpenBackend, PixelFormat, SourceBackend,
};
pub use error::{CaptureError, FetchError};
pub use pipeline::{Acquire, StatsSnapshot};
pub use session::{with_session, CaptureSession, SessionState, SessionStatus, TerminalReason};

/// Prefix for environment overrides, e.g. `TOLLC__CAPTURE__WIDTH=1280`
pub const ENV_PREFIX: &str = "TOLLC";

/// Complete session configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub gstreamer: GStreamerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: CaptureSource,
    pub width: u32,
    pub height: u32,
    /// Capture rate hint passed to the backend
    pub framerate: u32,
    pub flip_method: FlipMethod,
    /// Single-slot drop-old delivery when true, buffered FIFO delivery otherwise
    pub low_latency: bool,
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureSource {
    /// Generated frames, no hardware required
    Synthetic,
    /// CSI sensor through nvarguscamerasrc
    Argus {
        #[serde(default)]
        sensor_id: u32,
        #[serde(default)]
        sensor_mode: u32,
    },
    /// USB / V4L2 device through v4l2src; probed when `device` is unset
    V4l2 {
        #[serde(default)]
        device: Option<String>,
    },
}

impl CaptureSource {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureSource::Synthetic => "synthetic",
            CaptureSource::Argus { .. } => "argus",
            CaptureSource::V4l2 { .. } => "v4l2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames held by the buffered exchange when `low_latency` is off
    pub queue_depth: usize,
    /// Default read timeout used by the demo binary
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GStreamerConfig {
    /// Launch line used verbatim; must end in `appsink name=appsink`
    pub custom_pipeline: Option<String>,
    /// videoconvert worker threads, defaults to available parallelism
    pub convert_threads: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CaptureSource::Argus {
                sensor_id: 0,
                sensor_mode: 0,
            },
            width: 640,
            height: 480,
            framerate: 30,
            flip_method: FlipMethod::None,
            low_latency: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            read_timeout_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn with_source(mut self, source: CaptureSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_flip(mut self, flip_method: FlipMethod) -> Self {
        self.flip_method = flip_method;
        self
    }

    pub fn with_low_latency(mut self, low_latency: bool) -> Self {
        self.low_latency = low_latency;
        self
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }
}

impl Config {
    /// Default configuration with the given output frame size
    pub fn with_size(width: u32, height: u32) -> Self {
        let mut config = Self::default();
        config.capture.width = width;
        config.capture.height = height;
        config
    }

    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Load from an optional TOML file, then apply `TOLLC__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, CaptureError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "frame size {}x{} must be non-zero",
                capture.width, capture.height
            )));
        }
        // BGRx is the widest layout any backend negotiates
        if FrameMetadata::try_packed(capture.width, capture.height, PixelFormat::Bgrx32).is_none()
        {
            return Err(CaptureError::InvalidConfig(format!(
                "frame size {}x{} exceeds {} bytes",
                capture.width,
                capture.height,
                crate::capture::MAX_FRAME_BYTES
            )));
        }
        if capture.framerate == 0 {
            return Err(CaptureError::InvalidConfig(
                "framerate must be non-zero".into(),
            ));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(CaptureError::InvalidConfig(
                "queue_depth must be at least 1".into(),
            ));
        }
        if let Some(custom) = &self.gstreamer.custom_pipeline {
            if !custom.contains("name=appsink") {
                return Err(CaptureError::InvalidConfig(
                    "custom pipeline must contain `appsink name=appsink`".into(),
                ));
            }
        }
        Ok(())
    }
}
