//! Capture backends and the frames they deliver

mod backend;
pub mod channel;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod pipeline;
pub mod synthetic;

pub use backend::{CaptureBackend, OpenBackend};
pub use channel::{ChannelBackend, FrameFeeder};
pub use frame::{Frame, FrameMetadata, PixelFormat, MAX_FRAME_BYTES};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstCapture;
pub use pipeline::FlipMethod;
pub use synthetic::SyntheticBackend;

use crate::{CaptureError, CaptureSource, Config, FetchError};

/// Backend chosen at runtime from [`CaptureConfig::source`](crate::CaptureConfig)
pub enum SourceBackend {
    Synthetic(SyntheticBackend),
    #[cfg(feature = "gstreamer-pipeline")]
    Gstreamer(GstCapture),
}

impl OpenBackend for SourceBackend {
    fn open(config: &Config) -> Result<Self, CaptureError> {
        match &config.capture.source {
            CaptureSource::Synthetic => Ok(Self::Synthetic(SyntheticBackend::open(config)?)),
            #[cfg(feature = "gstreamer-pipeline")]
            CaptureSource::Argus { .. } | CaptureSource::V4l2 { .. } => {
                Ok(Self::Gstreamer(GstCapture::open(config)?))
            }
            #[cfg(not(feature = "gstreamer-pipeline"))]
            source => Err(CaptureError::Unsupported {
                kind: source.name(),
                feature: "gstreamer-pipeline",
            }),
        }
    }
}

impl CaptureBackend for SourceBackend {
    fn fetch(&self) -> Result<Frame, FetchError> {
        match self {
            SourceBackend::Synthetic(backend) => backend.fetch(),
            #[cfg(feature = "gstreamer-pipeline")]
            SourceBackend::Gstreamer(backend) => backend.fetch(),
        }
    }

    fn interrupt(&self) {
        match self {
            SourceBackend::Synthetic(backend) => backend.interrupt(),
            #[cfg(feature = "gstreamer-pipeline")]
            SourceBackend::Gstreamer(backend) => backend.interrupt(),
        }
    }

    fn close(&self) {
        match self {
            SourceBackend::Synthetic(backend) => backend.close(),
            #[cfg(feature = "gstreamer-pipeline")]
            SourceBackend::Gstreamer(backend) => backend.close(),
        }
    }
}
