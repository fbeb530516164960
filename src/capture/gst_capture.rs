//! GStreamer capture backend for Argus CSI and V4L2 sources

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::pipeline::{self, AppSinkSettings, APPSINK_NAME};
use crate::capture::{CaptureBackend, OpenBackend};
use crate::{CaptureError, Config, FetchError};

/// Upper bound on how long a fetch waits before re-checking for interrupts
const PULL_POLL_MS: u64 = 50;

/// Pipeline ending in an appsink that delivers packed BGR frames
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    meta: Arc<FrameMetadata>,
    interrupted: AtomicBool,
    closed: AtomicBool,
}

impl GstCapture {
    fn launch(config: &Config) -> Result<(gst::Pipeline, gst_app::AppSink), CaptureError> {
        gst::init().map_err(|e| CaptureError::Open(format!("GStreamer init: {}", e)))?;

        let pipeline_str = pipeline::describe(config)?;
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| CaptureError::Open(format!("pipeline rejected: {}", e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Open("launch line is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name(APPSINK_NAME)
            .ok_or_else(|| CaptureError::Open("pipeline has no appsink".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Open("appsink element is not an AppSink".into()))?;

        let settings = AppSinkSettings::for_config(config);
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", settings.max_buffers);
        appsink.set_property("drop", settings.drop);
        appsink.set_property("sync", settings.sync);

        Ok((pipeline, appsink))
    }

    fn start(pipeline: &gst::Pipeline) -> Result<(), CaptureError> {
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::Open(format!("failed to start pipeline: {:?}", e)))?;

        let (state_change, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) => {
                info!("Pipeline started");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) | Ok(gst::StateChangeSuccess::NoPreroll) => {
                info!("Pipeline starting asynchronously");
                Ok(())
            }
            Err(e) => Err(CaptureError::Open(format!(
                "pipeline did not reach PLAYING: {:?}",
                e
            ))),
        }
    }

    /// Surface bus errors and EOS as fatal
    fn check_bus(&self) -> Result<(), FetchError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])
        else {
            return Ok(());
        };
        match msg.view() {
            gst::MessageView::Error(err) => Err(FetchError::Fatal(format!(
                "{} ({})",
                err.error(),
                err.debug().map(|d| d.to_string()).unwrap_or_default()
            ))),
            _ => Err(FetchError::Fatal("end of stream".into())),
        }
    }

    fn frame_from_sample(&self, sample: &gst::Sample) -> Result<Frame, FetchError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| FetchError::Transient("sample contains no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| FetchError::Transient("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| FetchError::Transient("failed to parse video info from caps".into()))?;

        if info.width() != self.meta.width || info.height() != self.meta.height {
            return Err(FetchError::Transient(format!(
                "negotiated {}x{}, expected {}x{}",
                info.width(),
                info.height(),
                self.meta.width,
                self.meta.height
            )));
        }

        let map = buffer
            .map_readable()
            .map_err(|_| FetchError::Transient("failed to map buffer".into()))?;

        let src_stride = info.stride()[0] as usize;
        let row_len = self.meta.stride as usize;
        let rows = self.meta.height as usize;
        if src_stride < row_len || map.len() < src_stride * (rows - 1) + row_len {
            return Err(FetchError::Transient(format!(
                "buffer of {} bytes too small for {}x{} BGR",
                map.len(),
                self.meta.width,
                self.meta.height
            )));
        }

        let data = if src_stride == row_len {
            Bytes::copy_from_slice(&map[..self.meta.frame_len()])
        } else {
            // Drop row padding so frames are always packed
            let mut packed = BytesMut::with_capacity(self.meta.frame_len());
            for row in map.chunks(src_stride).take(rows) {
                packed.extend_from_slice(&row[..row_len]);
            }
            packed.freeze()
        };

        Ok(Frame::new(data, Arc::clone(&self.meta)))
    }
}

impl OpenBackend for GstCapture {
    #[instrument(skip(config), fields(source = config.capture.source.name()))]
    fn open(config: &Config) -> Result<Self, CaptureError> {
        info!("Initializing GStreamer capture pipeline");

        let meta = FrameMetadata::try_packed(
            config.capture.width,
            config.capture.height,
            PixelFormat::Bgr24,
        )
        .ok_or_else(|| CaptureError::InvalidConfig("frame size too large".into()))?;
        let (pipeline, appsink) = Self::launch(config)?;
        if let Err(e) = Self::start(&pipeline) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(e);
        }

        Ok(Self {
            pipeline,
            appsink,
            meta: Arc::new(meta),
            interrupted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

impl CaptureBackend for GstCapture {
    fn fetch(&self) -> Result<Frame, FetchError> {
        loop {
            if self.interrupted.load(Ordering::Acquire) {
                return Err(FetchError::Interrupted);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(FetchError::Fatal("pipeline closed".into()));
            }
            self.check_bus()?;

            match self
                .appsink
                .try_pull_sample(gst::ClockTime::from_mseconds(PULL_POLL_MS))
            {
                Some(sample) => return self.frame_from_sample(&sample),
                None if self.appsink.is_eos() => {
                    return Err(FetchError::Fatal("end of stream".into()))
                }
                None => debug!("No sample within {}ms", PULL_POLL_MS),
            }
        }
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping GStreamer pipeline");
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.close();
    }
}
