use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded frame handed from the producer to exactly one reader
#[derive(Clone, PartialEq)]
pub struct Frame {
    /// Immutable pixel data, packed rows of `meta.stride` bytes
    pub data: Bytes,

    /// Assigned when the frame is published; 0 until then
    pub sequence: u64,

    /// Shape shared by every frame of a session
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Bytes, meta: Arc<FrameMetadata>) -> Self {
        Self {
            data,
            sequence: 0,
            meta,
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn channels(&self) -> usize {
        self.meta.format.channels()
    }

    /// Time elapsed since the backend delivered the frame
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Largest frame buffer a session will allocate
pub const MAX_FRAME_BYTES: usize = 1 << 30;

/// Frame shape, fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl FrameMetadata {
    /// Metadata for tightly packed rows. An oversized stride saturates;
    /// use [`try_packed`](Self::try_packed) for sizes from configuration.
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: width.saturating_mul(format.channels() as u32),
            format,
        }
    }

    /// Like [`packed`](Self::packed), or `None` when a frame would not fit
    /// in [`MAX_FRAME_BYTES`]
    pub fn try_packed(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let stride = width.checked_mul(format.channels() as u32)?;
        let len = (stride as usize).checked_mul(height as usize)?;
        if len > MAX_FRAME_BYTES {
            return None;
        }
        Some(Self {
            width,
            height,
            stride,
            format,
        })
    }

    /// Expected buffer length in bytes
    pub fn frame_len(&self) -> usize {
        (self.stride as usize).saturating_mul(self.height as usize)
    }
}

/// Pixel formats a backend can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Bgr24,
    Bgrx32,
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
            PixelFormat::Bgrx32 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}
