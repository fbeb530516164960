use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device};

/// Raw formats the v4l2src pipeline can negotiate without a decoder
const RAW_FOURCCS: [&[u8; 4]; 3] = [b"YUYV", b"UYVY", b"NV12"];

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
    /// FourCC codes the device advertises, in driver order
    pub formats: Vec<String>,
}

impl FoundDevice {
    /// True if the device delivers a format usable without JPEG decoding
    pub fn has_raw_format(&self) -> bool {
        self.formats.iter().any(|fourcc| {
            RAW_FOURCCS
                .iter()
                .any(|raw| fourcc.as_bytes() == raw.as_slice())
        })
    }
}

/// List `/dev/video0..9` nodes that support video capture
pub fn probe_capture_devices() -> Vec<FoundDevice> {
    let mut found = Vec::new();

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("Cannot open {}", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Metadata nodes share the driver but cannot capture
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        let formats = dev
            .enum_formats()
            .map(|formats| {
                formats
                    .iter()
                    .filter_map(|fmt| fmt.fourcc.str().ok().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        found.push(FoundDevice {
            path,
            card: caps.card,
            formats,
        });
    }

    found
}

/// Pick the first capture device with a raw format
pub fn auto_detect_device() -> Option<FoundDevice> {
    info!("Auto-detecting capture devices...");

    let device = probe_capture_devices()
        .into_iter()
        .find(FoundDevice::has_raw_format)?;
    info!("Found capture device: {} - {}", device.path, device.card);
    Some(device)
}
