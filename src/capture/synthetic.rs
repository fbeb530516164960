//! Synthetic frame source for running without a camera

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::info;

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::{CaptureBackend, OpenBackend};
use crate::{CaptureError, Config, FetchError};

/// Generates BGR gradient frames at a fixed rate
pub struct SyntheticBackend {
    meta: Arc<FrameMetadata>,
    interval: Duration,
    transient_every: Option<u64>,
    fatal_after: Option<u64>,
    state: Mutex<SyntheticState>,
    wake: Condvar,
}

struct SyntheticState {
    produced: u64,
    next_due: Instant,
    interrupted: bool,
    closed: bool,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32, framerate: u32) -> Self {
        Self {
            meta: Arc::new(FrameMetadata::packed(width, height, PixelFormat::Bgr24)),
            interval: Duration::from_secs(1) / framerate.max(1),
            transient_every: None,
            fatal_after: None,
            state: Mutex::new(SyntheticState {
                produced: 0,
                next_due: Instant::now(),
                interrupted: false,
                closed: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Fail every `n`th fetch with a transient error
    pub fn with_transient_every(mut self, n: u64) -> Self {
        self.transient_every = Some(n.max(1));
        self
    }

    /// Report a fatal error once `n` frames have been produced
    pub fn with_fatal_after(mut self, n: u64) -> Self {
        self.fatal_after = Some(n);
        self
    }

    pub fn metadata(&self) -> Arc<FrameMetadata> {
        Arc::clone(&self.meta)
    }

    fn lock(&self) -> MutexGuard<'_, SyntheticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(&self, n: u64) -> Frame {
        let width = self.meta.width as usize;
        let height = self.meta.height as usize;
        let shift = n as usize;
        let mut data = Vec::with_capacity(self.meta.frame_len());
        for y in 0..height {
            for x in 0..width {
                data.push((x + shift) as u8);
                data.push((y + shift) as u8);
                data.push(n as u8);
            }
        }
        Frame::new(Bytes::from(data), Arc::clone(&self.meta))
    }
}

impl CaptureBackend for SyntheticBackend {
    fn fetch(&self) -> Result<Frame, FetchError> {
        let mut state = self.lock();
        loop {
            if state.interrupted {
                return Err(FetchError::Interrupted);
            }
            if state.closed {
                return Err(FetchError::Fatal("synthetic source closed".into()));
            }
            let now = Instant::now();
            if now >= state.next_due {
                break;
            }
            let wait = state.next_due - now;
            state = self
                .wake
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        // Never burst to catch up after a slow consumer
        let now = Instant::now();
        state.next_due = (state.next_due + self.interval).max(now);
        state.produced += 1;
        let n = state.produced;
        drop(state);

        if let Some(limit) = self.fatal_after {
            if n > limit {
                return Err(FetchError::Fatal(format!(
                    "synthetic source exhausted after {} frames",
                    limit
                )));
            }
        }
        if let Some(every) = self.transient_every {
            if n % every == 0 {
                return Err(FetchError::Transient(format!(
                    "synthetic drop at frame {}",
                    n
                )));
            }
        }

        Ok(self.render(n))
    }

    fn interrupt(&self) {
        self.lock().interrupted = true;
        self.wake.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.wake.notify_all();
    }
}

impl OpenBackend for SyntheticBackend {
    fn open(config: &Config) -> Result<Self, CaptureError> {
        let capture = &config.capture;
        info!(
            "Opening synthetic source: {}x{} @ {}fps",
            capture.width, capture.height, capture.framerate
        );
        if FrameMetadata::try_packed(capture.width, capture.height, PixelFormat::Bgr24).is_none() {
            return Err(CaptureError::InvalidConfig(format!(
                "synthetic frame size {}x{} is too large",
                capture.width, capture.height
            )));
        }
        Ok(Self::new(capture.width, capture.height, capture.framerate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_frames_have_configured_shape() {
        let backend = SyntheticBackend::new(8, 4, 1000);
        let frame = backend.fetch().unwrap();
        assert_eq!(frame.width(), 8);
        assert_eq!(frame.height(), 4);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.data.len(), 8 * 4 * 3);
        assert_eq!(frame.meta.format, PixelFormat::Bgr24);
    }

    #[test]
    fn test_open_rejects_oversized_frames() {
        let mut config = Config::with_size(2_000_000_000, 1);
        config.capture.source = crate::CaptureSource::Synthetic;
        assert!(matches!(
            SyntheticBackend::open(&config),
            Err(CaptureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_interrupt_unblocks_pending_fetch() {
        let backend = Arc::new(SyntheticBackend::new(4, 4, 1));
        backend.fetch().unwrap();

        let waiter = {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                let start = Instant::now();
                (backend.fetch(), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        backend.interrupt();

        let (result, elapsed) = waiter.join().unwrap();
        assert_eq!(result.unwrap_err(), FetchError::Interrupted);
        assert!(elapsed < Duration::from_millis(900));

        // Sticky
        assert_eq!(backend.fetch().unwrap_err(), FetchError::Interrupted);
    }

    #[test]
    fn test_fatal_after_limit() {
        let backend = SyntheticBackend::new(2, 2, 1000).with_fatal_after(2);
        assert!(backend.fetch().is_ok());
        assert!(backend.fetch().is_ok());
        assert!(matches!(backend.fetch(), Err(FetchError::Fatal(_))));
        assert!(matches!(backend.fetch(), Err(FetchError::Fatal(_))));
    }

    #[test]
    fn test_transient_every() {
        let backend = SyntheticBackend::new(2, 2, 1000).with_transient_every(2);
        assert!(backend.fetch().is_ok());
        assert!(matches!(backend.fetch(), Err(FetchError::Transient(_))));
        assert!(backend.fetch().is_ok());
    }

    #[test]
    fn test_fetch_after_close_is_fatal() {
        let backend = SyntheticBackend::new(2, 2, 1000);
        backend.close();
        backend.close();
        assert!(matches!(backend.fetch(), Err(FetchError::Fatal(_))));
    }
}
