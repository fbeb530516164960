//! Contract between a capture session and the thing that produces frames

use crate::capture::Frame;
use crate::{CaptureError, Config, FetchError};

/// A source of decoded frames driven by a session's producer thread.
///
/// `fetch` runs on the producer thread while `interrupt` and `close` may be
/// called from any other thread, so implementations use interior mutability.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Block until the next frame is available.
    fn fetch(&self) -> Result<Frame, FetchError>;

    /// Unblock a pending `fetch`. Sticky: every later `fetch` returns
    /// [`FetchError::Interrupted`] as well.
    fn interrupt(&self);

    /// Release all backend resources. Idempotent.
    fn close(&self);
}

/// Backends that can be constructed from configuration alone
pub trait OpenBackend: CaptureBackend + Sized {
    fn open(config: &Config) -> Result<Self, CaptureError>;
}
