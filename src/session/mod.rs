//! Capture sessions: a backend, a producer thread and a frame exchange with a
//! single owner.
//!
//! Opening a session starts the producer; closing it (explicitly or on drop)
//! stops the producer, interrupts any pending fetch and releases the backend.
//! Readers call [`CaptureSession::read`] from any number of threads.

mod producer;
mod status;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, instrument};

use crate::capture::{CaptureBackend, Frame, OpenBackend};
use crate::pipeline::{Acquire, FrameExchange, StatsSnapshot};
use crate::{CaptureError, Config};

use producer::Shared;
pub use status::{SessionState, SessionStatus, TerminalReason};

pub struct CaptureSession<B: CaptureBackend> {
    backend: Arc<B>,
    exchange: Arc<FrameExchange>,
    shared: Arc<Shared>,
    /// Taken by the first `close`; later calls find `None`
    producer: Mutex<Option<JoinHandle<()>>>,
    config: Config,
}

impl<B: OpenBackend> CaptureSession<B> {
    /// Open the configured backend and start producing frames
    #[instrument(skip(config), fields(
        source = config.capture.source.name(),
        width = config.capture.width,
        height = config.capture.height,
        low_latency = config.capture.low_latency,
    ))]
    pub fn open(config: &Config) -> Result<Self, CaptureError> {
        config.validate()?;
        let backend = B::open(config)?;
        Self::launch(backend, config)
    }
}

impl<B: CaptureBackend> CaptureSession<B> {
    /// Start a session around a backend that is already open. The backend is
    /// closed if the session cannot be started.
    pub fn start(backend: B, config: &Config) -> Result<Self, CaptureError> {
        if let Err(e) = config.validate() {
            backend.close();
            return Err(e);
        }
        Self::launch(backend, config)
    }

    fn launch(backend: B, config: &Config) -> Result<Self, CaptureError> {
        let backend = Arc::new(backend);
        let exchange = Arc::new(FrameExchange::for_config(
            &config.capture,
            config.pipeline.queue_depth,
        ));
        let shared = Arc::new(Shared::new());
        shared.status.mark_running();

        let handle = match producer::spawn(
            Arc::clone(&backend),
            Arc::clone(&exchange),
            Arc::clone(&shared),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn producer thread: {}", e);
                backend.close();
                return Err(CaptureError::Spawn(e));
            }
        };

        info!(
            "Capture session running: {}x{} @ {}fps",
            config.capture.width, config.capture.height, config.capture.framerate
        );

        Ok(Self {
            backend,
            exchange,
            shared,
            producer: Mutex::new(Some(handle)),
            config: config.clone(),
        })
    }

    /// Wait up to `timeout` for a frame newer than any this session has
    /// handed out. `None` means the wait timed out or the session is closed;
    /// [`status`](Self::status) tells which.
    pub fn read(&self, timeout: Duration) -> Option<Frame> {
        self.acquire(timeout).into_frame()
    }

    /// Like [`read`](Self::read), keeping the three outcomes apart
    pub fn acquire(&self, timeout: Duration) -> Acquire {
        self.exchange.acquire(timeout)
    }

    /// Take an unread frame if one is waiting, without blocking
    pub fn try_read(&self) -> Option<Frame> {
        self.read(Duration::ZERO)
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.load()
    }

    pub fn is_open(&self) -> bool {
        self.status().is_open()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            transient_errors: self.shared.transient_errors.load(Ordering::Relaxed),
            ..self.exchange.stats()
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the producer, release the backend and wake blocked readers.
    /// Safe to call any number of times; concurrent callers return once the
    /// first has finished.
    pub fn close(&self) {
        let mut producer = self.producer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = producer.take() else {
            return;
        };

        info!("Closing capture session");
        self.shared.stop.store(true, Ordering::Release);
        self.shared.status.begin_stopping(TerminalReason::Closed);
        self.exchange.shutdown();
        self.backend.interrupt();

        if handle.join().is_err() {
            error!("Producer thread panicked");
        }
        self.backend.close();
        self.shared.status.mark_stopped();

        let stats = self.stats();
        info!(
            published = stats.published,
            delivered = stats.delivered,
            dropped = stats.dropped,
            transient_errors = stats.transient_errors,
            "Capture session closed"
        );
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run `f` with a freshly opened session that is closed on every exit path,
/// including early returns and panics inside `f`.
pub fn with_session<B, R, E, F>(config: &Config, f: F) -> Result<R, E>
where
    B: OpenBackend,
    E: From<CaptureError>,
    F: FnOnce(&CaptureSession<B>) -> Result<R, E>,
{
    let session = CaptureSession::<B>::open(config)?;
    let result = f(&session);
    session.close();
    result
}
