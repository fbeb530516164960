//! The thread that pumps a backend into a session's frame exchange

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace};

use super::status::{StatusCell, TerminalReason};
use crate::capture::CaptureBackend;
use crate::pipeline::FrameExchange;
use crate::FetchError;

/// Pause after a transient failure so a flapping backend cannot spin a core
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(1);

/// State the producer shares with its session
pub(crate) struct Shared {
    pub(crate) stop: AtomicBool,
    pub(crate) status: StatusCell,
    pub(crate) transient_errors: AtomicU64,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            status: StatusCell::new(),
            transient_errors: AtomicU64::new(0),
        }
    }
}

pub(crate) fn spawn<B: CaptureBackend>(
    backend: Arc<B>,
    exchange: Arc<FrameExchange>,
    shared: Arc<Shared>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tollc-producer".into())
        .spawn(move || run(&*backend, &exchange, &shared))
}

/// Marks the session dead if the producer unwinds
struct PanicGuard<'a> {
    exchange: &'a FrameExchange,
    shared: &'a Shared,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared
                .status
                .begin_stopping(TerminalReason::ProducerPanicked);
            self.exchange.shutdown();
        }
    }
}

fn run<B: CaptureBackend>(backend: &B, exchange: &FrameExchange, shared: &Shared) {
    let _guard = PanicGuard { exchange, shared };
    debug!("Producer started");

    while !shared.stop.load(Ordering::Acquire) {
        match backend.fetch() {
            Ok(frame) => exchange.publish(frame),
            Err(FetchError::Transient(reason)) => {
                let count = shared.transient_errors.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!("tollc_transient_errors_total").increment(1);
                debug!(count, %reason, "Transient capture failure, retrying");
                thread::sleep(TRANSIENT_BACKOFF);
            }
            Err(FetchError::Interrupted) if shared.stop.load(Ordering::Acquire) => {
                trace!("Fetch interrupted");
                break;
            }
            // Interrupted without a close request: nothing will restart us
            Err(FetchError::Interrupted) => {
                error!("Fetch interrupted outside close, stopping producer");
                metrics::counter!("tollc_fatal_errors_total").increment(1);
                shared
                    .status
                    .begin_stopping(TerminalReason::BackendFatal("fetch interrupted".into()));
                exchange.shutdown();
                break;
            }
            Err(FetchError::Fatal(reason)) => {
                error!(%reason, "Fatal capture failure, stopping producer");
                metrics::counter!("tollc_fatal_errors_total").increment(1);
                shared
                    .status
                    .begin_stopping(TerminalReason::BackendFatal(reason));
                exchange.shutdown();
                break;
            }
        }
    }

    debug!("Producer exited");
}
