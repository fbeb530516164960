//! Backend fed from another thread through a channel.
//!
//! Useful for bridging a custom frame source into a session, and for driving
//! sessions deterministically in tests.

use std::sync::atomic::{AtomicBool, Ordering};

use flume::{Receiver, RecvError, Selector, Sender};

use crate::capture::{CaptureBackend, Frame};
use crate::FetchError;

/// Receives frames pushed by a [`FrameFeeder`]
pub struct ChannelBackend {
    frames: Receiver<Result<Frame, FetchError>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    interrupted: AtomicBool,
    closed: AtomicBool,
}

/// Producer half of a [`ChannelBackend`]. Dropping every feeder makes the
/// backend report a fatal error once queued items are drained.
#[derive(Clone)]
pub struct FrameFeeder {
    tx: Sender<Result<Frame, FetchError>>,
}

impl ChannelBackend {
    pub fn new() -> (Self, FrameFeeder) {
        let (tx, frames) = flume::unbounded();
        let (wake_tx, wake_rx) = flume::bounded(1);
        let backend = Self {
            frames,
            wake_tx,
            wake_rx,
            interrupted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        (backend, FrameFeeder { tx })
    }
}

impl FrameFeeder {
    /// Queue a frame; false once the backend is gone
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(Ok(frame)).is_ok()
    }

    /// Make the next fetch fail without ending the stream
    pub fn transient(&self, reason: impl Into<String>) -> bool {
        self.tx.send(Err(FetchError::Transient(reason.into()))).is_ok()
    }

    /// Make the next fetch report an unrecoverable failure
    pub fn fatal(&self, reason: impl Into<String>) -> bool {
        self.tx.send(Err(FetchError::Fatal(reason.into()))).is_ok()
    }
}

impl CaptureBackend for ChannelBackend {
    fn fetch(&self) -> Result<Frame, FetchError> {
        if self.interrupted.load(Ordering::Acquire) {
            return Err(FetchError::Interrupted);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::Fatal("channel backend closed".into()));
        }

        Selector::new()
            .recv(&self.frames, |item| match item {
                Ok(item) => item,
                Err(RecvError::Disconnected) => {
                    Err(FetchError::Fatal("frame feeder disconnected".into()))
                }
            })
            .recv(&self.wake_rx, |_| Err(FetchError::Interrupted))
            .wait()
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Discard frames nobody will fetch
            self.frames.drain().for_each(drop);
        }
    }
}
