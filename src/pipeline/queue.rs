//! Bounded FIFO exchange for sessions that prefer every frame over the newest one

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, trace};

use super::stats::{ExchangeStats, StatsSnapshot};
use super::Acquire;
use crate::capture::Frame;

/// Frames are delivered oldest first. When `depth` frames are waiting the
/// incoming frame is dropped, never one already queued.
pub struct FrameQueue {
    producer: Mutex<QueueProducer>,
    rx: Receiver<Frame>,
    shut_down: AtomicBool,
    stats: CachePadded<ExchangeStats>,
}

struct QueueProducer {
    tx: Option<Sender<Frame>>,
    last_sequence: u64,
}

impl FrameQueue {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = flume::bounded(depth.max(1));
        Self {
            producer: Mutex::new(QueueProducer {
                tx: Some(tx),
                last_sequence: 0,
            }),
            rx,
            shut_down: AtomicBool::new(false),
            stats: CachePadded::new(ExchangeStats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueProducer> {
        self.producer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, mut frame: Frame) {
        let mut producer = self.lock();
        let sequence = producer.last_sequence + 1;
        frame.sequence = sequence;

        let result = match producer.tx.as_ref() {
            Some(tx) => tx.try_send(frame),
            None => Err(TrySendError::Disconnected(frame)),
        };
        match result {
            Ok(()) => {
                producer.last_sequence = sequence;
                drop(producer);
                self.stats.record_published();
            }
            Err(TrySendError::Full(_)) => {
                drop(producer);
                trace!(sequence, "Queue full, dropping incoming frame");
                self.stats.record_dropped(1);
            }
            Err(TrySendError::Disconnected(_)) => {
                drop(producer);
                self.stats.record_dropped(1);
            }
        }
    }

    pub fn acquire(&self, timeout: Duration) -> Acquire {
        if self.shut_down.load(Ordering::Acquire) {
            return Acquire::Closed;
        }
        let result = match Instant::now().checked_add(timeout) {
            Some(deadline) => self.rx.recv_deadline(deadline),
            None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match result {
            // Lost a race with shutdown
            Ok(_) if self.shut_down.load(Ordering::Acquire) => {
                self.stats.record_dropped(1);
                Acquire::Closed
            }
            Ok(frame) => {
                self.stats.record_delivered();
                Acquire::Fresh(frame)
            }
            Err(RecvTimeoutError::Timeout) => Acquire::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Acquire::Closed,
        }
    }

    /// Disconnect the queue, discard anything still waiting and wake readers
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the only sender wakes blocked receivers with Disconnected
        let tx = self.lock().tx.take();
        drop(tx);
        let discarded = self.rx.drain().count() as u64;
        self.stats.record_dropped(discarded);
        debug!(discarded, "Frame queue shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;

    fn frame(tag: u8) -> Frame {
        let meta = Arc::new(FrameMetadata::packed(1, 1, PixelFormat::Gray8));
        Frame::new(Bytes::from(vec![tag]), meta)
    }

    fn tag_of(outcome: Acquire) -> u8 {
        match outcome {
            Acquire::Fresh(frame) => frame.data[0],
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_frames_are_delivered_oldest_first() {
        let queue = FrameQueue::new(4);
        queue.publish(frame(1));
        queue.publish(frame(2));
        queue.publish(frame(3));
        assert_eq!(queue.len(), 3);

        assert_eq!(tag_of(queue.acquire(Duration::ZERO)), 1);
        assert_eq!(tag_of(queue.acquire(Duration::ZERO)), 2);
        assert_eq!(tag_of(queue.acquire(Duration::ZERO)), 3);
        assert_eq!(queue.acquire(Duration::ZERO), Acquire::TimedOut);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_incoming() {
        let queue = FrameQueue::new(2);
        queue.publish(frame(1));
        queue.publish(frame(2));
        queue.publish(frame(3));

        let first = match queue.acquire(Duration::ZERO) {
            Acquire::Fresh(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        };
        assert_eq!(first.data[0], 1);
        assert_eq!(first.sequence, 1);
        assert_eq!(tag_of(queue.acquire(Duration::ZERO)), 2);

        queue.publish(frame(4));
        let next = match queue.acquire(Duration::ZERO) {
            Acquire::Fresh(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        };
        assert_eq!(next.sequence, 3);

        let stats = queue.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_shutdown_discards_queue_and_wakes_readers() {
        let queue = Arc::new(FrameQueue::new(4));
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.acquire(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(50));
        queue.shutdown();
        assert_eq!(reader.join().unwrap(), Acquire::Closed);

        queue.publish(frame(1));
        assert_eq!(queue.acquire(Duration::ZERO), Acquire::Closed);
        queue.shutdown();
        assert!(queue.is_shut_down());
    }

    #[test]
    fn test_shutdown_drops_pending_frames() {
        let queue = FrameQueue::new(4);
        queue.publish(frame(1));
        queue.publish(frame(2));
        queue.shutdown();
        assert_eq!(queue.acquire(Duration::from_millis(10)), Acquire::Closed);
        assert_eq!(queue.stats().dropped, 2);
    }
}
