//! Single-slot, drop-old frame handoff.
//!
//! The slot holds at most one frame. Publishing replaces whatever is there,
//! so a reader always gets the newest frame and never a backlog. Readers with
//! nothing to take wait on a condition variable until the next publish, their
//! deadline, or shutdown.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use super::stats::{ExchangeStats, StatsSnapshot};
use super::Acquire;
use crate::capture::Frame;

pub struct FreshnessSlot {
    inner: Mutex<SlotInner>,
    ready: Condvar,
    stats: CachePadded<ExchangeStats>,
}

#[derive(Default)]
struct SlotInner {
    /// `None` once the current frame has been consumed
    frame: Option<Frame>,
    last_sequence: u64,
    shut_down: bool,
}

impl Default for FreshnessSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FreshnessSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner::default()),
            ready: Condvar::new(),
            stats: CachePadded::new(ExchangeStats::default()),
        }
    }

    // Every critical section leaves the slot consistent, so poisoning is ignored
    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: stamp `frame` with the next sequence number and make it the
    /// current frame, discarding an unconsumed predecessor. Never blocks on
    /// readers. Frames published after shutdown are discarded.
    pub fn publish(&self, mut frame: Frame) {
        let mut inner = self.lock();
        if inner.shut_down {
            drop(inner);
            self.stats.record_dropped(1);
            return;
        }
        inner.last_sequence += 1;
        frame.sequence = inner.last_sequence;
        let stale = inner.frame.replace(frame);
        drop(inner);

        self.ready.notify_one();
        self.stats.record_published();
        // `stale` is freed here, outside the lock
        if let Some(stale) = stale {
            trace!(sequence = stale.sequence, "Replaced unconsumed frame");
            self.stats.record_dropped(1);
        }
    }

    /// Reader: take the current frame if it has not been consumed yet,
    /// otherwise wait up to `timeout` for the next one.
    ///
    /// A zero timeout never waits. A timeout too large to represent as a
    /// deadline waits without limit.
    pub fn acquire_latest(&self, timeout: Duration) -> Acquire {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.lock();
        loop {
            if inner.shut_down {
                return Acquire::Closed;
            }
            if let Some(frame) = inner.frame.take() {
                drop(inner);
                self.stats.record_delivered();
                return Acquire::Fresh(frame);
            }
            inner = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Acquire::TimedOut;
                    }
                    self.ready
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .ready
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Take the current frame without waiting
    pub fn try_acquire(&self) -> Acquire {
        self.acquire_latest(Duration::ZERO)
    }

    /// Close the slot for good and wake every waiting reader. Idempotent.
    pub fn shutdown(&self) {
        let stale = {
            let mut inner = self.lock();
            if inner.shut_down {
                return;
            }
            inner.shut_down = true;
            inner.frame.take()
        };
        self.ready.notify_all();
        self.stats.record_dropped(stale.is_some() as u64);
        debug!("Freshness slot shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Sequence number of the most recently published frame, 0 before any
    pub fn last_sequence(&self) -> u64 {
        self.lock().last_sequence
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
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn frame(tag: u8) -> Frame {
        let meta = Arc::new(FrameMetadata::packed(1, 1, PixelFormat::Gray8));
        Frame::new(Bytes::from(vec![tag]), meta)
    }

    fn expect_fresh(outcome: Acquire) -> Frame {
        match outcome {
            Acquire::Fresh(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_acquire_returns_newest_publish() {
        let slot = FreshnessSlot::new();
        for tag in 1..=5 {
            slot.publish(frame(tag));
        }
        let frame = expect_fresh(slot.acquire_latest(Duration::from_secs(1)));
        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.data.as_ref(), &[5]);
    }

    #[test]
    fn test_consumed_frame_is_not_redelivered() {
        let slot = FreshnessSlot::new();
        slot.publish(frame(1));
        let first = expect_fresh(slot.try_acquire());
        assert_eq!(first.sequence, 1);
        assert_eq!(slot.try_acquire(), Acquire::TimedOut);

        slot.publish(frame(2));
        let second = expect_fresh(slot.try_acquire());
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_unread_frames_are_dropped_not_queued() {
        let slot = FreshnessSlot::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        slot.publish(frame(3));

        let frame = expect_fresh(slot.try_acquire());
        assert_eq!(frame.data.as_ref(), &[3]);
        assert_eq!(slot.try_acquire(), Acquire::TimedOut);

        let stats = slot.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn test_timeout_when_nothing_published() {
        let slot = FreshnessSlot::new();
        let start = Instant::now();
        assert_eq!(
            slot.acquire_latest(Duration::from_millis(50)),
            Acquire::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_timeout_fails_fast() {
        let slot = FreshnessSlot::new();
        let start = Instant::now();
        assert_eq!(slot.acquire_latest(Duration::ZERO), Acquire::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_blocking_reader_wakes_on_first_publish() {
        let slot = Arc::new(FreshnessSlot::new());
        let reader = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.acquire_latest(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(50));
        let published_at = Instant::now();
        slot.publish(frame(9));

        let frame = expect_fresh(reader.join().unwrap());
        assert_eq!(frame.sequence, 1);
        assert!(published_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_unblocks_all_waiters() {
        let slot = Arc::new(FreshnessSlot::new());
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || slot.acquire_latest(Duration::MAX))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        slot.shutdown();

        for reader in readers {
            assert_eq!(reader.join().unwrap(), Acquire::Closed);
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_shutdown_discards_pending_frame_and_later_publishes() {
        let slot = FreshnessSlot::new();
        slot.publish(frame(1));
        slot.shutdown();
        slot.shutdown();
        assert!(slot.is_shut_down());
        assert_eq!(slot.try_acquire(), Acquire::Closed);

        slot.publish(frame(2));
        assert_eq!(slot.try_acquire(), Acquire::Closed);
        assert_eq!(slot.last_sequence(), 1);
        assert_eq!(slot.stats().dropped, 2);
    }

    #[test]
    fn test_single_reader_sees_strictly_increasing_sequences() {
        let slot = Arc::new(FreshnessSlot::new());
        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for n in 0..1000u32 {
                    slot.publish(frame(n as u8));
                    if n % 50 == 0 {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut seen = Vec::new();
        loop {
            match slot.acquire_latest(Duration::from_millis(100)) {
                Acquire::Fresh(frame) => seen.push(frame.sequence),
                Acquire::TimedOut if producer.is_finished() => {
                    // The final publish may land between the timeout and the check
                    if let Acquire::Fresh(frame) = slot.try_acquire() {
                        seen.push(frame.sequence);
                    }
                    break;
                }
                Acquire::TimedOut => {}
                Acquire::Closed => unreachable!(),
            }
        }
        producer.join().unwrap();

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&1000));
    }

    #[test]
    fn test_concurrent_readers_never_share_a_frame() {
        let slot = Arc::new(FreshnessSlot::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Acquire::Fresh(frame) = slot.acquire_latest(Duration::MAX) {
                        seen.push(frame.sequence);
                    }
                    seen
                })
            })
            .collect();

        for n in 0..500u32 {
            slot.publish(frame(n as u8));
            if n % 10 == 0 {
                thread::sleep(Duration::from_micros(100));
            }
        }
        thread::sleep(Duration::from_millis(50));
        slot.shutdown();

        let mut all = HashSet::new();
        let mut total = 0;
        for reader in readers {
            let seen = reader.join().unwrap();
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            total += seen.len();
            all.extend(seen);
        }
        assert_eq!(all.len(), total);
        assert!(total > 0);
    }
}
