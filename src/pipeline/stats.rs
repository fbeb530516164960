use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one frame exchange
#[derive(Debug, Default)]
pub(crate) struct ExchangeStats {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ExchangeStats {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tollc_frames_published_total").increment(1);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tollc_frames_delivered_total").increment(1);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.dropped.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("tollc_frames_dropped_total").increment(count);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            transient_errors: 0,
        }
    }
}

/// Point-in-time copy of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames accepted from the producer
    pub published: u64,
    /// Frames handed to a reader
    pub delivered: u64,
    /// Frames replaced, rejected or discarded without being read
    pub dropped: u64,
    /// Backend fetches that failed without ending the session
    pub transient_errors: u64,
}
