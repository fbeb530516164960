//! Exchange points between a session's producer thread and its readers

mod queue;
mod slot;
mod stats;

use std::time::Duration;

pub use queue::FrameQueue;
pub use slot::FreshnessSlot;
pub use stats::StatsSnapshot;

use crate::capture::Frame;
use crate::CaptureConfig;

/// Result of waiting for a frame
#[derive(Debug, PartialEq)]
pub enum Acquire {
    /// A frame no reader has seen before
    Fresh(Frame),
    /// Nothing new arrived before the deadline
    TimedOut,
    /// The exchange was shut down; no more frames will arrive
    Closed,
}

impl Acquire {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Acquire::Fresh(frame) => Some(frame),
            Acquire::TimedOut | Acquire::Closed => None,
        }
    }
}

/// Delivery mode selected by `low_latency`
pub enum FrameExchange {
    Latest(FreshnessSlot),
    Queued(FrameQueue),
}

impl FrameExchange {
    pub fn for_config(capture: &CaptureConfig, queue_depth: usize) -> Self {
        if capture.low_latency {
            FrameExchange::Latest(FreshnessSlot::new())
        } else {
            FrameExchange::Queued(FrameQueue::new(queue_depth))
        }
    }

    pub fn publish(&self, frame: Frame) {
        match self {
            FrameExchange::Latest(slot) => slot.publish(frame),
            FrameExchange::Queued(queue) => queue.publish(frame),
        }
    }

    pub fn acquire(&self, timeout: Duration) -> Acquire {
        match self {
            FrameExchange::Latest(slot) => slot.acquire_latest(timeout),
            FrameExchange::Queued(queue) => queue.acquire(timeout),
        }
    }

    pub fn shutdown(&self) {
        match self {
            FrameExchange::Latest(slot) => slot.shutdown(),
            FrameExchange::Queued(queue) => queue.shutdown(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        match self {
            FrameExchange::Latest(slot) => slot.is_shut_down(),
            FrameExchange::Queued(queue) => queue.is_shut_down(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        match self {
            FrameExchange::Latest(slot) => slot.stats(),
            FrameExchange::Queued(queue) => queue.stats(),
        }
    }
}
