//! Load progress reporting.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};

/// Classification reported for every unit of work in the load and link phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    Parsed = 0,
    CacheHit = 1,
    LinkInvalid = 2,
    LinkCacheHit = 3,
}

impl LoadStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Receives progress from worker threads. Calls may arrive concurrently and must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, status: LoadStatus, label: Option<&str>);
}

impl<F> ProgressSink for F
where
    F: Fn(LoadStatus, Option<&str>) + Send + Sync,
{
    fn report(&self, status: LoadStatus, label: Option<&str>) {
        self(status, label)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _status: LoadStatus, _label: Option<&str>) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub status: LoadStatus,
    pub label: Option<String>,
}

/// Funnels progress from every worker into a single consumer.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, status: LoadStatus, label: Option<&str>) {
        // The consumer may already be gone; progress is best effort.
        let _ = self.tx.send(ProgressEvent {
            status,
            label: label.map(str::to_owned),
        });
    }
}

/// Counts reports per status.
#[derive(Debug, Default)]
pub struct ProgressTally {
    counts: [AtomicUsize; 4],
}

impl ProgressTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, status: LoadStatus) -> usize {
        self.counts[status as usize].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }
}

impl ProgressSink for ProgressTally {
    fn report(&self, status: LoadStatus, _label: Option<&str>) {
        self.counts[status as usize].fetch_add(1, Ordering::Relaxed);
    }
}
