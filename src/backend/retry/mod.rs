//! Durable Retry Buffer
//!
//! Holds read-state events whose mirror write failed and replays them in
//! insertion order.
//!
//! # Behaviour
//!
//! - Bounded: when full, the oldest entry is dropped (and logged) to make room.
//! - A drain pass only covers entries present when it starts. Entries
//!   enqueued during the pass wait for the next one.
//! - A pass stops at the first failure. The failed entry goes back to the
//!   front with its attempt counter bumped, so per-key order is preserved.
//! - At most one pass runs at a time; an overlapping call returns
//!   `DrainOutcome::AlreadyDraining` without touching the queue.
//!
//! Replayed writes are idempotent because the mirror upserts with max-wins.

use crate::backend::read_state::mirror::ReadStateMirror;
use crate::shared::ReadStateEvent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A queued mirror write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    pub payload: ReadStateEvent,
    pub enqueued_at: DateTime<Utc>,
    /// Failed replay attempts so far
    pub attempts: u32,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub remaining: usize,
    pub stopped_on_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another pass was in progress
    AlreadyDraining,
}

#[derive(Debug)]
pub struct RetryBuffer {
    entries: Mutex<VecDeque<RetryEntry>>,
    capacity: usize,
    draining: tokio::sync::Mutex<()>,
    dropped: AtomicU64,
}

impl RetryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            draining: tokio::sync::Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<RetryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event at the back
    pub fn enqueue(&self, payload: ReadStateEvent) {
        let mut entries = self.entries();
        entries.push_back(RetryEntry {
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
        });
        self.enforce_capacity(&mut entries);
    }

    fn enforce_capacity(&self, entries: &mut VecDeque<RetryEntry>) {
        while entries.len() > self.capacity {
            if let Some(dropped) = entries.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[RetryBuffer] Buffer full ({}), dropping oldest event {} after {} attempts",
                    self.capacity,
                    dropped.payload.event_id,
                    dropped.attempts
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Entries dropped for capacity since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy of the queued entries, front first
    pub fn snapshot(&self) -> Vec<RetryEntry> {
        self.entries().iter().cloned().collect()
    }

    /// Replay queued entries against `mirror`
    pub async fn drain_once(&self, mirror: &dyn ReadStateMirror) -> DrainOutcome {
        let Ok(_pass) = self.draining.try_lock() else {
            tracing::debug!("[RetryBuffer] Drain already in progress, skipping");
            return DrainOutcome::AlreadyDraining;
        };

        let mut report = DrainReport::default();
        let pass_len = self.len();

        for _ in 0..pass_len {
            let Some(mut entry) = self.entries().pop_front() else {
                break;
            };
            report.attempted += 1;

            match mirror.persist(&entry.payload).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    entry.attempts += 1;
                    tracing::warn!(
                        "[RetryBuffer] Replay of event {} failed (attempt {}): {}",
                        entry.payload.event_id,
                        entry.attempts,
                        e
                    );
                    let mut entries = self.entries();
                    entries.push_front(entry);
                    self.enforce_capacity(&mut entries);
                    report.stopped_on_failure = true;
                    break;
                }
            }
        }

        report.remaining = self.len();
        if report.attempted > 0 {
            tracing::info!(
                "[RetryBuffer] Drained {}/{} events via {}, {} remaining",
                report.succeeded,
                report.attempted,
                mirror.mirror_name(),
                report.remaining
            );
        }
        DrainOutcome::Completed(report)
    }
}

/// Periodically drain `buffer` until `shutdown` flips, then drain once more
pub fn spawn_drain_loop(
    buffer: Arc<RetryBuffer>,
    mirror: Arc<dyn ReadStateMirror>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        buffer.drain_once(mirror.as_ref()).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("[RetryBuffer] Shutting down, final drain of {} events", buffer.len());
        buffer.drain_once(mirror.as_ref()).await;
    })
}
