/**
 * Write-Behind Worker
 *
 * Receipt changes are acknowledged from the in-memory tracker and mirrored
 * to durable storage afterwards by a single writer task. The queue between
 * them is bounded; when it is full, or when a mirror write fails, the event
 * goes to the retry buffer instead.
 */

use crate::backend::read_state::mirror::ReadStateMirror;
use crate::backend::retry::RetryBuffer;
use crate::shared::ReadStateEvent;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Producer side handed to the tracker
#[derive(Clone)]
pub struct WriteBehind {
    sender: mpsc::Sender<ReadStateEvent>,
    retry: Arc<RetryBuffer>,
}

impl WriteBehind {
    /// Create the queue; the receiver goes to `spawn_write_behind`
    pub fn channel(capacity: usize, retry: Arc<RetryBuffer>) -> (Self, mpsc::Receiver<ReadStateEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, retry }, receiver)
    }

    /// Hand an event to the writer without waiting
    pub fn submit(&self, event: ReadStateEvent) {
        if let Err(e) = self.sender.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("writer stopped", event),
            };
            tracing::warn!(
                "[ReadState] Write-behind {}, buffering event {} for retry",
                reason,
                event.event_id
            );
            self.retry.enqueue(event);
        }
    }

    pub fn retry_buffer(&self) -> &Arc<RetryBuffer> {
        &self.retry
    }
}

async fn mirror_one(mirror: &dyn ReadStateMirror, retry: &RetryBuffer, event: ReadStateEvent) {
    if let Err(e) = mirror.persist(&event).await {
        tracing::warn!(
            "[ReadState] Mirror write for {} failed, buffering for retry: {}",
            event.event_id,
            e
        );
        retry.enqueue(event);
    }
}

/// Run the single mirror writer until shutdown, then flush what is queued
pub fn spawn_write_behind(
    mut receiver: mpsc::Receiver<ReadStateEvent>,
    mirror: Arc<dyn ReadStateMirror>,
    retry: Arc<RetryBuffer>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("[ReadState] Write-behind worker started ({})", mirror.mirror_name());
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(event) => mirror_one(mirror.as_ref(), &retry, event).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        receiver.close();
        let mut flushed = 0;
        while let Ok(event) = receiver.try_recv() {
            mirror_one(mirror.as_ref(), &retry, event).await;
            flushed += 1;
        }
        tracing::info!("[ReadState] Write-behind worker stopped, flushed {} events", flushed);
    })
}
