/**
 * Live Publish Helper
 *
 * Publishing on the bus never blocks the write path: each attempt is bounded
 * by a short timeout, and a failed or slow publish is logged and skipped.
 * The message stays durably committed; recipients recover it through a
 * catch-up query when they reconnect.
 */

use crate::backend::error::BusError;
use crate::backend::realtime::bus::BroadcastBus;
use crate::shared::LiveEnvelope;
use std::time::Duration;

/// What happened to a live publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The bus failed or timed out; live delivery was skipped
    Skipped,
}

/// Publish `envelope` on its channel topic, giving up after `timeout`
pub async fn publish_live(
    bus: &dyn BroadcastBus,
    envelope: &LiveEnvelope,
    timeout: Duration,
) -> PublishOutcome {
    let topic = envelope.channel_id;
    let result = match tokio::time::timeout(timeout, bus.publish(topic, envelope)).await {
        Ok(result) => result,
        Err(_) => Err(BusError::Timeout(timeout)),
    };

    match result {
        Ok(()) => {
            tracing::debug!(
                "[Bus] {:?} published on topic {} via {}",
                envelope.event_type,
                topic,
                bus.bus_name()
            );
            PublishOutcome::Published
        }
        Err(e) => {
            tracing::warn!(
                "[Bus] Skipping live delivery of {:?} on topic {}: {}",
                envelope.event_type,
                topic,
                e
            );
            PublishOutcome::Skipped
        }
    }
}
