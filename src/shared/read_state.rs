//! Read-State Types
//!
//! Read receipts and the events used to mirror them to durable storage.
//! A read position is a message timestamp in epoch milliseconds; a user has
//! read everything in a channel at or before their `last_read_position`.
use crate::shared::ids::{ChannelId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position in a channel's timeline (epoch millis of a message)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadPosition(pub i64);

impl fmt::Display for ReadPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last-read position of one user in one channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub last_read_position: ReadPosition,
    pub updated_at: DateTime<Utc>,
}

impl ReadReceipt {
    pub fn new(user_id: UserId, channel_id: ChannelId, position: ReadPosition) -> Self {
        Self {
            user_id,
            channel_id,
            last_read_position: position,
            updated_at: Utc::now(),
        }
    }

    /// Apply a new position with latest-wins semantics
    ///
    /// Returns `true` when the stored position moved forward.
    pub fn advance(&mut self, position: ReadPosition) -> bool {
        if position > self.last_read_position {
            self.last_read_position = position;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }
}

/// A receipt change queued for the durable mirror
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadStateEvent {
    pub event_id: Uuid,
    pub receipt: ReadReceipt,
}

impl ReadStateEvent {
    pub fn receipt_updated(receipt: ReadReceipt) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            receipt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_max_wins() {
        let mut receipt = ReadReceipt::new(UserId::new(), ChannelId(1), ReadPosition(100));
        assert!(!receipt.advance(ReadPosition(99)));
        assert_eq!(receipt.last_read_position, ReadPosition(100));
        assert!(!receipt.advance(ReadPosition(100)));
        assert!(receipt.advance(ReadPosition(150)));
        assert_eq!(receipt.last_read_position, ReadPosition(150));
    }

    #[test]
    fn test_events_get_unique_ids() {
        let receipt = ReadReceipt::new(UserId::new(), ChannelId(1), ReadPosition(1));
        let a = ReadStateEvent::receipt_updated(receipt.clone());
        let b = ReadStateEvent::receipt_updated(receipt);
        assert_ne!(a.event_id, b.event_id);
    }
}
