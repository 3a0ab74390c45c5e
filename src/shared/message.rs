/**
 * Message Data Structure
 *
 * This module defines the committed chat `Message` and the `OrderingKey`
 * assigned to it by the owning server before it is persisted.
 *
 * # Ordering Keys
 *
 * An ordering key has the form `"<millis>.<seq>"` where `seq` is zero-padded
 * to three digits, e.g. `"1712000000123.004"`. For keys produced by the same
 * process, plain string comparison matches generation order. Keys are unique
 * per channel only; the message store enforces `(channel_id, ordering_key)`.
 */
use crate::shared::error::SharedError;
use crate::shared::ids::{ChannelId, MessageId, UserId};
use crate::shared::read_state::ReadPosition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of digits used for the per-millisecond sequence
pub const SEQUENCE_WIDTH: usize = 3;

/// Largest sequence value that fits in `SEQUENCE_WIDTH` digits
pub const MAX_SEQUENCE: u32 = 999;

/// Sortable key approximating chronological order within a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderingKey(String);

impl OrderingKey {
    /// Build a key from a millisecond timestamp and a sequence number
    pub fn from_parts(millis: i64, sequence: u32) -> Self {
        Self(format!(
            "{}.{:0width$}",
            millis,
            sequence,
            width = SEQUENCE_WIDTH
        ))
    }

    /// Parse and validate a key received from a client or the database
    pub fn parse(raw: &str) -> Result<Self, SharedError> {
        let (millis, sequence) = raw
            .split_once('.')
            .ok_or_else(|| SharedError::validation("orderingKey", "missing '.' separator"))?;

        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SharedError::validation("orderingKey", "timestamp part must be digits"));
        }
        if sequence.len() != SEQUENCE_WIDTH || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SharedError::validation(
                "orderingKey",
                format!("sequence part must be {} digits", SEQUENCE_WIDTH),
            ));
        }
        millis
            .parse::<i64>()
            .map_err(|e| SharedError::validation("orderingKey", e.to_string()))?;

        Ok(Self(raw.to_string()))
    }

    /// Millisecond timestamp component
    pub fn millis(&self) -> i64 {
        self.0
            .split_once('.')
            .and_then(|(millis, _)| millis.parse().ok())
            .unwrap_or_default()
    }

    /// Sequence component
    pub fn sequence(&self) -> u32 {
        self.0
            .split_once('.')
            .and_then(|(_, seq)| seq.parse().ok())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OrderingKey {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderingKey> for String {
    fn from(key: OrderingKey) -> Self {
        key.0
    }
}

/// A committed chat message
///
/// Created once on ingestion by the owning server and immutable afterwards.
/// The full object travels on the broadcast bus so that subscribers never
/// need a second fetch from the message store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub content: String,
    pub ordering_key: OrderingKey,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the given ordering key
    ///
    /// `created_at` is derived from the key's timestamp so that the read
    /// position of a message and its ordering key agree.
    pub fn new(
        channel_id: ChannelId,
        sender_id: UserId,
        content: impl Into<String>,
        ordering_key: OrderingKey,
    ) -> Self {
        let created_at =
            DateTime::<Utc>::from_timestamp_millis(ordering_key.millis()).unwrap_or_else(Utc::now);
        Self {
            id: MessageId::new(),
            channel_id,
            sender_id,
            content: content.into(),
            ordering_key,
            created_at,
        }
    }

    /// Read position of this message (its timestamp in epoch millis)
    pub fn position(&self) -> ReadPosition {
        ReadPosition(self.created_at.timestamp_millis())
    }
}
