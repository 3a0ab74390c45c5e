/**
 * Message Store
 *
 * The message store is the durable, authoritative record of chat messages
 * and the only source used for recovery and catch-up.
 *
 * # Contract
 *
 * - `commit` returns only after the message is durable. Callers must not
 *   announce a message on the broadcast bus before `commit` succeeds.
 * - `(channel_id, ordering_key)` is unique; a second commit with the same
 *   pair fails with `StoreError::DuplicateKey`.
 * - Catch-up queries return messages in ordering-key order.
 */

use crate::backend::error::StoreError;
use crate::shared::{ChannelId, Message, MessageId, OrderingKey, ReadPosition, UserId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Identity and position of a message, without its content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadMarker {
    pub message_id: MessageId,
    pub position: ReadPosition,
}

impl From<&Message> for UnreadMarker {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            position: message.position(),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message; returns the stored form
    async fn commit(&self, message: Message) -> Result<Message, StoreError>;

    /// Messages with an ordering key strictly after `cursor` (all when `None`)
    async fn messages_since(
        &self,
        channel_id: ChannelId,
        cursor: Option<&OrderingKey>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Messages whose timestamp is strictly after `position`
    async fn messages_after_position(
        &self,
        channel_id: ChannelId,
        position: ReadPosition,
    ) -> Result<Vec<Message>, StoreError>;

    /// At most `limit` markers of messages after `position` not sent by
    /// `reader`, oldest first
    async fn unread_markers(
        &self,
        channel_id: ChannelId,
        reader: UserId,
        position: ReadPosition,
        limit: usize,
    ) -> Result<Vec<UnreadMarker>, StoreError>;

    fn store_name(&self) -> &'static str;
}

/// In-memory store used in single-node mode and tests
#[derive(Debug)]
pub struct InMemoryMessageStore {
    channels: RwLock<HashMap<ChannelId, BTreeMap<OrderingKey, Message>>>,
    available: AtomicBool,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store disabled".to_string()))
        }
    }

    pub async fn len(&self, channel_id: ChannelId) -> usize {
        self.channels
            .read()
            .await
            .get(&channel_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn commit(&self, message: Message) -> Result<Message, StoreError> {
        self.ensure_available()?;
        let mut channels = self.channels.write().await;
        let channel = channels.entry(message.channel_id).or_default();
        if channel.contains_key(&message.ordering_key) {
            return Err(StoreError::DuplicateKey {
                channel_id: message.channel_id,
                ordering_key: message.ordering_key.to_string(),
            });
        }
        channel.insert(message.ordering_key.clone(), message.clone());
        Ok(message)
    }

    async fn messages_since(
        &self,
        channel_id: ChannelId,
        cursor: Option<&OrderingKey>,
    ) -> Result<Vec<Message>, StoreError> {
        self.ensure_available()?;
        let channels = self.channels.read().await;
        let Some(channel) = channels.get(&channel_id) else {
            return Ok(Vec::new());
        };
        let messages = match cursor {
            Some(cursor) => channel
                .range::<OrderingKey, _>((
                    std::ops::Bound::Excluded(cursor),
                    std::ops::Bound::Unbounded,
                ))
                .map(|(_, m)| m.clone())
                .collect(),
            None => channel.values().cloned().collect(),
        };
        Ok(messages)
    }

    async fn messages_after_position(
        &self,
        channel_id: ChannelId,
        position: ReadPosition,
    ) -> Result<Vec<Message>, StoreError> {
        self.ensure_available()?;
        let channels = self.channels.read().await;
        Ok(channels
            .get(&channel_id)
            .map(|channel| {
                channel
                    .values()
                    .filter(|m| m.position() > position)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn unread_markers(
        &self,
        channel_id: ChannelId,
        reader: UserId,
        position: ReadPosition,
        limit: usize,
    ) -> Result<Vec<UnreadMarker>, StoreError> {
        self.ensure_available()?;
        let channels = self.channels.read().await;
        Ok(channels
            .get(&channel_id)
            .map(|channel| {
                channel
                    .values()
                    .filter(|m| m.position() > position && m.sender_id != reader)
                    .take(limit)
                    .map(UnreadMarker::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
