/**
 * Live Event Envelope
 *
 * This module defines the envelope carried on the broadcast bus and pushed
 * to connected clients, plus the loosely typed frame clients send back.
 *
 * # Wire Format
 *
 * ```json
 * {"type":"MESSAGE","channelId":7,"senderId":"...","content":"hi",
 *  "messageId":"...","orderingKey":"1000.000","timestamp":1000}
 * ```
 *
 * `READ` envelopes carry the reader in `senderId` and the new read position
 * in `timestamp`. `RESEND_REQUEST` frames ask for everything after
 * `timestamp` in the channel.
 */
use crate::shared::error::SharedError;
use crate::shared::ids::{ChannelId, MessageId, UserId};
use crate::shared::message::{Message, OrderingKey};
use crate::shared::read_state::{ReadPosition, ReadReceipt};
use serde::{Deserialize, Serialize};

/// Type of live event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A committed chat message
    Message,
    /// A read receipt moved forward
    Read,
    /// A client asks for a gap-fill
    ResendRequest,
}

/// Envelope published on the bus and delivered to live sessions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LiveEnvelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub channel_id: ChannelId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering_key: Option<OrderingKey>,
    /// Epoch millis: message time for `MESSAGE`, read position for `READ`
    pub timestamp: i64,
}

impl LiveEnvelope {
    /// Envelope carrying a full committed message
    pub fn message(message: &Message) -> Self {
        Self {
            event_type: EventType::Message,
            channel_id: message.channel_id,
            sender_id: Some(message.sender_id),
            content: Some(message.content.clone()),
            message_id: Some(message.id),
            ordering_key: Some(message.ordering_key.clone()),
            timestamp: message.position().0,
        }
    }

    /// Envelope announcing a read receipt
    pub fn read(receipt: &ReadReceipt) -> Self {
        Self {
            event_type: EventType::Read,
            channel_id: receipt.channel_id,
            sender_id: Some(receipt.user_id),
            content: None,
            message_id: None,
            ordering_key: None,
            timestamp: receipt.last_read_position.0,
        }
    }

    /// Rebuild the message carried by a `MESSAGE` envelope
    pub fn to_message(&self) -> Option<Message> {
        if self.event_type != EventType::Message {
            return None;
        }
        Some(Message {
            id: self.message_id?,
            channel_id: self.channel_id,
            sender_id: self.sender_id?,
            content: self.content.clone()?,
            ordering_key: self.ordering_key.clone()?,
            created_at: chrono::DateTime::from_timestamp_millis(self.timestamp)?,
        })
    }
}

/// Frame sent by a client over the live connection
///
/// Every field is optional so that incomplete frames parse and can be
/// dropped with a log line instead of failing the connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub event_type: Option<EventType>,
    pub channel_id: Option<ChannelId>,
    pub timestamp: Option<i64>,
}

/// Validated client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    /// Mark the channel read up to `position`
    Read {
        channel_id: ChannelId,
        position: ReadPosition,
    },
    /// Re-send everything after `after`
    Resend {
        channel_id: ChannelId,
        after: ReadPosition,
    },
}

impl ClientFrame {
    /// Check required fields and convert into a request
    pub fn into_request(self) -> Result<ClientRequest, SharedError> {
        let event_type = self
            .event_type
            .ok_or_else(|| SharedError::validation("type", "missing"))?;
        let channel_id = self
            .channel_id
            .ok_or_else(|| SharedError::validation("channelId", "missing"))?;
        let timestamp = self
            .timestamp
            .ok_or_else(|| SharedError::validation("timestamp", "missing"))?;
        if timestamp < 0 {
            return Err(SharedError::validation("timestamp", "must not be negative"));
        }

        match event_type {
            EventType::Read => Ok(ClientRequest::Read {
                channel_id,
                position: ReadPosition(timestamp),
            }),
            EventType::ResendRequest => Ok(ClientRequest::Resend {
                channel_id,
                after: ReadPosition(timestamp),
            }),
            EventType::Message => Err(SharedError::validation(
                "type",
                "messages are sent through the send endpoint",
            )),
        }
    }
}
