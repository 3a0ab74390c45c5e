/**
 * PostgreSQL Message Store
 *
 * Persists chat messages in the `chat_messages` table. Uniqueness of
 * `(channel_id, ordering_key)` is enforced by a database constraint, which
 * is the only cross-process uniqueness guarantee for ordering keys.
 *
 * The `ordering_key` column uses the `"C"` collation so `ORDER BY` and `>`
 * compare bytes, matching `OrderingKey`'s own ordering.
 */

use crate::backend::chat::store::{MessageStore, UnreadMarker};
use crate::backend::error::StoreError;
use crate::shared::{ChannelId, Message, MessageId, OrderingKey, ReadPosition, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    channel_id: i64,
    sender_id: Uuid,
    content: String,
    ordering_key: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let ordering_key = OrderingKey::parse(&row.ordering_key).map_err(|e| {
            StoreError::Database(sqlx::Error::Decode(
                format!("bad ordering key {:?}: {}", row.ordering_key, e).into(),
            ))
        })?;
        Ok(Message {
            id: MessageId(row.id),
            channel_id: ChannelId(row.channel_id),
            sender_id: UserId(row.sender_id),
            content: row.content,
            ordering_key,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MarkerRow {
    id: Uuid,
    created_at: DateTime<Utc>,
}

fn position_to_timestamp(position: ReadPosition) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(position.0.max(0)).unwrap_or_default()
}

/// Message store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load one message by id
    pub async fn message_by_id(&self, message_id: MessageId) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, channel_id, sender_id, content, ordering_key, created_at
            FROM chat_messages
            WHERE id = $1
            "#,
        )
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose()
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn commit(&self, message: Message) -> Result<Message, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (id, channel_id, sender_id, content, ordering_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id.0)
        .bind(message.channel_id.0)
        .bind(message.sender_id.0)
        .bind(&message.content)
        .bind(message.ordering_key.as_str())
        .bind(message.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(message),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateKey {
                    channel_id: message.channel_id,
                    ordering_key: message.ordering_key.to_string(),
                })
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn messages_since(
        &self,
        channel_id: ChannelId,
        cursor: Option<&OrderingKey>,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, channel_id, sender_id, content, ordering_key, created_at
            FROM chat_messages
            WHERE channel_id = $1 AND ($2::TEXT IS NULL OR ordering_key > $2)
            ORDER BY ordering_key ASC
            "#,
        )
        .bind(channel_id.0)
        .bind(cursor.map(OrderingKey::as_str))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn messages_after_position(
        &self,
        channel_id: ChannelId,
        position: ReadPosition,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, channel_id, sender_id, content, ordering_key, created_at
            FROM chat_messages
            WHERE channel_id = $1 AND created_at > $2
            ORDER BY ordering_key ASC
            "#,
        )
        .bind(channel_id.0)
        .bind(position_to_timestamp(position))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn unread_markers(
        &self,
        channel_id: ChannelId,
        reader: UserId,
        position: ReadPosition,
        limit: usize,
    ) -> Result<Vec<UnreadMarker>, StoreError> {
        let rows = sqlx::query_as::<_, MarkerRow>(
            r#"
            SELECT id, created_at
            FROM chat_messages
            WHERE channel_id = $1 AND created_at > $2 AND sender_id <> $3
            ORDER BY created_at ASC
            LIMIT $4
            "#,
        )
        .bind(channel_id.0)
        .bind(position_to_timestamp(position))
        .bind(reader.0)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UnreadMarker {
                message_id: MessageId(row.id),
                position: ReadPosition(row.created_at.timestamp_millis()),
            })
            .collect())
    }

    fn store_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            channel_id: 7,
            sender_id: Uuid::new_v4(),
            content: "hi".to_string(),
            ordering_key: "1000.000".to_string(),
            created_at: DateTime::<Utc>::from_timestamp_millis(1000).unwrap(),
        };
        let message = Message::try_from(row).unwrap();
        assert_eq!(message.channel_id, ChannelId(7));
        assert_eq!(message.position(), ReadPosition(1000));
    }

    #[test]
    fn test_row_with_bad_key_is_rejected() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            channel_id: 7,
            sender_id: Uuid::new_v4(),
            content: "hi".to_string(),
            ordering_key: "garbage".to_string(),
            created_at: Utc::now(),
        };
        assert!(Message::try_from(row).is_err());
    }

    #[test]
    fn test_ordering_key_column_compares_bytewise() {
        let schema = include_str!("../../../migrations/20260101000000_chat_core.sql");
        assert!(schema.contains(r#"ordering_key TEXT COLLATE "C" NOT NULL"#));
    }

    #[test]
    fn test_position_to_timestamp() {
        assert_eq!(position_to_timestamp(ReadPosition(1500)).timestamp_millis(), 1500);
    }
}
