/**
 * Durable Read-State Mirror
 *
 * The mirror lags the in-memory tracker and is written asynchronously. It is
 * consulted when the tracker has no entry for a user (cold start, eviction)
 * and is the replay target of the retry buffer.
 *
 * Writes are max-wins: persisting an older position never moves a stored
 * receipt backwards, so replaying events out of order is harmless.
 */

use crate::backend::error::MirrorError;
use crate::shared::{ChannelId, ReadPosition, ReadReceipt, ReadStateEvent, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait ReadStateMirror: Send + Sync {
    /// Upsert the receipt carried by `event` (max-wins)
    async fn persist(&self, event: &ReadStateEvent) -> Result<(), MirrorError>;

    async fn load_receipt(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Option<ReadReceipt>, MirrorError>;

    /// Receipts for several users of one channel in a single round trip
    async fn load_receipts(
        &self,
        channel_id: ChannelId,
        user_ids: &[UserId],
    ) -> Result<Vec<ReadReceipt>, MirrorError>;

    fn mirror_name(&self) -> &'static str;
}

/// In-memory mirror used in single-node mode and tests
#[derive(Debug)]
pub struct InMemoryReadStateMirror {
    receipts: RwLock<HashMap<(UserId, ChannelId), ReadReceipt>>,
    available: AtomicBool,
    persist_calls: AtomicUsize,
    point_loads: AtomicUsize,
    bulk_loads: AtomicUsize,
}

impl InMemoryReadStateMirror {
    pub fn new() -> Self {
        Self {
            receipts: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            persist_calls: AtomicUsize::new(0),
            point_loads: AtomicUsize::new(0),
            bulk_loads: AtomicUsize::new(0),
        }
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `persist` calls, successful or not
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Number of `load_receipt` calls
    pub fn point_loads(&self) -> usize {
        self.point_loads.load(Ordering::SeqCst)
    }

    /// Number of `load_receipts` calls
    pub fn bulk_loads(&self) -> usize {
        self.bulk_loads.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), MirrorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MirrorError::Unavailable("in-memory mirror disabled".to_string()))
        }
    }

    fn read_map(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<(UserId, ChannelId), ReadReceipt>>, MirrorError> {
        self.receipts
            .read()
            .map_err(|_| MirrorError::Unavailable("mirror lock poisoned".to_string()))
    }
}

impl Default for InMemoryReadStateMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadStateMirror for InMemoryReadStateMirror {
    async fn persist(&self, event: &ReadStateEvent) -> Result<(), MirrorError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let receipt = &event.receipt;
        let mut receipts = self
            .receipts
            .write()
            .map_err(|_| MirrorError::Unavailable("mirror lock poisoned".to_string()))?;
        receipts
            .entry((receipt.user_id, receipt.channel_id))
            .and_modify(|stored| {
                if receipt.last_read_position > stored.last_read_position {
                    *stored = receipt.clone();
                }
            })
            .or_insert_with(|| receipt.clone());
        Ok(())
    }

    async fn load_receipt(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Option<ReadReceipt>, MirrorError> {
        self.point_loads.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        Ok(self.read_map()?.get(&(user_id, channel_id)).cloned())
    }

    async fn load_receipts(
        &self,
        channel_id: ChannelId,
        user_ids: &[UserId],
    ) -> Result<Vec<ReadReceipt>, MirrorError> {
        self.bulk_loads.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let receipts = self.read_map()?;
        Ok(user_ids
            .iter()
            .filter_map(|user_id| receipts.get(&(*user_id, channel_id)).cloned())
            .collect())
    }

    fn mirror_name(&self) -> &'static str {
        "memory"
    }
}

#[derive(sqlx::FromRow)]
struct ReceiptRow {
    user_id: Uuid,
    channel_id: i64,
    last_read_position: i64,
    updated_at: DateTime<Utc>,
}

impl From<ReceiptRow> for ReadReceipt {
    fn from(row: ReceiptRow) -> Self {
        Self {
            user_id: UserId(row.user_id),
            channel_id: ChannelId(row.channel_id),
            last_read_position: ReadPosition(row.last_read_position),
            updated_at: row.updated_at,
        }
    }
}

/// Mirror backed by the `read_receipts` table
#[derive(Debug, Clone)]
pub struct PgReadStateMirror {
    pool: PgPool,
}

impl PgReadStateMirror {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadStateMirror for PgReadStateMirror {
    async fn persist(&self, event: &ReadStateEvent) -> Result<(), MirrorError> {
        let receipt = &event.receipt;
        sqlx::query(
            r#"
            INSERT INTO read_receipts (user_id, channel_id, last_read_position, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, channel_id) DO UPDATE SET
                last_read_position = GREATEST(read_receipts.last_read_position, EXCLUDED.last_read_position),
                updated_at = CASE
                    WHEN EXCLUDED.last_read_position > read_receipts.last_read_position
                    THEN EXCLUDED.updated_at
                    ELSE read_receipts.updated_at
                END
            "#,
        )
        .bind(receipt.user_id.0)
        .bind(receipt.channel_id.0)
        .bind(receipt.last_read_position.0)
        .bind(receipt.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_receipt(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Option<ReadReceipt>, MirrorError> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT user_id, channel_id, last_read_position, updated_at
            FROM read_receipts
            WHERE user_id = $1 AND channel_id = $2
            "#,
        )
        .bind(user_id.0)
        .bind(channel_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ReadReceipt::from))
    }

    async fn load_receipts(
        &self,
        channel_id: ChannelId,
        user_ids: &[UserId],
    ) -> Result<Vec<ReadReceipt>, MirrorError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = user_ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT user_id, channel_id, last_read_position, updated_at
            FROM read_receipts
            WHERE channel_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(channel_id.0)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReadReceipt::from).collect())
    }

    fn mirror_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: UserId, position: i64) -> ReadStateEvent {
        ReadStateEvent::receipt_updated(ReadReceipt::new(user, ChannelId(1), ReadPosition(position)))
    }

    #[tokio::test]
    async fn test_persist_is_max_wins() {
        let mirror = InMemoryReadStateMirror::new();
        let user = UserId::new();
        mirror.persist(&event(user, 200)).await.unwrap();
        mirror.persist(&event(user, 100)).await.unwrap();

        let stored = mirror.load_receipt(user, ChannelId(1)).await.unwrap().unwrap();
        assert_eq!(stored.last_read_position, ReadPosition(200));
        assert_eq!(mirror.persist_calls(), 2);
    }

    #[tokio::test]
    async fn test_bulk_load_returns_only_known_users() {
        let mirror = InMemoryReadStateMirror::new();
        let (a, b) = (UserId::new(), UserId::new());
        mirror.persist(&event(a, 10)).await.unwrap();

        let found = mirror.load_receipts(ChannelId(1), &[a, b]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, a);
        assert_eq!(mirror.bulk_loads(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_mirror_fails_persist() {
        let mirror = InMemoryReadStateMirror::new();
        mirror.set_available(false);
        assert!(matches!(
            mirror.persist(&event(UserId::new(), 1)).await,
            Err(MirrorError::Unavailable(_))
        ));
    }

    #[test]
    fn test_row_conversion() {
        let user = Uuid::new_v4();
        let receipt = ReadReceipt::from(ReceiptRow {
            user_id: user,
            channel_id: 3,
            last_read_position: 42,
            updated_at: Utc::now(),
        });
        assert_eq!(receipt.user_id, UserId(user));
        assert_eq!(receipt.last_read_position, ReadPosition(42));
    }
}
