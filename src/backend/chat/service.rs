/**
 * Chat Send Pipeline
 *
 * `ChatService::send` is the write path for one message:
 *
 * 1. channel ownership check (wrong server → `SendOutcome::Redirect`)
 * 2. ordering key from the process-local generator
 * 3. durable commit in the message store
 * 4. live publish on the bus, bounded by a short timeout
 * 5. unread marks for every other channel member
 *
 * Steps 1-3 decide the outcome. Step 4 never blocks or fails the send: a
 * skipped publish leaves the message committed and recipients pick it up
 * through catch-up. Nothing is announced before the commit succeeds.
 */

use crate::backend::access::ChannelAccess;
use crate::backend::chat::store::MessageStore;
use crate::backend::error::{BackendError, SendOutcome};
use crate::backend::ordering::OrderingKeyGenerator;
use crate::backend::read_state::ReadStateTracker;
use crate::backend::realtime::broadcast::{publish_live, PublishOutcome};
use crate::backend::realtime::bus::BroadcastBus;
use crate::backend::routing::ChannelRouter;
use crate::shared::{ChannelId, LiveEnvelope, Message, OrderingKey, ReadPosition, SharedError, UserId};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on message length in characters
pub const MAX_CONTENT_LENGTH: usize = 10_000;

pub struct ChatDeps {
    pub router: Arc<ChannelRouter>,
    pub generator: Arc<OrderingKeyGenerator>,
    pub store: Arc<dyn MessageStore>,
    pub bus: Arc<dyn BroadcastBus>,
    pub tracker: Arc<ReadStateTracker>,
    pub access: Arc<dyn ChannelAccess>,
    pub publish_timeout: Duration,
}

pub struct ChatService {
    deps: ChatDeps,
}

impl ChatService {
    pub fn new(deps: ChatDeps) -> Self {
        Self { deps }
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.deps.router
    }

    pub fn tracker(&self) -> &Arc<ReadStateTracker> {
        &self.deps.tracker
    }

    pub fn access(&self) -> &Arc<dyn ChannelAccess> {
        &self.deps.access
    }

    /// Submit a message to `channel_id` on behalf of `sender_id`
    pub async fn send(&self, channel_id: ChannelId, sender_id: UserId, content: &str) -> SendOutcome {
        if let Err(redirect) = self.deps.router.check(channel_id) {
            tracing::info!(
                "[Chat] Channel {} belongs to server {}, redirecting sender {}",
                channel_id,
                redirect.expected_server_id,
                sender_id
            );
            return SendOutcome::Redirect(redirect);
        }

        match self.commit(channel_id, sender_id, content).await {
            Ok(message) => {
                self.announce(&message).await;
                SendOutcome::Delivered(message)
            }
            Err(e) => SendOutcome::Failed(e),
        }
    }

    async fn commit(&self, channel_id: ChannelId, sender_id: UserId, content: &str) -> Result<Message, BackendError> {
        if content.trim().is_empty() {
            return Err(SharedError::validation("content", "must not be empty").into());
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(SharedError::validation(
                "content",
                format!("longer than {} characters", MAX_CONTENT_LENGTH),
            )
            .into());
        }
        self.deps
            .access
            .require_channel_access(sender_id, channel_id)
            .await?;

        let ordering_key = self.deps.generator.next(Some(channel_id)).map_err(|e| {
            tracing::error!("[Chat] Ordering key for channel {} unavailable: {}", channel_id, e);
            e
        })?;

        let message = Message::new(channel_id, sender_id, content, ordering_key);
        let committed = self.deps.store.commit(message).await?;
        tracing::debug!(
            "[Chat] Committed {} in channel {} via {}",
            committed.ordering_key,
            channel_id,
            self.deps.store.store_name()
        );
        Ok(committed)
    }

    async fn announce(&self, message: &Message) {
        let outcome = publish_live(
            self.deps.bus.as_ref(),
            &LiveEnvelope::message(message),
            self.deps.publish_timeout,
        )
        .await;
        if outcome == PublishOutcome::Skipped {
            tracing::info!(
                "[Chat] Message {} committed without live delivery",
                message.ordering_key
            );
        }

        let members = match self.deps.access.channel_members(message.channel_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(
                    "[Chat] Member lookup for channel {} failed, unread marks skipped: {}",
                    message.channel_id,
                    e
                );
                return;
            }
        };
        for member in members.into_iter().filter(|member| *member != message.sender_id) {
            if let Err(e) = self.deps.tracker.mark_unread(
                member,
                message.channel_id,
                message.id,
                message.position(),
            ) {
                tracing::warn!("[Chat] Unread mark for {} failed: {}", member, e);
            }
        }
    }

    /// Messages strictly after a read position, in ordering-key order
    pub async fn catch_up(&self, channel_id: ChannelId, after: ReadPosition) -> Result<Vec<Message>, BackendError> {
        Ok(self
            .deps
            .store
            .messages_after_position(channel_id, after)
            .await?)
    }

    /// Messages strictly after an ordering key (all when `None`)
    pub async fn messages_since(
        &self,
        channel_id: ChannelId,
        cursor: Option<&OrderingKey>,
    ) -> Result<Vec<Message>, BackendError> {
        Ok(self.deps.store.messages_since(channel_id, cursor).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::access::StaticChannelAccess;
    use crate::backend::chat::store::InMemoryMessageStore;
    use crate::backend::error::{OrderingError, StoreError};
    use crate::backend::ordering::Clock;
    use crate::backend::read_state::{InMemoryReadStateMirror, TrackerDeps, WriteBehind};
    use crate::backend::realtime::bus::LocalBus;
    use crate::backend::retry::RetryBuffer;
    use crate::shared::ServerId;
    use assert_matches::assert_matches;
    use futures_util::StreamExt;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> Result<i64, OrderingError> {
            Ok(self.0)
        }
    }

    struct BrokenClock;

    impl Clock for BrokenClock {
        fn now_millis(&self) -> Result<i64, OrderingError> {
            Err(OrderingError::ClockUnavailable("no time source".into()))
        }
    }

    struct Setup {
        service: ChatService,
        store: Arc<InMemoryMessageStore>,
        bus: LocalBus,
        access: Arc<StaticChannelAccess>,
    }

    fn setup(local: u32, count: u32, clock: Arc<dyn Clock>) -> Setup {
        let store = Arc::new(InMemoryMessageStore::new());
        let bus = LocalBus::new();
        let access = Arc::new(StaticChannelAccess::open());
        let (write_behind, _rx) = WriteBehind::channel(16, Arc::new(RetryBuffer::new(16)));
        let tracker = Arc::new(ReadStateTracker::new(TrackerDeps {
            mirror: Arc::new(InMemoryReadStateMirror::new()),
            store: store.clone(),
            access: access.clone(),
            bus: Arc::new(bus.clone()),
            write_behind,
            publish_timeout: Duration::from_millis(50),
            hydration_limit: 1_000,
        }));
        let service = ChatService::new(ChatDeps {
            router: Arc::new(ChannelRouter::new(ServerId(local), count)),
            generator: Arc::new(OrderingKeyGenerator::new(clock)),
            store: store.clone(),
            bus: Arc::new(bus.clone()),
            tracker,
            access: access.clone(),
            publish_timeout: Duration::from_millis(50),
        });
        Setup {
            service,
            store,
            bus,
            access,
        }
    }

    #[tokio::test]
    async fn test_send_commits_then_publishes() {
        let s = setup(0, 1, Arc::new(FixedClock(1000)));
        let mut live = s.bus.subscribe(ChannelId(7)).await.unwrap();

        let outcome = s.service.send(ChannelId(7), UserId::new(), "hello").await;
        let message = assert_matches!(outcome, SendOutcome::Delivered(m) => m);
        assert_eq!(message.ordering_key.as_str(), "1000.000");
        assert_eq!(s.store.len(ChannelId(7)).await, 1);

        let envelope = live.next().await.unwrap();
        assert_eq!(envelope.to_message(), Some(message));
    }

    #[tokio::test]
    async fn test_wrong_server_redirects_without_consuming_a_key() {
        // 7 mod 3 = 1, so server 0 is not the owner.
        let s = setup(0, 3, Arc::new(FixedClock(1000)));
        let outcome = s.service.send(ChannelId(7), UserId::new(), "hello").await;
        let redirect = assert_matches!(outcome, SendOutcome::Redirect(r) => r);
        assert_eq!(redirect.expected_server_id, ServerId(1));
        assert_eq!(redirect.actual_server_id, ServerId(0));
        assert_eq!(s.store.len(ChannelId(7)).await, 0);
    }

    #[tokio::test]
    async fn test_empty_content_is_rejected() {
        let s = setup(0, 1, Arc::new(FixedClock(1000)));
        let outcome = s.service.send(ChannelId(7), UserId::new(), "   ").await;
        let error = assert_matches!(outcome, SendOutcome::Failed(e) => e);
        assert_eq!(error.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_clock_failure_is_surfaced() {
        let s = setup(0, 1, Arc::new(BrokenClock));
        let outcome = s.service.send(ChannelId(7), UserId::new(), "hello").await;
        assert_matches!(outcome, SendOutcome::Failed(BackendError::Ordering(_)));
    }

    #[tokio::test]
    async fn test_store_outage_fails_without_publishing() {
        let s = setup(0, 1, Arc::new(FixedClock(1000)));
        let mut live = s.bus.subscribe(ChannelId(7)).await.unwrap();
        s.store.set_available(false);

        let outcome = s.service.send(ChannelId(7), UserId::new(), "hello").await;
        assert_matches!(outcome, SendOutcome::Failed(BackendError::Store(StoreError::Unavailable(_))));
        assert!(tokio::time::timeout(Duration::from_millis(50), live.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_marks_unread_for_other_members() {
        let s = setup(0, 1, Arc::new(FixedClock(1000)));
        let (sender, reader) = (UserId::new(), UserId::new());
        s.access.add_member(ChannelId(7), sender);
        s.access.add_member(ChannelId(7), reader);
        let tracker = s.service.tracker().clone();
        tracker.get_unread_count(reader, ChannelId(7)).await.unwrap();
        tracker.get_unread_count(sender, ChannelId(7)).await.unwrap();

        assert!(s.service.send(ChannelId(7), sender, "hello").await.is_delivered());

        assert_eq!(tracker.get_unread_count(reader, ChannelId(7)).await.unwrap(), 1);
        assert_eq!(tracker.get_unread_count(sender, ChannelId(7)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keys_advance_within_one_millisecond() {
        let s = setup(0, 1, Arc::new(FixedClock(1000)));
        let user = UserId::new();
        s.service.send(ChannelId(7), user, "a").await;
        s.service.send(ChannelId(7), user, "b").await;
        let keys: Vec<String> = s
            .service
            .messages_since(ChannelId(7), None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.ordering_key.to_string())
            .collect();
        assert_eq!(keys, vec!["1000.000", "1000.001"]);
    }
}
