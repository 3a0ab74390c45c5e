/**
 * Read-State Tracker
 *
 * Fast-path source of truth for read receipts and unread messages, keyed by
 * channel and then user.
 *
 * # State
 *
 * - receipts: last-read position per user and channel (max-wins)
 * - unread index: messages not yet covered by the user's read position, one
 *   entry per message id, kept in timestamp order
 *
 * All mutations happen under one lock as single steps. Network calls (the
 * mirror, the message store, the bus) are never made while it is held.
 *
 * # Durability
 *
 * Writes land in memory first. Changed receipts are published on the bus as
 * `READ` envelopes and handed to the write-behind queue. On a cache miss the
 * tracker reads through to the durable mirror and keeps the answer.
 *
 * # Other Servers
 *
 * Every channel with cached state has its own bus watch. `READ` envelopes
 * from any server advance cached receipts and `MESSAGE` envelopes add unread
 * entries for every cached user except the sender, so a server follows writes
 * made elsewhere. The bus is lossy: entries untouched for longer than the
 * configured idle time are evicted by `spawn_idle_sweep`, and the next access
 * reads through again.
 */

use crate::backend::access::ChannelAccess;
use crate::backend::chat::store::MessageStore;
use crate::backend::error::BackendError;
use crate::backend::read_state::mirror::ReadStateMirror;
use crate::backend::read_state::write_behind::WriteBehind;
use crate::backend::realtime::broadcast::publish_live;
use crate::backend::realtime::bus::BroadcastBus;
use crate::shared::{
    ChannelId, EventType, LiveEnvelope, MessageId, ReadPosition, ReadReceipt, ReadStateEvent, UserId,
};
use futures_util::StreamExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct UnreadIndex {
    by_time: BTreeSet<(i64, MessageId)>,
    by_id: HashMap<MessageId, i64>,
    /// Rebuilt from the message store at least once
    hydrated: bool,
    /// The last rebuild stopped at the row limit
    truncated: bool,
}

impl UnreadIndex {
    fn insert(&mut self, message_id: MessageId, position: ReadPosition) -> bool {
        if self.by_id.contains_key(&message_id) {
            return false;
        }
        self.by_id.insert(message_id, position.0);
        self.by_time.insert((position.0, message_id));
        true
    }

    fn clear_through(&mut self, position: ReadPosition) {
        let before = self.by_id.len();
        self.by_time.retain(|(timestamp, _)| *timestamp > position.0);
        self.by_id.retain(|_, timestamp| *timestamp > position.0);
        // Messages past a truncated rebuild were never loaded.
        if self.truncated && self.by_id.len() < before {
            self.hydrated = false;
        }
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchStatus {
    Starting,
    Running,
    Failed,
}

/// Bus subscription feeding one channel's cached state
struct BusWatch {
    handle: JoinHandle<()>,
    status: watch::Receiver<WatchStatus>,
}

impl Drop for BusWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct ChannelState {
    receipts: HashMap<UserId, ReadReceipt>,
    unread: HashMap<UserId, UnreadIndex>,
    touched: HashMap<UserId, Instant>,
    watch: Option<BusWatch>,
}

impl ChannelState {
    fn touch(&mut self, user_id: UserId) {
        self.touched.insert(user_id, Instant::now());
    }

    /// Cache a receipt loaded or heard from elsewhere without moving an entry
    /// backwards
    fn absorb(&mut self, receipt: ReadReceipt) -> ReadReceipt {
        let user_id = receipt.user_id;
        self.touched.entry(user_id).or_insert_with(Instant::now);
        let cached = self
            .receipts
            .entry(user_id)
            .and_modify(|cached| {
                if receipt.last_read_position > cached.last_read_position {
                    *cached = receipt.clone();
                }
            })
            .or_insert(receipt)
            .clone();
        if let Some(index) = self.unread.get_mut(&user_id) {
            index.clear_through(cached.last_read_position);
        }
        cached
    }

    /// Fold an envelope published by any server into the cache
    fn apply(&mut self, envelope: &LiveEnvelope) {
        match envelope.event_type {
            EventType::Read => {
                if let Some(user_id) = envelope.sender_id {
                    self.absorb(ReadReceipt::new(
                        user_id,
                        envelope.channel_id,
                        ReadPosition(envelope.timestamp),
                    ));
                }
            }
            EventType::Message => {
                let (Some(sender_id), Some(message_id)) = (envelope.sender_id, envelope.message_id) else {
                    return;
                };
                let position = ReadPosition(envelope.timestamp);
                let Self { receipts, unread, .. } = self;
                for (user_id, index) in unread.iter_mut().filter(|(user_id, _)| **user_id != sender_id) {
                    let covered = receipts
                        .get(user_id)
                        .map_or(false, |receipt| position <= receipt.last_read_position);
                    if !covered {
                        index.insert(message_id, position);
                    }
                }
            }
            EventType::ResendRequest => {}
        }
    }

    fn forget(&mut self, user_id: UserId) {
        self.receipts.remove(&user_id);
        self.unread.remove(&user_id);
        self.touched.remove(&user_id);
    }

    fn is_empty(&self) -> bool {
        self.receipts.is_empty() && self.unread.is_empty()
    }
}

#[derive(Default)]
struct TrackerState {
    channels: HashMap<ChannelId, ChannelState>,
}

/// Collaborators the tracker talks to
pub struct TrackerDeps {
    pub mirror: Arc<dyn ReadStateMirror>,
    pub store: Arc<dyn MessageStore>,
    pub access: Arc<dyn ChannelAccess>,
    pub bus: Arc<dyn BroadcastBus>,
    pub write_behind: WriteBehind,
    pub publish_timeout: Duration,
    /// Most unread markers loaded when rebuilding a cold index
    pub hydration_limit: usize,
}

pub struct ReadStateTracker {
    state: Arc<Mutex<TrackerState>>,
    deps: TrackerDeps,
}

impl ReadStateTracker {
    pub fn new(deps: TrackerDeps) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            deps,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, TrackerState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::state("read-state lock poisoned"))
    }

    /// Make sure envelopes for `channel_id` reach this tracker
    async fn watch_channel(&self, channel_id: ChannelId) -> Result<(), BackendError> {
        let mut status = {
            let mut state = self.state()?;
            let channel = state.channels.entry(channel_id).or_default();
            let needs_watch = channel
                .watch
                .as_ref()
                .map_or(true, |watch| watch.handle.is_finished());
            if needs_watch {
                channel.watch = Some(self.spawn_watch(channel_id));
            }
            match channel.watch.as_ref() {
                Some(watch) => watch.status.clone(),
                None => return Ok(()),
            }
        };

        let started = tokio::time::timeout(
            SUBSCRIBE_TIMEOUT,
            status.wait_for(|status| *status != WatchStatus::Starting),
        )
        .await;
        if !matches!(started, Ok(Ok(ref current)) if **current == WatchStatus::Running) {
            tracing::warn!(
                "[ReadState] No bus watch for channel {}, cached state may lag other servers",
                channel_id
            );
        }
        Ok(())
    }

    fn spawn_watch(&self, channel_id: ChannelId) -> BusWatch {
        let (status_tx, status_rx) = watch::channel(WatchStatus::Starting);
        let bus = self.deps.bus.clone();
        let state = Arc::downgrade(&self.state);
        let handle = tokio::spawn(async move {
            let mut stream = match bus.subscribe(channel_id).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("[ReadState] Bus watch for channel {} failed: {}", channel_id, e);
                    let _ = status_tx.send(WatchStatus::Failed);
                    return;
                }
            };
            let _ = status_tx.send(WatchStatus::Running);

            while let Some(envelope) = stream.next().await {
                let Some(shared) = state.upgrade() else {
                    break;
                };
                let Ok(mut guard) = shared.lock() else {
                    break;
                };
                if let Some(channel) = guard.channels.get_mut(&channel_id) {
                    channel.apply(&envelope);
                }
            }
            tracing::debug!("[ReadState] Bus watch for channel {} ended", channel_id);
        });

        BusWatch {
            handle,
            status: status_rx,
        }
    }

    /// Record `message_id` as unread; returns `false` when it was already
    /// tracked or is covered by the user's read position
    pub fn mark_unread(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        message_id: MessageId,
        timestamp: ReadPosition,
    ) -> Result<bool, BackendError> {
        let mut state = self.state()?;
        let channel = state.channels.entry(channel_id).or_default();
        channel.touched.entry(user_id).or_insert_with(Instant::now);
        if let Some(receipt) = channel.receipts.get(&user_id) {
            if timestamp <= receipt.last_read_position {
                return Ok(false);
            }
        }
        Ok(channel
            .unread
            .entry(user_id)
            .or_default()
            .insert(message_id, timestamp))
    }

    /// Move the read position forward (never back) and clear covered unread
    /// entries
    ///
    /// When the position actually advances, the new receipt is announced on
    /// the channel topic and queued for the durable mirror.
    pub async fn mark_read(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        position: ReadPosition,
    ) -> Result<ReadReceipt, BackendError> {
        // Load any durable receipt first so a cold cache cannot regress it.
        if let Err(e) = self.get_read_receipt(user_id, channel_id).await {
            tracing::warn!(
                "[ReadState] Mirror lookup for {}/{} failed, continuing from cache: {}",
                user_id,
                channel_id,
                e
            );
        }

        let (receipt, advanced) = {
            let mut state = self.state()?;
            let channel = state.channels.entry(channel_id).or_default();
            channel.touch(user_id);
            let (receipt, advanced) = match channel.receipts.get_mut(&user_id) {
                Some(receipt) => {
                    let advanced = receipt.advance(position);
                    (receipt.clone(), advanced)
                }
                None => {
                    let receipt = ReadReceipt::new(user_id, channel_id, position);
                    channel.receipts.insert(user_id, receipt.clone());
                    (receipt, true)
                }
            };
            if let Some(index) = channel.unread.get_mut(&user_id) {
                index.clear_through(receipt.last_read_position);
            }
            (receipt, advanced)
        };

        if advanced {
            tracing::debug!(
                "[ReadState] User {} read channel {} through {}",
                user_id,
                channel_id,
                receipt.last_read_position
            );
            publish_live(
                self.deps.bus.as_ref(),
                &LiveEnvelope::read(&receipt),
                self.deps.publish_timeout,
            )
            .await;
            self.deps
                .write_behind
                .submit(ReadStateEvent::receipt_updated(receipt.clone()));
        }
        Ok(receipt)
    }

    /// Number of unread messages for the user in the channel
    ///
    /// A cold index is rebuilt from the message store: messages after the
    /// user's read position that the user did not send, at most
    /// `hydration_limit` of them. A rebuild that hit the limit is repeated
    /// after the next read clears part of it.
    pub async fn get_unread_count(&self, user_id: UserId, channel_id: ChannelId) -> Result<usize, BackendError> {
        {
            let mut state = self.state()?;
            if let Some(channel) = state.channels.get_mut(&channel_id) {
                let hydrated = channel
                    .unread
                    .get(&user_id)
                    .filter(|index| index.hydrated)
                    .map(UnreadIndex::len);
                if let Some(count) = hydrated {
                    channel.touch(user_id);
                    return Ok(count);
                }
            }
        }

        let position = self
            .get_read_position(user_id, channel_id)
            .await?
            .unwrap_or(ReadPosition(i64::MIN));
        let limit = self.deps.hydration_limit;
        let markers = self
            .deps
            .store
            .unread_markers(channel_id, user_id, position, limit)
            .await?;

        let mut state = self.state()?;
        let channel = state.channels.entry(channel_id).or_default();
        channel.touch(user_id);
        let floor = channel
            .receipts
            .get(&user_id)
            .map(|receipt| receipt.last_read_position)
            .unwrap_or(ReadPosition(i64::MIN));
        let index = channel.unread.entry(user_id).or_default();
        for marker in &markers {
            index.insert(marker.message_id, marker.position);
        }
        index.truncated = false;
        index.clear_through(floor);
        index.truncated = markers.len() >= limit;
        index.hydrated = true;

        tracing::debug!(
            "[ReadState] Hydrated unread index for {}/{}: {} entries{}",
            user_id,
            channel_id,
            index.len(),
            if index.truncated { " (limit reached)" } else { "" }
        );
        Ok(index.len())
    }

    pub async fn get_read_position(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Option<ReadPosition>, BackendError> {
        Ok(self
            .get_read_receipt(user_id, channel_id)
            .await?
            .map(|receipt| receipt.last_read_position))
    }

    /// Receipt from the cache, falling back to the durable mirror on a miss
    pub async fn get_read_receipt(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<Option<ReadReceipt>, BackendError> {
        self.watch_channel(channel_id).await?;
        {
            let mut state = self.state()?;
            if let Some(channel) = state.channels.get_mut(&channel_id) {
                if let Some(receipt) = channel.receipts.get(&user_id).cloned() {
                    channel.touch(user_id);
                    return Ok(Some(receipt));
                }
            }
        }

        let loaded = self.deps.mirror.load_receipt(user_id, channel_id).await?;
        match loaded {
            Some(receipt) => {
                let mut state = self.state()?;
                let channel = state.channels.entry(channel_id).or_default();
                channel.touch(user_id);
                Ok(Some(channel.absorb(receipt)))
            }
            None => Ok(None),
        }
    }

    /// Receipts of several channel members
    ///
    /// The requester must have access to the channel. Cached receipts are
    /// collected in one pass and all misses go to the mirror in one bulk
    /// query. Members without any receipt are left out.
    pub async fn get_channel_read_receipts(
        &self,
        requester: UserId,
        channel_id: ChannelId,
        member_ids: &[UserId],
    ) -> Result<Vec<ReadReceipt>, BackendError> {
        self.deps
            .access
            .require_channel_access(requester, channel_id)
            .await?;
        self.watch_channel(channel_id).await?;

        let mut found: HashMap<UserId, ReadReceipt> = HashMap::with_capacity(member_ids.len());
        let mut misses = Vec::new();
        {
            let state = self.state()?;
            let cached = state.channels.get(&channel_id).map(|channel| &channel.receipts);
            for member in member_ids {
                match cached.and_then(|receipts| receipts.get(member)) {
                    Some(receipt) => {
                        found.insert(*member, receipt.clone());
                    }
                    None => misses.push(*member),
                }
            }
        }

        if !misses.is_empty() {
            let loaded = self.deps.mirror.load_receipts(channel_id, &misses).await?;
            let mut state = self.state()?;
            let channel = state.channels.entry(channel_id).or_default();
            for receipt in loaded {
                let cached = channel.absorb(receipt);
                found.insert(cached.user_id, cached);
            }
        }

        Ok(member_ids
            .iter()
            .filter_map(|member| found.remove(member))
            .collect())
    }

    /// Forget everything cached for one user and channel
    pub fn evict(&self, user_id: UserId, channel_id: ChannelId) -> Result<(), BackendError> {
        let mut state = self.state()?;
        let emptied = match state.channels.get_mut(&channel_id) {
            Some(channel) => {
                channel.forget(user_id);
                channel.is_empty()
            }
            None => false,
        };
        if emptied {
            state.channels.remove(&channel_id);
        }
        Ok(())
    }

    /// Evict every user whose cached state was not touched for `max_idle`
    ///
    /// Channels left without cached users lose their bus watch. Returns the
    /// number of `(user, channel)` entries evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> Result<usize, BackendError> {
        let now = Instant::now();
        let mut state = self.state()?;
        let mut evicted = 0;
        state.channels.retain(|_, channel| {
            let idle: Vec<UserId> = channel
                .touched
                .iter()
                .filter(|(_, touched)| now.saturating_duration_since(**touched) >= max_idle)
                .map(|(user_id, _)| *user_id)
                .collect();
            evicted += idle.len();
            for user_id in idle {
                channel.forget(user_id);
            }
            !channel.is_empty()
        });
        Ok(evicted)
    }

    /// Number of channels with cached state
    pub fn cached_channels(&self) -> usize {
        self.state().map(|state| state.channels.len()).unwrap_or(0)
    }
}

/// Evict idle read state periodically until `shutdown` flips
pub fn spawn_idle_sweep(
    tracker: Arc<ReadStateTracker>,
    max_idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval((max_idle / 4).max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => match tracker.evict_idle(max_idle) {
                    Ok(0) => {}
                    Ok(evicted) => tracing::debug!("[ReadState] Evicted {} idle entries", evicted),
                    Err(e) => tracing::warn!("[ReadState] Idle sweep failed: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::access::StaticChannelAccess;
    use crate::backend::chat::store::InMemoryMessageStore;
    use crate::backend::read_state::mirror::InMemoryReadStateMirror;
    use crate::backend::realtime::bus::LocalBus;
    use crate::backend::retry::RetryBuffer;
    use crate::shared::{EventType, Message, OrderingKey};
    use futures_util::StreamExt;
    use tokio::sync::mpsc;

    struct Harness {
        tracker: ReadStateTracker,
        mirror: Arc<InMemoryReadStateMirror>,
        store: Arc<InMemoryMessageStore>,
        access: Arc<StaticChannelAccess>,
        bus: LocalBus,
        queued: mpsc::Receiver<ReadStateEvent>,
    }

    fn harness() -> Harness {
        harness_with_limit(1_000)
    }

    fn harness_with_limit(hydration_limit: usize) -> Harness {
        let mirror = Arc::new(InMemoryReadStateMirror::new());
        let store = Arc::new(InMemoryMessageStore::new());
        let access = Arc::new(StaticChannelAccess::closed());
        let bus = LocalBus::new();
        let (write_behind, queued) = WriteBehind::channel(64, Arc::new(RetryBuffer::new(64)));
        let tracker = ReadStateTracker::new(TrackerDeps {
            mirror: mirror.clone(),
            store: store.clone(),
            access: access.clone(),
            bus: Arc::new(bus.clone()),
            write_behind,
            publish_timeout: Duration::from_millis(50),
            hydration_limit,
        });
        Harness {
            tracker,
            mirror,
            store,
            access,
            bus,
            queued,
        }
    }

    const CH: ChannelId = ChannelId(7);

    #[tokio::test]
    async fn test_mark_unread_is_idempotent() {
        let h = harness();
        let user = UserId::new();
        let message = MessageId::new();
        h.tracker.get_unread_count(user, CH).await.unwrap();

        assert!(h.tracker.mark_unread(user, CH, message, ReadPosition(1000)).unwrap());
        assert!(!h.tracker.mark_unread(user, CH, message, ReadPosition(1000)).unwrap());
        assert_eq!(h.tracker.get_unread_count(user, CH).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_max_wins_and_clears_covered_entries() {
        let mut h = harness();
        let user = UserId::new();
        h.tracker.get_unread_count(user, CH).await.unwrap();
        for ts in [1000, 2000, 3000] {
            h.tracker.mark_unread(user, CH, MessageId::new(), ReadPosition(ts)).unwrap();
        }

        h.tracker.mark_read(user, CH, ReadPosition(2000)).await.unwrap();
        assert_eq!(h.tracker.get_unread_count(user, CH).await.unwrap(), 1);

        let receipt = h.tracker.mark_read(user, CH, ReadPosition(1999)).await.unwrap();
        assert_eq!(receipt.last_read_position, ReadPosition(2000));
        assert_eq!(
            h.tracker.get_read_position(user, CH).await.unwrap(),
            Some(ReadPosition(2000))
        );

        // Only the advancing call reached the write-behind queue.
        assert!(h.queued.try_recv().is_ok());
        assert!(h.queued.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_unread_below_read_position_is_ignored() {
        let h = harness();
        let user = UserId::new();
        h.tracker.mark_read(user, CH, ReadPosition(5000)).await.unwrap();
        assert!(!h.tracker.mark_unread(user, CH, MessageId::new(), ReadPosition(4000)).unwrap());
    }

    #[tokio::test]
    async fn test_mark_read_broadcasts_read_envelope() {
        let h = harness();
        let user = UserId::new();
        let mut topic = h.bus.subscribe(CH).await.unwrap();

        h.tracker.mark_read(user, CH, ReadPosition(1500)).await.unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), topic.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.event_type, EventType::Read);
        assert_eq!(envelope.sender_id, Some(user));
        assert_eq!(envelope.timestamp, 1500);
    }

    #[tokio::test]
    async fn test_read_through_caches_mirror_value() {
        let h = harness();
        let user = UserId::new();
        h.mirror
            .persist(&ReadStateEvent::receipt_updated(ReadReceipt::new(user, CH, ReadPosition(900))))
            .await
            .unwrap();

        let first = h.tracker.get_read_receipt(user, CH).await.unwrap().unwrap();
        let durable = h.mirror.load_receipt(user, CH).await.unwrap().unwrap();
        assert_eq!(first, durable);
        let loads = h.mirror.point_loads();

        let second = h.tracker.get_read_receipt(user, CH).await.unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(h.mirror.point_loads(), loads);
    }

    #[tokio::test]
    async fn test_cold_mark_read_does_not_regress_durable_position() {
        let h = harness();
        let user = UserId::new();
        h.mirror
            .persist(&ReadStateEvent::receipt_updated(ReadReceipt::new(user, CH, ReadPosition(900))))
            .await
            .unwrap();

        let receipt = h.tracker.mark_read(user, CH, ReadPosition(100)).await.unwrap();
        assert_eq!(receipt.last_read_position, ReadPosition(900));
    }

    #[tokio::test]
    async fn test_cold_unread_count_hydrates_from_store() {
        let h = harness();
        let (reader, writer) = (UserId::new(), UserId::new());
        for (millis, sender) in [(1000, writer), (2000, reader), (3000, writer)] {
            h.store
                .commit(Message::new(CH, sender, "hi", OrderingKey::from_parts(millis, 0)))
                .await
                .unwrap();
        }
        h.mirror
            .persist(&ReadStateEvent::receipt_updated(ReadReceipt::new(reader, CH, ReadPosition(1000))))
            .await
            .unwrap();

        // Only the message at 3000 is after the read position and not the reader's own.
        assert_eq!(h.tracker.get_unread_count(reader, CH).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_channel_receipts_require_access() {
        let h = harness();
        let stranger = UserId::new();
        let result = h.tracker.get_channel_read_receipts(stranger, CH, &[UserId::new()]).await;
        assert_eq!(result.unwrap_err().status_code(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_channel_receipts_use_one_bulk_query_for_misses() {
        let h = harness();
        let requester = UserId::new();
        h.access.add_member(CH, requester);

        let cached = UserId::new();
        h.tracker.mark_read(cached, CH, ReadPosition(10)).await.unwrap();
        let cold: Vec<UserId> = (0..5).map(|_| UserId::new()).collect();
        for (i, user) in cold.iter().enumerate() {
            h.mirror
                .persist(&ReadStateEvent::receipt_updated(ReadReceipt::new(*user, CH, ReadPosition(i as i64))))
                .await
                .unwrap();
        }

        let mut members = vec![cached];
        members.extend(cold.iter().copied());
        members.push(UserId::new());

        let receipts = h
            .tracker
            .get_channel_read_receipts(requester, CH, &members)
            .await
            .unwrap();
        assert_eq!(receipts.len(), 6);
        assert_eq!(receipts[0].user_id, cached);
        assert_eq!(h.mirror.bulk_loads(), 1);

        // The misses are cached now.
        h.tracker
            .get_channel_read_receipts(requester, CH, &members[..6])
            .await
            .unwrap();
        assert_eq!(h.mirror.bulk_loads(), 1);
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_same_message_counted_once_whatever_its_timestamp() {
        let h = harness();
        let user = UserId::new();
        let message = MessageId::new();
        h.tracker.get_unread_count(user, CH).await.unwrap();

        assert!(h.tracker.mark_unread(user, CH, message, ReadPosition(100)).unwrap());
        assert!(!h.tracker.mark_unread(user, CH, message, ReadPosition(101)).unwrap());
        assert_eq!(h.tracker.get_unread_count(user, CH).await.unwrap(), 1);

        h.tracker.mark_read(user, CH, ReadPosition(100)).await.unwrap();
        assert_eq!(h.tracker.get_unread_count(user, CH).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_envelope_from_another_server_advances_cached_receipt() {
        let h = harness();
        let user = UserId::new();
        h.tracker.mark_read(user, CH, ReadPosition(1000)).await.unwrap();

        let elsewhere = ReadReceipt::new(user, CH, ReadPosition(5000));
        h.bus.publish(CH, &LiveEnvelope::read(&elsewhere)).await.unwrap();

        let tracker = &h.tracker;
        assert!(
            eventually(|| async move {
                tracker.get_read_position(user, CH).await.unwrap() == Some(ReadPosition(5000))
            })
            .await
        );

        // An older envelope arriving late never moves it back.
        let stale = ReadReceipt::new(user, CH, ReadPosition(2000));
        h.bus.publish(CH, &LiveEnvelope::read(&stale)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            h.tracker.get_read_position(user, CH).await.unwrap(),
            Some(ReadPosition(5000))
        );
    }

    #[tokio::test]
    async fn test_message_envelope_from_another_server_marks_unread() {
        let h = harness();
        let (reader, writer) = (UserId::new(), UserId::new());
        assert_eq!(h.tracker.get_unread_count(reader, CH).await.unwrap(), 0);
        assert_eq!(h.tracker.get_unread_count(writer, CH).await.unwrap(), 0);

        let message = Message::new(CH, writer, "hi", OrderingKey::from_parts(4000, 0));
        h.bus.publish(CH, &LiveEnvelope::message(&message)).await.unwrap();
        h.bus.publish(CH, &LiveEnvelope::message(&message)).await.unwrap();

        let tracker = &h.tracker;
        assert!(
            eventually(|| async move { tracker.get_unread_count(reader, CH).await.unwrap() == 1 }).await
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.tracker.get_unread_count(reader, CH).await.unwrap(), 1);
        assert_eq!(h.tracker.get_unread_count(writer, CH).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idle_entries_are_evicted_and_read_through_again() {
        let h = harness();
        let user = UserId::new();
        h.mirror
            .persist(&ReadStateEvent::receipt_updated(ReadReceipt::new(user, CH, ReadPosition(900))))
            .await
            .unwrap();
        h.tracker.get_read_receipt(user, CH).await.unwrap();
        h.tracker.get_unread_count(user, CH).await.unwrap();
        assert_eq!(h.tracker.cached_channels(), 1);

        assert_eq!(h.tracker.evict_idle(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(h.tracker.evict_idle(Duration::ZERO).unwrap(), 1);
        assert_eq!(h.tracker.cached_channels(), 0);

        let loads = h.mirror.point_loads();
        let receipt = h.tracker.get_read_receipt(user, CH).await.unwrap().unwrap();
        assert_eq!(receipt.last_read_position, ReadPosition(900));
        assert_eq!(h.mirror.point_loads(), loads + 1);
    }

    #[tokio::test]
    async fn test_hydration_stops_at_limit_and_rebuilds_after_read() {
        let h = harness_with_limit(3);
        let (reader, writer) = (UserId::new(), UserId::new());
        for millis in [1000, 2000, 3000, 4000, 5000] {
            h.store
                .commit(Message::new(CH, writer, "hi", OrderingKey::from_parts(millis, 0)))
                .await
                .unwrap();
        }

        assert_eq!(h.tracker.get_unread_count(reader, CH).await.unwrap(), 3);

        h.tracker.mark_read(reader, CH, ReadPosition(3000)).await.unwrap();
        assert_eq!(h.tracker.get_unread_count(reader, CH).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_idle_sweep_stops_on_shutdown() {
        let h = harness();
        let tracker = Arc::new(h.tracker);
        tracker.mark_unread(UserId::new(), CH, MessageId::new(), ReadPosition(1)).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep = spawn_idle_sweep(tracker.clone(), Duration::ZERO, shutdown_rx);
        let swept = tracker.clone();
        assert!(eventually(|| {
            let swept = swept.clone();
            async move { swept.cached_channels() == 0 }
        })
        .await);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), sweep).await.unwrap().unwrap();
    }
}
