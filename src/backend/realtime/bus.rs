/**
 * Broadcast Bus
 *
 * Fire-and-forget publish/subscribe used to fan a committed message out to
 * every server process. The topic is the channel id and the payload is the
 * full `LiveEnvelope`, so subscribers never need a second fetch.
 *
 * # Semantics
 *
 * - No acknowledgement, no persistence, no ordering across topics.
 * - A subscriber that was disconnected misses whatever was published in the
 *   meantime and must catch up from the message store.
 *
 * # Transports
 *
 * - `LocalBus` - in-process `tokio::sync::broadcast` channel per topic
 * - `PgNotifyBus` - PostgreSQL `pg_notify` / `LISTEN`, reaches every process
 *   connected to the same database. One listener connection per process
 *   serves every topic. A `MESSAGE` envelope too large for a NOTIFY payload
 *   is sent as a reference and reloaded from the message store on receipt.
 */

use crate::backend::chat::PgMessageStore;
use crate::backend::error::BusError;
use crate::shared::{ChannelId, EventType, LiveEnvelope, MessageId};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// Stream of envelopes for one topic
pub type EnvelopeStream = BoxStream<'static, LiveEnvelope>;

#[async_trait]
pub trait BroadcastBus: Send + Sync {
    /// Publish to every subscriber of `topic` in every process
    async fn publish(&self, topic: ChannelId, envelope: &LiveEnvelope) -> Result<(), BusError>;

    /// Subscribe to `topic`; the stream ends when the transport closes
    async fn subscribe(&self, topic: ChannelId) -> Result<EnvelopeStream, BusError>;

    fn bus_name(&self) -> &'static str;
}

const LOCAL_TOPIC_CAPACITY: usize = 1000;

fn topic_stream(topic: ChannelId, receiver: broadcast::Receiver<LiveEnvelope>) -> EnvelopeStream {
    BroadcastStream::new(receiver)
        .filter_map(move |item| async move {
            match item {
                Ok(envelope) => Some(envelope),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("[Bus] Topic {} subscriber lagged, skipped {} events", topic, skipped);
                    None
                }
            }
        })
        .boxed()
}

/// In-process bus with one broadcast channel per topic
#[derive(Clone, Default)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<ChannelId, broadcast::Sender<LiveEnvelope>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: ChannelId) -> Result<broadcast::Sender<LiveEnvelope>, BusError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| BusError::Transport("local bus lock poisoned".to_string()))?;
        Ok(topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(LOCAL_TOPIC_CAPACITY).0)
            .clone())
    }

    /// Drop topics that have no subscribers left
    pub fn cleanup_inactive_topics(&self) -> usize {
        let Ok(mut topics) = self.topics.lock() else {
            return 0;
        };
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }

    /// Subscriber count for a topic (for diagnostics)
    pub fn subscriber_count(&self, topic: ChannelId) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(&topic).map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }
}

#[async_trait]
impl BroadcastBus for LocalBus {
    async fn publish(&self, topic: ChannelId, envelope: &LiveEnvelope) -> Result<(), BusError> {
        let sender = self.sender(topic)?;
        match sender.send(envelope.clone()) {
            Ok(count) => tracing::debug!("[Bus] Topic {} published to {} subscribers", topic, count),
            // No subscribers, that's okay
            Err(_) => tracing::debug!("[Bus] Topic {} has no subscribers", topic),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: ChannelId) -> Result<EnvelopeStream, BusError> {
        Ok(topic_stream(topic, self.sender(topic)?.subscribe()))
    }

    fn bus_name(&self) -> &'static str {
        "local"
    }
}

/// Largest NOTIFY payload PostgreSQL accepts, in bytes
const MAX_NOTIFY_PAYLOAD: usize = 7999;
const CHANNEL_PREFIX: &str = "xfchat_channel_";
const LISTENER_COMMAND_CAPACITY: usize = 64;
const LISTENER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

type Topics = Arc<Mutex<HashMap<ChannelId, broadcast::Sender<LiveEnvelope>>>>;

/// What travels in a NOTIFY payload
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum NotifyPayload {
    Inline { envelope: LiveEnvelope },
    #[serde(rename_all = "camelCase")]
    Stored { channel_id: ChannelId, message_id: MessageId },
}

fn encode_payload(envelope: &LiveEnvelope) -> Result<String, BusError> {
    let inline = serde_json::to_string(&NotifyPayload::Inline {
        envelope: envelope.clone(),
    })?;
    if inline.len() <= MAX_NOTIFY_PAYLOAD {
        return Ok(inline);
    }
    match envelope.message_id {
        Some(message_id) if envelope.event_type == EventType::Message => {
            Ok(serde_json::to_string(&NotifyPayload::Stored {
                channel_id: envelope.channel_id,
                message_id,
            })?)
        }
        _ => Err(BusError::PayloadTooLarge(inline.len())),
    }
}

enum ListenerCommand {
    Listen {
        channel: String,
        done: oneshot::Sender<Result<(), BusError>>,
    },
}

/// Cross-process bus over PostgreSQL LISTEN/NOTIFY
///
/// Subscriptions share one `PgListener` per process; topics nobody listens
/// to any more are released periodically.
#[derive(Clone)]
pub struct PgNotifyBus {
    pool: PgPool,
    messages: PgMessageStore,
    topics: Topics,
    commands: Arc<Mutex<Option<mpsc::Sender<ListenerCommand>>>>,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> Self {
        Self {
            messages: PgMessageStore::new(pool.clone()),
            pool,
            topics: Arc::new(Mutex::new(HashMap::new())),
            commands: Arc::new(Mutex::new(None)),
        }
    }

    /// NOTIFY channel name for a topic
    pub fn channel_name(topic: ChannelId) -> String {
        if topic.0 < 0 {
            format!("{}n{}", CHANNEL_PREFIX, topic.0.unsigned_abs())
        } else {
            format!("{}{}", CHANNEL_PREFIX, topic.0)
        }
    }

    /// Topic of a NOTIFY channel name
    pub fn topic_for(channel: &str) -> Option<ChannelId> {
        let suffix = channel.strip_prefix(CHANNEL_PREFIX)?;
        match suffix.strip_prefix('n') {
            Some(magnitude) => {
                let magnitude = magnitude.parse::<u64>().ok()?;
                i64::try_from(-i128::from(magnitude)).ok().map(ChannelId)
            }
            None => suffix.parse::<i64>().ok().map(ChannelId),
        }
    }

    fn lock_topics(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ChannelId, broadcast::Sender<LiveEnvelope>>>, BusError> {
        self.topics
            .lock()
            .map_err(|_| BusError::Transport("pg bus lock poisoned".to_string()))
    }

    /// Command queue of the shared listener, starting it if needed
    fn listener(&self) -> Result<mpsc::Sender<ListenerCommand>, BusError> {
        let mut slot = self
            .commands
            .lock()
            .map_err(|_| BusError::Transport("pg bus lock poisoned".to_string()))?;
        if let Some(sender) = slot.as_ref().filter(|sender| !sender.is_closed()) {
            return Ok(sender.clone());
        }

        let (sender, receiver) = mpsc::channel(LISTENER_COMMAND_CAPACITY);
        tokio::spawn(run_listener(
            self.pool.clone(),
            self.messages.clone(),
            self.topics.clone(),
            receiver,
        ));
        *slot = Some(sender.clone());
        Ok(sender)
    }
}

#[async_trait]
impl BroadcastBus for PgNotifyBus {
    async fn publish(&self, topic: ChannelId, envelope: &LiveEnvelope) -> Result<(), BusError> {
        let payload = encode_payload(envelope)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(Self::channel_name(topic))
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: ChannelId) -> Result<EnvelopeStream, BusError> {
        if let Some(sender) = self.lock_topics()?.get(&topic) {
            return Ok(topic_stream(topic, sender.subscribe()));
        }

        let (done, listening) = oneshot::channel();
        self.listener()?
            .send(ListenerCommand::Listen {
                channel: Self::channel_name(topic),
                done,
            })
            .await
            .map_err(|_| BusError::Transport("pg listener stopped".to_string()))?;
        listening
            .await
            .map_err(|_| BusError::Transport("pg listener stopped".to_string()))??;

        let receiver = self
            .lock_topics()?
            .entry(topic)
            .or_insert_with(|| broadcast::channel(LOCAL_TOPIC_CAPACITY).0)
            .subscribe();
        Ok(topic_stream(topic, receiver))
    }

    fn bus_name(&self) -> &'static str {
        "pg_notify"
    }
}

/// Owns the process-wide listener connection
///
/// Exits when every `PgNotifyBus` handle is gone or the connection cannot be
/// opened; the next subscription starts a fresh one.
async fn run_listener(
    pool: PgPool,
    messages: PgMessageStore,
    topics: Topics,
    mut commands: mpsc::Receiver<ListenerCommand>,
) {
    let mut listener = match PgListener::connect_with(&pool).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!("[Bus] Could not open listener connection: {}", e);
            return;
        }
    };

    let known: Vec<String> = match topics.lock() {
        Ok(topics) => topics.keys().map(|topic| PgNotifyBus::channel_name(*topic)).collect(),
        Err(_) => Vec::new(),
    };
    if !known.is_empty() {
        let names: Vec<&str> = known.iter().map(String::as_str).collect();
        if let Err(e) = listener.listen_all(names).await {
            tracing::warn!("[Bus] Could not resume {} topics: {}", known.len(), e);
        }
    }
    tracing::info!("[Bus] Listener connection open ({} topics)", known.len());

    let mut sweep = tokio::time::interval(LISTENER_SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ListenerCommand::Listen { channel, done }) => {
                    let result = listener
                        .listen(&channel)
                        .await
                        .map_err(|e| BusError::Transport(e.to_string()));
                    if result.is_ok() {
                        tracing::info!("[Bus] Listening on {}", channel);
                    }
                    let _ = done.send(result);
                }
                None => break,
            },
            notification = listener.recv() => match notification {
                Ok(notification) => {
                    route_notification(&messages, &topics, notification.channel(), notification.payload()).await;
                }
                Err(e) => {
                    tracing::warn!("[Bus] Listener error, retrying: {}", e);
                    tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                }
            },
            _ = sweep.tick() => {
                for channel in release_idle_topics(&topics) {
                    if let Err(e) = listener.unlisten(&channel).await {
                        tracing::warn!("[Bus] Could not stop listening on {}: {}", channel, e);
                    }
                }
            }
        }
    }
    tracing::info!("[Bus] Listener connection closed");
}

/// Forget topics without subscribers and return their NOTIFY channels
fn release_idle_topics(topics: &Topics) -> Vec<String> {
    let Ok(mut topics) = topics.lock() else {
        return Vec::new();
    };
    let idle: Vec<ChannelId> = topics
        .iter()
        .filter(|(_, sender)| sender.receiver_count() == 0)
        .map(|(topic, _)| *topic)
        .collect();
    idle.into_iter()
        .map(|topic| {
            topics.remove(&topic);
            PgNotifyBus::channel_name(topic)
        })
        .collect()
}

async fn route_notification(messages: &PgMessageStore, topics: &Topics, channel: &str, payload: &str) {
    let Some(topic) = PgNotifyBus::topic_for(channel) else {
        return;
    };
    let Some(sender) = topics.lock().ok().and_then(|topics| topics.get(&topic).cloned()) else {
        return;
    };

    let envelope = match serde_json::from_str::<NotifyPayload>(payload) {
        Ok(NotifyPayload::Inline { envelope }) => envelope,
        Ok(NotifyPayload::Stored { message_id, .. }) => match messages.message_by_id(message_id).await {
            Ok(Some(message)) => LiveEnvelope::message(&message),
            Ok(None) => {
                tracing::warn!("[Bus] Referenced message {} not found on topic {}", message_id, topic);
                return;
            }
            Err(e) => {
                tracing::warn!("[Bus] Could not load message {} for topic {}: {}", message_id, topic, e);
                return;
            }
        },
        Err(e) => {
            tracing::warn!("[Bus] Dropping undecodable payload on topic {}: {}", topic, e);
            return;
        }
    };
    let _ = sender.send(envelope);
}
