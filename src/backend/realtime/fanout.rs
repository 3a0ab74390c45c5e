/**
 * Connection Fan-out
 *
 * Tracks the live sessions connected to this process and forwards bus events
 * to every local session subscribed to the event's channel.
 *
 * # Bridging
 *
 * One bus subscription ("pump") exists per channel with at least one local
 * session. It is started by the first session to connect and stopped when
 * the last one disconnects. Sessions and pumps live under the same lock so a
 * connect racing a disconnect can never leave a session without a pump.
 *
 * # Back-pressure
 *
 * Each session owns a bounded queue. Delivery uses `try_send`, so a slow
 * client never blocks the pump or other sessions; events that do not fit are
 * dropped for that session only and recovered through catch-up. Sessions
 * whose receiver is gone are removed during delivery.
 *
 * Resends are the exception: they are replayed into each of the user's
 * sessions by a task of their own that waits for queue space, so a backlog
 * larger than the session buffer still arrives whole and in order.
 */

use crate::backend::error::BusError;
use crate::backend::realtime::bus::BroadcastBus;
use crate::shared::{ChannelId, LiveEnvelope, SessionId, UserId};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of pushing one envelope to the local sessions of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped_full: usize,
    pub closed: usize,
}

struct SessionHandle {
    user_id: UserId,
    sender: mpsc::Sender<LiveEnvelope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpStatus {
    Starting,
    Running,
    Failed,
}

struct Pump {
    handle: JoinHandle<()>,
    status: watch::Receiver<PumpStatus>,
}

#[derive(Default)]
struct ChannelSessions {
    sessions: HashMap<SessionId, SessionHandle>,
    pump: Option<Pump>,
}

impl ChannelSessions {
    fn deliver(&mut self, channel_id: ChannelId, envelope: &LiveEnvelope) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        self.sessions.retain(|session_id, session| {
            match session.sender.try_send(envelope.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        "[Fanout] Session {} on channel {} is full, dropping {:?}",
                        session_id,
                        channel_id,
                        envelope.event_type
                    );
                    report.dropped_full += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    report.closed += 1;
                    false
                }
            }
        });
        report
    }
}

#[derive(Default)]
struct HubState {
    channels: HashMap<ChannelId, ChannelSessions>,
}

struct HubInner {
    bus: Arc<dyn BroadcastBus>,
    session_buffer: usize,
    state: Mutex<HubState>,
}

/// Local session registry plus per-channel bus bridges
#[derive(Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
}

impl FanoutHub {
    pub fn new(bus: Arc<dyn BroadcastBus>, session_buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                bus,
                session_buffer: session_buffer.max(1),
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a live session for `user_id` on `channel_id`
    ///
    /// Waits until the channel's bus subscription is established, so events
    /// published after this returns reach the session.
    pub async fn connect(&self, channel_id: ChannelId, user_id: UserId) -> Result<LiveSession, BusError> {
        let session_id = SessionId::new();
        let (sender, receiver) = mpsc::channel(self.inner.session_buffer);

        let mut status = {
            let mut state = self.state();
            let channel = state.channels.entry(channel_id).or_default();
            channel.sessions.insert(session_id, SessionHandle { user_id, sender });

            let needs_pump = channel
                .pump
                .as_ref()
                .map_or(true, |pump| pump.handle.is_finished());
            if needs_pump {
                channel.pump = Some(self.spawn_pump(channel_id));
            }
            channel
                .pump
                .as_ref()
                .map(|pump| pump.status.clone())
                .ok_or_else(|| BusError::Transport("pump missing".to_string()))?
        };

        let session = LiveSession {
            channel_id,
            session_id,
            user_id,
            receiver,
            hub: self.clone(),
        };

        let started = tokio::time::timeout(
            SUBSCRIBE_TIMEOUT,
            status.wait_for(|status| *status != PumpStatus::Starting),
        )
        .await;

        match started {
            Ok(Ok(current)) if *current == PumpStatus::Running => {
                tracing::info!(
                    "[Fanout] Session {} for user {} connected to channel {}",
                    session_id,
                    user_id,
                    channel_id
                );
                Ok(session)
            }
            Ok(_) => Err(BusError::Transport(format!(
                "subscription to channel {} failed",
                channel_id
            ))),
            Err(_) => Err(BusError::Timeout(SUBSCRIBE_TIMEOUT)),
        }
    }

    fn spawn_pump(&self, channel_id: ChannelId) -> Pump {
        let (status_tx, status_rx) = watch::channel(PumpStatus::Starting);
        let hub = self.clone();
        let handle = tokio::spawn(async move {
            let mut stream = match hub.inner.bus.subscribe(channel_id).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!("[Fanout] Bus subscription for channel {} failed: {}", channel_id, e);
                    let _ = status_tx.send(PumpStatus::Failed);
                    return;
                }
            };
            let _ = status_tx.send(PumpStatus::Running);
            tracing::info!(
                "[Fanout] Bridging channel {} from {} bus",
                channel_id,
                hub.inner.bus.bus_name()
            );

            while let Some(envelope) = stream.next().await {
                let report = hub.deliver(channel_id, &envelope);
                tracing::debug!("[Fanout] Channel {} delivery: {:?}", channel_id, report);
            }

            tracing::warn!("[Fanout] Bus stream for channel {} ended", channel_id);
        });

        Pump {
            handle,
            status: status_rx,
        }
    }

    /// Push an envelope to every local session of its channel without blocking
    pub fn deliver(&self, channel_id: ChannelId, envelope: &LiveEnvelope) -> DeliveryReport {
        let mut state = self.state();
        match state.channels.get_mut(&channel_id) {
            Some(channel) => channel.deliver(channel_id, envelope),
            None => DeliveryReport::default(),
        }
    }

    /// Replay `envelopes` into every session `user_id` holds on `channel_id`
    ///
    /// Each session gets its own task that awaits queue space, so nothing is
    /// lost to a full buffer; a session that closes stops its replay. Returns
    /// the number of sessions being replayed to.
    pub fn resend_to_user(&self, channel_id: ChannelId, user_id: UserId, envelopes: Vec<LiveEnvelope>) -> usize {
        let senders: Vec<mpsc::Sender<LiveEnvelope>> = {
            let state = self.state();
            let Some(channel) = state.channels.get(&channel_id) else {
                return 0;
            };
            channel
                .sessions
                .values()
                .filter(|session| session.user_id == user_id)
                .map(|session| session.sender.clone())
                .collect()
        };
        if envelopes.is_empty() {
            return senders.len();
        }

        let envelopes = Arc::new(envelopes);
        for sender in &senders {
            let sender = sender.clone();
            let envelopes = envelopes.clone();
            tokio::spawn(async move {
                for envelope in envelopes.iter() {
                    if sender.send(envelope.clone()).await.is_err() {
                        tracing::debug!("[Fanout] Session closed during resend on channel {}", channel_id);
                        break;
                    }
                }
            });
        }
        senders.len()
    }

    fn disconnect(&self, channel_id: ChannelId, session_id: SessionId) {
        let mut state = self.state();
        let Some(channel) = state.channels.get_mut(&channel_id) else {
            return;
        };
        channel.sessions.remove(&session_id);
        if channel.sessions.is_empty() {
            if let Some(pump) = state.channels.remove(&channel_id).and_then(|c| c.pump) {
                pump.handle.abort();
            }
            tracing::info!("[Fanout] Last session left channel {}, bridge stopped", channel_id);
        }
    }

    pub fn session_count(&self, channel_id: ChannelId) -> usize {
        self.state()
            .channels
            .get(&channel_id)
            .map_or(0, |channel| channel.sessions.len())
    }

    /// Whether a bus bridge is running for `channel_id`
    pub fn is_bridged(&self, channel_id: ChannelId) -> bool {
        self.state()
            .channels
            .get(&channel_id)
            .and_then(|channel| channel.pump.as_ref())
            .map_or(false, |pump| !pump.handle.is_finished())
    }
}

/// A connected live session; unregisters itself when dropped
pub struct LiveSession {
    channel_id: ChannelId,
    session_id: SessionId,
    user_id: UserId,
    receiver: mpsc::Receiver<LiveEnvelope>,
    hub: FanoutHub,
}

impl LiveSession {
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub async fn recv(&mut self) -> Option<LiveEnvelope> {
        self.receiver.recv().await
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.hub.disconnect(self.channel_id, self.session_id);
    }
}
