/**
 * Server Initialization
 *
 * Wires the chat core together and starts its background tasks.
 *
 * # Initialization Process
 *
 * 1. Connect to PostgreSQL if a `database_url` is configured
 * 2. Pick the store, mirror and bus (PostgreSQL-backed or in-memory)
 * 3. Build the router, key generator, tracker, chat service and fan-out
 * 4. Start the write-behind worker, the read-state idle sweep, the retry
 *    drain loop and, on the in-process bus, the idle topic cleanup
 * 5. Create the HTTP router
 *
 * # Shutdown
 *
 * Shutdown runs in two stages. Workers stop first and the write-behind
 * worker flushes its queue, sending failed writes to the retry buffer. The
 * drain loop is stopped after that and makes one last pass, so it sees
 * everything the flush left behind.
 */

use crate::backend::access::{ChannelAccess, StaticChannelAccess};
use crate::backend::chat::{ChatDeps, ChatService, InMemoryMessageStore, MessageStore, PgMessageStore};
use crate::backend::ordering::{Clock, OrderingKeyGenerator, SystemClock};
use crate::backend::read_state::{
    spawn_idle_sweep, spawn_write_behind, InMemoryReadStateMirror, PgReadStateMirror, ReadStateMirror, ReadStateTracker,
    TrackerDeps, WriteBehind,
};
use crate::backend::realtime::{BroadcastBus, FanoutHub, LocalBus, PgNotifyBus};
use crate::backend::retry::{spawn_drain_loop, RetryBuffer};
use crate::backend::routes::create_router;
use crate::backend::routing::ChannelRouter;
use crate::backend::server::config::load_database;
use crate::backend::server::state::AppState;
use crate::shared::{AppConfig, ServerId};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const TOPIC_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Pluggable collaborators of the chat core
#[derive(Clone)]
pub struct Components {
    pub store: Arc<dyn MessageStore>,
    pub mirror: Arc<dyn ReadStateMirror>,
    pub bus: Arc<dyn BroadcastBus>,
    pub access: Arc<dyn ChannelAccess>,
    pub clock: Arc<dyn Clock>,
}

impl Components {
    /// Single-node setup: everything in memory, open channel membership
    pub fn in_memory(bus: Arc<dyn BroadcastBus>) -> Self {
        Self {
            store: Arc::new(InMemoryMessageStore::new()),
            mirror: Arc::new(InMemoryReadStateMirror::new()),
            bus,
            access: Arc::new(StaticChannelAccess::open()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            store: Arc::new(PgMessageStore::new(pool.clone())),
            mirror: Arc::new(PgReadStateMirror::new(pool.clone())),
            bus: Arc::new(PgNotifyBus::new(pool)),
            access: Arc::new(StaticChannelAccess::open()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Tasks sharing one shutdown flag
struct TaskGroup {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("[Server] Background task ended abnormally: {:?}", e);
            }
        }
    }
}

/// Handles of the tasks started alongside the server
///
/// Workers feed the retry buffer; the drain group empties it and is stopped
/// last.
pub struct BackgroundTasks {
    workers: TaskGroup,
    drain: TaskGroup,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            workers: TaskGroup::new(),
            drain: TaskGroup::new(),
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.workers.shutdown.subscribe()
    }

    fn push(&mut self, handle: JoinHandle<()>) {
        self.workers.handles.push(handle);
    }

    fn subscribe_drain(&self) -> watch::Receiver<bool> {
        self.drain.shutdown.subscribe()
    }

    fn push_drain(&mut self, handle: JoinHandle<()>) {
        self.drain.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.workers.handles.len() + self.drain.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the workers, then the drain loop
    pub async fn shutdown(self) {
        self.workers.stop().await;
        self.drain.stop().await;
        tracing::info!("[Server] Background tasks stopped");
    }
}

/// Build `AppState` from its components and start the state's own tasks
///
/// Must be called from within a tokio runtime.
pub fn build_state(config: AppConfig, components: Components, db_pool: Option<PgPool>) -> (AppState, BackgroundTasks) {
    let mut tasks = BackgroundTasks::new();

    let router = Arc::new(ChannelRouter::new(ServerId(config.server_id), config.server_count));
    let generator = Arc::new(OrderingKeyGenerator::new(components.clock.clone()));
    let retry = Arc::new(RetryBuffer::new(config.retry_capacity));

    let (write_behind, receiver) = WriteBehind::channel(config.write_behind_capacity, retry.clone());
    tasks.push(spawn_write_behind(
        receiver,
        components.mirror.clone(),
        retry.clone(),
        tasks.subscribe(),
    ));
    tasks.push_drain(spawn_drain_loop(
        retry.clone(),
        components.mirror.clone(),
        config.drain_interval,
        tasks.subscribe_drain(),
    ));

    let tracker = Arc::new(ReadStateTracker::new(TrackerDeps {
        mirror: components.mirror.clone(),
        store: components.store.clone(),
        access: components.access.clone(),
        bus: components.bus.clone(),
        write_behind,
        publish_timeout: config.publish_timeout,
        hydration_limit: config.hydration_limit,
    }));
    tasks.push(spawn_idle_sweep(tracker.clone(), config.read_state_idle, tasks.subscribe()));

    let chat = Arc::new(ChatService::new(ChatDeps {
        router,
        generator,
        store: components.store.clone(),
        bus: components.bus.clone(),
        tracker: tracker.clone(),
        access: components.access.clone(),
        publish_timeout: config.publish_timeout,
    }));

    let fanout = FanoutHub::new(components.bus.clone(), config.session_buffer);

    tracing::info!(
        "[Server] Chat core ready on server {} of {} (bus: {}, mirror: {})",
        config.server_id,
        config.server_count,
        components.bus.bus_name(),
        components.mirror.mirror_name()
    );

    let state = AppState {
        config: Arc::new(config),
        chat,
        tracker,
        fanout,
        retry,
        db_pool,
    };

    (state, tasks)
}

fn spawn_topic_cleanup(bus: LocalBus, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOPIC_CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = bus.cleanup_inactive_topics();
                    tracing::debug!("[Server] Cleaned up {} inactive bus topics", removed);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Create and configure the Axum application
///
/// A missing or unreachable database is not fatal: the server logs it and
/// runs single-node on in-memory stores.
pub async fn create_app(config: AppConfig) -> (Router<()>, BackgroundTasks) {
    tracing::info!("[Server] Initializing xfchat backend server");

    let db_pool = load_database(config.database_url.as_deref()).await;

    let (state, tasks) = match &db_pool {
        Some(pool) => build_state(config, Components::postgres(pool.clone()), db_pool.clone()),
        None => {
            let bus = LocalBus::new();
            let (state, mut tasks) = build_state(config, Components::in_memory(Arc::new(bus.clone())), None);
            tasks.push(spawn_topic_cleanup(bus, tasks.subscribe()));
            (state, tasks)
        }
    };

    let app = create_router(state);
    tracing::info!("[Server] Router configured with {} background tasks", tasks.len());

    (app, tasks)
}
