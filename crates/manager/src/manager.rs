//! Component wiring and lifecycle.

use proxbridge_common::{
    BridgeConfig, BridgeError, Event, EventSink, Listener, Notifier, Result,
};
use proxbridge_events::{
    Dispatcher, DiscordListener, DiscordNotifier, GotifyListener, GotifyNotifier, SyslogListener,
    TaskListener, WebhookListener,
};
use proxbridge_pool::{ConnectionPool, NodeStatus};
use proxbridge_tools::{register_builtin_tools, ToolRequest, ToolResponse, ToolRouter, ToolSpec};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

/// Where the orchestrator is in its life. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Created,
    Setup,
    Running,
    Draining,
    Stopped,
}

impl LifecyclePhase {
    fn as_u8(self) -> u8 {
        match self {
            LifecyclePhase::Created => 0,
            LifecyclePhase::Setup => 1,
            LifecyclePhase::Running => 2,
            LifecyclePhase::Draining => 3,
            LifecyclePhase::Stopped => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecyclePhase::Created,
            1 => LifecyclePhase::Setup,
            2 => LifecyclePhase::Running,
            3 => LifecyclePhase::Draining,
            _ => LifecyclePhase::Stopped,
        }
    }
}

/// Owns every component and the event queue between them.
///
/// Listeners push into a bounded queue through [`EventSink`]; a consumer
/// task pops events and hands each to the dispatcher on its own task, so
/// one slow fan-out never stalls ingestion of the next event.
pub struct Manager {
    config: BridgeConfig,
    phase: AtomicU8,
    pool: Arc<ConnectionPool>,
    router: ToolRouter,
    listeners: Vec<Arc<dyn Listener>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    sink: EventSink,
    queue: StdMutex<Option<mpsc::Receiver<Event>>>,
    shutdown: watch::Sender<bool>,
    consumer: StdMutex<Option<JoinHandle<()>>>,
    degraded: StdMutex<Vec<String>>,
}

impl Manager {
    /// Build every component from configuration. The result is in the
    /// `Setup` phase: fully wired, nothing running yet.
    pub fn from_config(config: BridgeConfig) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::from_config(&config));
        Self::with_pool(config, pool)
    }

    /// Same wiring over a caller-provided pool. This is the seam for
    /// driving the node side of the self-test without live nodes.
    pub fn with_pool(config: BridgeConfig, pool: Arc<ConnectionPool>) -> Result<Self> {
        config.validate()?;

        let (sink, rx) = EventSink::channel(config.dispatch.queue_capacity);
        let grace = Duration::from_millis(config.dispatch.shutdown_grace_ms);

        let mut router = ToolRouter::new(Arc::clone(&pool));
        register_builtin_tools(&mut router, sink.clone());

        let mut listeners: Vec<Arc<dyn Listener>> = Vec::new();
        if let Some(gotify) = &config.listeners.gotify {
            listeners.push(Arc::new(GotifyListener::new(gotify.clone(), grace)));
        }
        if let Some(syslog) = &config.listeners.syslog {
            listeners.push(Arc::new(SyslogListener::new(syslog.clone(), grace)));
        }
        if let Some(webhook) = &config.listeners.webhook {
            listeners.push(Arc::new(WebhookListener::new(webhook.clone(), grace)));
        }
        if let Some(tasks) = &config.listeners.tasks {
            listeners.push(Arc::new(TaskListener::new(
                Arc::clone(&pool),
                tasks.clone(),
                grace,
            )));
        }
        if let Some(discord) = &config.listeners.discord {
            listeners.push(Arc::new(DiscordListener::new(discord.clone(), grace)));
        }

        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(gotify) = &config.notifiers.gotify {
            notifiers.push(Arc::new(GotifyNotifier::new(gotify.clone())));
        }
        if let Some(discord) = &config.notifiers.discord {
            notifiers.push(Arc::new(DiscordNotifier::new(discord.clone())));
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            phase: AtomicU8::new(LifecyclePhase::Setup.as_u8()),
            pool,
            router,
            listeners,
            notifiers,
            sink,
            queue: StdMutex::new(Some(rx)),
            shutdown,
            consumer: StdMutex::new(None),
            degraded: StdMutex::new(Vec::new()),
        })
    }

    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn transition(&self, from: LifecyclePhase, to: LifecyclePhase) -> bool {
        self.phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Additional channels, registered before `start`.
    pub fn register_listener(&mut self, listener: Arc<dyn Listener>) -> Result<()> {
        if self.phase() != LifecyclePhase::Setup {
            return Err(BridgeError::Config(
                "listeners can only be registered before start".to_string(),
            ));
        }
        self.listeners.push(listener);
        Ok(())
    }

    pub fn register_notifier(&mut self, notifier: Arc<dyn Notifier>) -> Result<()> {
        if self.phase() != LifecyclePhase::Setup {
            return Err(BridgeError::Config(
                "notifiers can only be registered before start".to_string(),
            ));
        }
        self.notifiers.push(notifier);
        Ok(())
    }

    /// Start the consumer loop and every listener. A listener that fails
    /// to start degrades the service instead of aborting it; its name is
    /// recorded and reported through [`Manager::degraded`].
    pub async fn start(&self) -> Result<()> {
        if !self.transition(LifecyclePhase::Setup, LifecyclePhase::Running) {
            return Err(BridgeError::Config(format!(
                "cannot start from phase {:?}",
                self.phase()
            )));
        }

        let rx = match self.queue.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let rx = rx.ok_or_else(|| BridgeError::Config("event queue already taken".to_string()))?;

        let mut dispatcher = Dispatcher::new(Duration::from_millis(
            self.config.dispatch.notifier_timeout_ms,
        ));
        for notifier in &self.notifiers {
            dispatcher.register(Arc::clone(notifier));
        }
        let dispatcher = Arc::new(dispatcher);

        let handle = tokio::spawn(consumer_loop(rx, dispatcher, self.shutdown.subscribe()));
        if let Ok(mut slot) = self.consumer.lock() {
            *slot = Some(handle);
        }

        let mut starts: JoinSet<(String, Result<()>)> = JoinSet::new();
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            let sink = self.sink.clone();
            starts.spawn(async move {
                let name = listener.name().to_string();
                (name, listener.start(sink).await)
            });
        }
        let mut degraded = Vec::new();
        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(listener = %name, "Listener started"),
                Ok((name, Err(err))) => {
                    warn!(listener = %name, error = %err, "Listener failed to start");
                    degraded.push(name);
                }
                Err(err) => warn!(error = %err, "Listener start task panicked"),
            }
        }
        if let Ok(mut slot) = self.degraded.lock() {
            *slot = degraded;
        }

        info!(
            listeners = self.listeners.len(),
            notifiers = self.notifiers.len(),
            nodes = self.pool.node_names().len(),
            "Bridge running"
        );
        Ok(())
    }

    /// Listeners that failed to start; empty when fully healthy.
    pub fn degraded(&self) -> Vec<String> {
        self.degraded
            .lock()
            .map(|slot| slot.clone())
            .unwrap_or_default()
    }

    /// Stop listeners, drain queued events within the grace period and
    /// reach `Stopped` unconditionally.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.transition(LifecyclePhase::Running, LifecyclePhase::Draining) {
            // Stop before start goes straight to Stopped; a concurrent
            // shutdown already in Draining is left to finish on its own.
            self.transition(LifecyclePhase::Created, LifecyclePhase::Stopped);
            self.transition(LifecyclePhase::Setup, LifecyclePhase::Stopped);
            return Ok(());
        }
        info!("Draining");

        let mut stops: JoinSet<(String, Result<()>)> = JoinSet::new();
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            stops.spawn(async move {
                let name = listener.name().to_string();
                (name, listener.stop().await)
            });
        }
        while let Some(joined) = stops.join_next().await {
            if let Ok((name, Err(err))) = joined {
                warn!(listener = %name, error = %err, "Listener stop failed");
            }
        }

        let _ = self.shutdown.send(true);
        let handle = match self.consumer.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(mut handle) = handle {
            let grace = Duration::from_millis(self.config.dispatch.shutdown_grace_ms);
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Dispatch drain exceeded grace period, aborting"
                );
                handle.abort();
            }
        }

        self.phase
            .store(LifecyclePhase::Stopped.as_u8(), Ordering::SeqCst);
        info!("Stopped");
        Ok(())
    }

    /// Validate and execute one tool request.
    pub async fn invoke_tool(&self, request: &ToolRequest) -> Result<ToolResponse> {
        match self.phase() {
            LifecyclePhase::Draining | LifecyclePhase::Stopped => {
                Err(BridgeError::Cancelled {
                    operation: "bridge is shutting down".to_string(),
                })
            }
            _ => self.router.invoke(request).await,
        }
    }

    pub fn catalog(&self) -> Vec<&ToolSpec> {
        self.router.catalog()
    }

    pub fn node_statuses(&self) -> Vec<NodeStatus> {
        self.pool.statuses()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub(crate) fn listeners(&self) -> &[Arc<dyn Listener>] {
        &self.listeners
    }

    pub(crate) fn notifiers(&self) -> &[Arc<dyn Notifier>] {
        &self.notifiers
    }

    /// Injection point for programmatic events.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }
}

/// Pops events and dispatches each on its own task. On shutdown the
/// already-queued backlog is drained before the loop exits; in-flight
/// fan-outs are awaited.
async fn consumer_loop(
    mut rx: mpsc::Receiver<Event>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut inflight: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = rx.recv() => match received {
                Some(event) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    inflight.spawn(async move {
                        dispatcher.dispatch(&event).await;
                    });
                }
                None => break,
            }
        }
    }

    while let Ok(event) = rx.try_recv() {
        let dispatcher = Arc::clone(&dispatcher);
        inflight.spawn(async move {
            dispatcher.dispatch(&event).await;
        });
    }
    while inflight.join_next().await.is_some() {}
}
