//! The connection pool proper.

use crate::client::{NodeApi, NodeApiFactory};
use crate::retry::RetryPolicy;
use proxbridge_common::{BridgeConfig, BridgeError, ErrorInfo, NodeDescriptor, NodeKind, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Connection state of one node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Uninitialized,
    Connecting,
    Ready,
    Failed,
}

impl HandleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => HandleState::Connecting,
            2 => HandleState::Ready,
            3 => HandleState::Failed,
            _ => HandleState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HandleState::Uninitialized => 0,
            HandleState::Connecting => 1,
            HandleState::Ready => 2,
            HandleState::Failed => 3,
        }
    }
}

struct EntryInner {
    api: Option<Arc<dyn NodeApi>>,
    last_error: Option<ErrorInfo>,
    last_used: Instant,
}

/// One pool slot. The async mutex serializes all mutation for the node,
/// so concurrent first-callers coalesce onto a single connection attempt.
struct NodeEntry {
    descriptor: NodeDescriptor,
    state: AtomicU8,
    inner: Mutex<EntryInner>,
}

impl NodeEntry {
    fn new(descriptor: NodeDescriptor) -> Self {
        Self {
            descriptor,
            state: AtomicU8::new(HandleState::Uninitialized.as_u8()),
            inner: Mutex::new(EntryInner {
                api: None,
                last_error: None,
                last_used: Instant::now(),
            }),
        }
    }

    fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: HandleState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Caller-visible snapshot of one handle, for the status/self-test surface.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub kind: NodeKind,
    pub host: String,
    pub state: HandleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
}

/// Result of [`ConnectionPool::acquire_all`]: handles that are usable plus
/// the nodes that were skipped, recorded for caller-visible reporting.
pub struct PoolSweep {
    pub ready: Vec<(String, Arc<dyn NodeApi>)>,
    pub skipped: Vec<(String, ErrorInfo)>,
}

/// Keyed collection of node handles with lazy connect and health tracking.
pub struct ConnectionPool {
    factory: Arc<dyn NodeApiFactory>,
    entries: HashMap<String, Arc<NodeEntry>>,
    /// Configuration order, kept for deterministic sweeps and reports.
    order: Vec<String>,
    policy: RetryPolicy,
    staleness: Duration,
}

impl ConnectionPool {
    pub fn new(
        descriptors: Vec<NodeDescriptor>,
        factory: Arc<dyn NodeApiFactory>,
        policy: RetryPolicy,
        staleness: Duration,
    ) -> Self {
        let order: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        let entries = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), Arc::new(NodeEntry::new(d))))
            .collect();
        Self {
            factory,
            entries,
            order,
            policy,
            staleness,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let factory = Arc::new(crate::client::HttpNodeApiFactory::from_config(&config.pool));
        Self::new(
            config.descriptors(),
            factory,
            RetryPolicy::from_config(&config.pool),
            Duration::from_secs(config.pool.staleness_secs),
        )
    }

    pub fn node_names(&self) -> &[String] {
        &self.order
    }

    pub fn descriptor(&self, name: &str) -> Option<&NodeDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    /// Acquire the handle for a named node, connecting lazily on first use.
    ///
    /// A handle that previously exhausted its retries stays failed until
    /// [`invalidate`](Self::invalidate) is called.
    pub async fn acquire(&self, name: &str) -> Result<Arc<dyn NodeApi>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| BridgeError::node_unknown(name))?;

        // Second and later callers for the same node wait here and then
        // observe whatever state the first caller produced.
        let mut inner = entry.inner.lock().await;
        match entry.state() {
            HandleState::Ready => self.refresh_ready(entry, &mut inner).await,
            HandleState::Failed => {
                let message = inner
                    .last_error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "connection previously failed".to_string());
                Err(BridgeError::node_unreachable(&entry.descriptor.name, message))
            }
            _ => self.connect_locked(entry, &mut inner).await,
        }
    }

    /// Acquire handles for every configured node of the given kind (or all
    /// kinds when `None`). Nodes that are failed or fail to connect are
    /// skipped and recorded; they never abort the sweep.
    pub async fn acquire_all(&self, kind: Option<NodeKind>) -> PoolSweep {
        let mut sweep = PoolSweep {
            ready: Vec::new(),
            skipped: Vec::new(),
        };
        for name in &self.order {
            let entry = &self.entries[name];
            if let Some(kind) = kind {
                if entry.descriptor.kind != kind {
                    continue;
                }
            }
            match self.acquire(name).await {
                Ok(api) => sweep.ready.push((name.clone(), api)),
                Err(err) => {
                    warn!(node = %name, error = %err, "Skipping node in pool sweep");
                    sweep.skipped.push((name.clone(), ErrorInfo::from(err)));
                }
            }
        }
        sweep
    }

    /// Force a reconnect on the next acquire.
    pub async fn invalidate(&self, name: &str) -> Result<()> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| BridgeError::node_unknown(name))?;
        let mut inner = entry.inner.lock().await;
        inner.api = None;
        inner.last_error = None;
        entry.set_state(HandleState::Uninitialized);
        info!(node = %name, "Handle invalidated");
        Ok(())
    }

    /// Snapshot of every handle's state. Never blocks on in-flight
    /// connection attempts.
    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.order
            .iter()
            .map(|name| {
                let entry = &self.entries[name];
                let last_error = entry
                    .inner
                    .try_lock()
                    .ok()
                    .and_then(|inner| inner.last_error.clone());
                NodeStatus {
                    name: name.clone(),
                    kind: entry.descriptor.kind,
                    host: entry.descriptor.host.clone(),
                    state: entry.state(),
                    last_error,
                }
            })
            .collect()
    }

    async fn refresh_ready(
        &self,
        entry: &NodeEntry,
        inner: &mut EntryInner,
    ) -> Result<Arc<dyn NodeApi>> {
        let api = match inner.api.clone() {
            Some(api) => api,
            None => return self.connect_locked(entry, inner).await,
        };

        if inner.last_used.elapsed() >= self.staleness {
            if let Err(err) = api.probe().await {
                warn!(
                    node = %entry.descriptor.name,
                    error = %err,
                    "Staleness probe failed, reconnecting once"
                );
                entry.set_state(HandleState::Connecting);
                inner.api = None;
                match self.attempt_connect(&entry.descriptor).await {
                    Ok(fresh) => {
                        inner.api = Some(fresh.clone());
                        inner.last_error = None;
                        inner.last_used = Instant::now();
                        entry.set_state(HandleState::Ready);
                        return Ok(fresh);
                    }
                    Err(err) => {
                        inner.last_error = Some(ErrorInfo::from(&err));
                        entry.set_state(HandleState::Failed);
                        return Err(err);
                    }
                }
            }
        }

        inner.last_used = Instant::now();
        Ok(api)
    }

    async fn connect_locked(
        &self,
        entry: &NodeEntry,
        inner: &mut EntryInner,
    ) -> Result<Arc<dyn NodeApi>> {
        entry.set_state(HandleState::Connecting);
        let name = &entry.descriptor.name;
        let mut last_err: Option<BridgeError> = None;

        for attempt in 0..self.policy.max_attempts {
            match self.attempt_connect(&entry.descriptor).await {
                Ok(api) => {
                    info!(node = %name, attempt = attempt + 1, "Node connected");
                    inner.api = Some(api.clone());
                    inner.last_error = None;
                    inner.last_used = Instant::now();
                    entry.set_state(HandleState::Ready);
                    return Ok(api);
                }
                Err(err) => {
                    if attempt + 1 < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            node = %name,
                            attempt = attempt + 1,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Connection attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(err);
                }
            }
        }

        let err = match last_err {
            Some(err) => err,
            None => BridgeError::node_unreachable(name, "no connection attempts made"),
        };
        warn!(node = %name, error = %err, "Connection attempts exhausted");
        inner.last_error = Some(ErrorInfo::from(&err));
        entry.set_state(HandleState::Failed);
        Err(err)
    }

    /// One build + probe cycle, no retry.
    async fn attempt_connect(&self, descriptor: &NodeDescriptor) -> Result<Arc<dyn NodeApi>> {
        let api = self.factory.build(descriptor)?;
        api.probe().await.map_err(|err| match err {
            e @ BridgeError::NodeUnreachable { .. } | e @ BridgeError::Timeout { .. } => e,
            other => BridgeError::node_unreachable(&descriptor.name, other.to_string()),
        })?;
        Ok(api)
    }
}
