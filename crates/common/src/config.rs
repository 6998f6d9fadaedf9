//! Bridge configuration.
//!
//! Loaded once at setup into an immutable object and passed by reference
//! to every component; nothing re-reads ambient state after construction.

use crate::error::{BridgeError, Result};
use crate::node::{NodeDescriptor, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Verify TLS certificates when talking to node APIs. Defaults to
    /// false because lab clusters usually run self-signed certificates.
    #[serde(default)]
    pub verify_tls: bool,

    #[serde(default)]
    pub nodes: Vec<NodeEntry>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub listeners: ListenersConfig,

    #[serde(default)]
    pub notifiers: NotifiersConfig,
}

/// One `[[nodes]]` table in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub kind: NodeKind,
    pub host: String,
    pub user: String,
    pub token_id: String,
    pub token_secret: String,
    /// Per-node override of the global `verify_tls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Idle time after which a ready handle gets a liveness probe.
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: default_connect_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            staleness_secs: default_staleness(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

fn default_connect_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_staleness() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    5_000
}
fn default_request_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-notifier delivery timeout.
    #[serde(default = "default_notifier_timeout")]
    pub notifier_timeout_ms: u64,
    /// Capacity of the listener → orchestrator event queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Grace period for listener stop and dispatch drain at shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            notifier_timeout_ms: default_notifier_timeout(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

fn default_notifier_timeout() -> u64 {
    10_000
}
fn default_queue_capacity() -> usize {
    256
}
fn default_shutdown_grace() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gotify: Option<GotifyListenerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog: Option<SyslogListenerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookListenerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskListenerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordListenerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GotifyListenerConfig {
    pub server_url: String,
    pub client_token: String,
    #[serde(default = "default_gotify_poll")]
    pub poll_interval_secs: u64,
}

fn default_gotify_poll() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogListenerConfig {
    #[serde(default = "default_syslog_bind")]
    pub bind_addr: String,
}

fn default_syslog_bind() -> String {
    "0.0.0.0:5514".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookListenerConfig {
    #[serde(default = "default_webhook_bind")]
    pub bind_addr: String,
}

fn default_webhook_bind() -> String {
    "127.0.0.1:9009".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListenerConfig {
    #[serde(default = "default_task_poll")]
    pub poll_interval_secs: u64,
}

fn default_task_poll() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordListenerConfig {
    pub bot_token: String,
    pub channel_id: String,
    #[serde(default = "default_discord_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
    /// Messages must contain one of these to become events; empty means
    /// the built-in Proxmox keyword list.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_discord_poll() -> u64 {
    30
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifiersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gotify: Option<GotifyNotifierConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordNotifierConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GotifyNotifierConfig {
    pub server_url: String,
    pub app_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordNotifierConfig {
    pub webhook_url: String,
    #[serde(default = "default_discord_username")]
    pub username: String,
}

fn default_discord_username() -> String {
    "Proxmox Bridge".to_string()
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix the file must be a regular file, not world-writable, and not
    /// world-readable when it carries token secrets.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() || node.host.is_empty() {
                return Err(BridgeError::Config(
                    "node entries require non-empty name and host".to_string(),
                ));
            }
            if node.user.is_empty() || node.token_id.is_empty() || node.token_secret.is_empty() {
                return Err(BridgeError::Config(format!(
                    "node '{}' has an incomplete credential triple",
                    node.name
                )));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(BridgeError::Config(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
        }
        if self.pool.max_connect_attempts == 0 {
            return Err(BridgeError::Config(
                "pool.max_connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(BridgeError::Config(
                "dispatch.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the node tables into immutable descriptors.
    pub fn descriptors(&self) -> Vec<NodeDescriptor> {
        self.nodes
            .iter()
            .map(|entry| NodeDescriptor {
                name: entry.name.clone(),
                kind: entry.kind,
                host: entry.host.clone(),
                user: entry.user.clone(),
                token_id: entry.token_id.clone(),
                token_secret: entry.token_secret.clone(),
                verify_tls: entry.verify_tls.unwrap_or(self.verify_tls),
            })
            .collect()
    }
}

/// Reject config files whose permissions would leak token secrets.
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| {
        BridgeError::Config(format!("failed to read '{}': {}", path.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(BridgeError::Config(format!(
            "config path '{}' is not a regular file",
            path.display()
        )));
    }

    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o002 != 0 {
        return Err(BridgeError::Config(format!(
            "config file '{}' is world-writable (mode {:04o}); fix with: chmod o-w {}",
            path.display(),
            mode,
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_secret = content.contains("token_secret") || content.contains("app_token");

    if has_secret && mode & 0o004 != 0 {
        return Err(BridgeError::Config(format!(
            "config file '{}' contains credentials but is world-readable (mode {:04o}); \
             fix with: chmod 600 {}",
            path.display(),
            mode,
            path.display()
        )));
    }

    if has_secret && mode & 0o040 != 0 {
        warn!(
            "Config file '{}' contains credentials and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            mode,
            path.display()
        );
    }

    Ok(())
}
