//! The normalized notification unit passed from listeners to notifiers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Parse a severity name as it appears on the wire.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// A normalized event produced by a listener.
///
/// Immutable once constructed; every notifier delivery for one event
/// observes the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: String,

    /// Which listener produced the event
    pub source: String,

    pub title: String,

    pub message: String,

    #[serde(default)]
    pub severity: Severity,

    /// Cluster node the event relates to, when applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Ingestion time (Unix millis) unless the source supplied one
    pub timestamp: u64,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            source: source.into(),
            title: title.into(),
            message: message.into(),
            severity: Severity::Info,
            node: None,
            timestamp: now_millis(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_timestamp(mut self, millis: u64) -> Self {
        self.timestamp = millis;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
