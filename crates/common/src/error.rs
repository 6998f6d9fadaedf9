//! Error types for proxbridge.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Unknown node: {node}")]
    NodeUnknown { node: String },

    #[error("Node '{node}' unreachable: {message}")]
    NodeUnreachable { node: String, message: String },

    #[error("Unknown tool: {tool}")]
    ToolNotFound { tool: String },

    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Listener '{listener}' failed to start: {message}")]
    ListenerStartFailed { listener: String, message: String },

    #[error("Notifier '{notifier}' delivery failed: {message}")]
    NotifierDeliveryFailed { notifier: String, message: String },

    #[error("Timed out: {operation}")]
    Timeout { operation: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Stable machine-readable code used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::NodeUnknown { .. } => "node_unknown",
            BridgeError::NodeUnreachable { .. } => "node_unreachable",
            BridgeError::ToolNotFound { .. } => "tool_not_found",
            BridgeError::InvalidArguments { .. } => "invalid_arguments",
            BridgeError::ListenerStartFailed { .. } => "listener_start_failed",
            BridgeError::NotifierDeliveryFailed { .. } => "notifier_delivery_failed",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::Cancelled { .. } => "cancelled",
            BridgeError::Config(_) => "config",
            BridgeError::Http(_) => "http",
            BridgeError::Io(_) => "io",
            BridgeError::Serialization(_) => "serialization",
        }
    }

    pub fn node_unknown(node: impl Into<String>) -> Self {
        BridgeError::NodeUnknown { node: node.into() }
    }

    pub fn node_unreachable(node: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::NodeUnreachable {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        BridgeError::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        BridgeError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn listener_start_failed(listener: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::ListenerStartFailed {
            listener: listener.into(),
            message: message.into(),
        }
    }

    pub fn notifier_delivery_failed(
        notifier: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BridgeError::NotifierDeliveryFailed {
            notifier: notifier.into(),
            message: message.into(),
        }
    }
}

/// Wire-level error details carried inside tool responses and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            node: None,
        }
    }
}

impl From<&BridgeError> for ErrorInfo {
    fn from(err: &BridgeError) -> Self {
        let node = match err {
            BridgeError::NodeUnknown { node } | BridgeError::NodeUnreachable { node, .. } => {
                Some(node.clone())
            }
            _ => None,
        };
        ErrorInfo {
            kind: err.kind().to_string(),
            message: err.to_string(),
            node,
        }
    }
}

impl From<BridgeError> for ErrorInfo {
    fn from(err: BridgeError) -> Self {
        ErrorInfo::from(&err)
    }
}
