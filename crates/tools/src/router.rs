//! Request routing and multi-node aggregation.

use crate::spec::{ToolSpec, ToolTarget};
use async_trait::async_trait;
use proxbridge_common::{BridgeError, ErrorInfo, Result};
use proxbridge_pool::{ConnectionPool, NodeApi};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// An inbound tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

/// Result for one node of a multi-node invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { value: Value },
    Error { error: ErrorInfo },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

/// Either a direct value or one outcome per targeted node. A multi-node
/// response never turns into an overall failure because some nodes failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Single(Value),
    PerNode(Vec<NodeOutcome>),
}

impl ToolResponse {
    pub fn outcomes(&self) -> Option<&[NodeOutcome]> {
        match self {
            ToolResponse::PerNode(outcomes) => Some(outcomes),
            ToolResponse::Single(_) => None,
        }
    }
}

/// A tool that runs against one acquired node handle. For multi-node
/// targets the router invokes it once per node; the implementation never
/// sees partial failure.
#[async_trait]
pub trait NodeTool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn run(&self, api: Arc<dyn NodeApi>, args: &Map<String, Value>) -> Result<Value>;
}

/// A tool with no node access.
#[async_trait]
pub trait LocalTool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn run(&self, args: &Map<String, Value>) -> Result<Value>;
}

enum RegisteredTool {
    Node(Arc<dyn NodeTool>),
    Local(Arc<dyn LocalTool>),
}

impl RegisteredTool {
    fn spec(&self) -> &ToolSpec {
        match self {
            RegisteredTool::Node(tool) => tool.spec(),
            RegisteredTool::Local(tool) => tool.spec(),
        }
    }
}

/// Maps tool names to handlers and drives the connection pool.
pub struct ToolRouter {
    pool: Arc<ConnectionPool>,
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, for a stable catalog.
    order: Vec<String>,
}

impl ToolRouter {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register_node_tool(&mut self, tool: Arc<dyn NodeTool>) {
        let name = tool.spec().name.clone();
        debug!(tool = %name, "Registered node tool");
        if self.tools.insert(name.clone(), RegisteredTool::Node(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn register_local_tool(&mut self, tool: Arc<dyn LocalTool>) {
        let name = tool.spec().name.clone();
        debug!(tool = %name, "Registered local tool");
        if self.tools.insert(name.clone(), RegisteredTool::Local(tool)).is_none() {
            self.order.push(name);
        }
    }

    /// Enumerable catalog for the discovery surface.
    pub fn catalog(&self) -> Vec<&ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    /// Validate and execute one request.
    ///
    /// Unknown tools and invalid arguments are rejected before any pool
    /// access, so failed validation has no side effects.
    pub async fn invoke(&self, request: &ToolRequest) -> Result<ToolResponse> {
        let tool = self.tools.get(&request.tool).ok_or_else(|| {
            BridgeError::ToolNotFound {
                tool: request.tool.clone(),
            }
        })?;

        let spec = tool.spec();
        spec.validate_args(&request.arguments)?;

        if spec.state_changing {
            // Logged before execution so a crash mid-call is diagnosable.
            info!(
                tool = %spec.name,
                target = ?spec.target,
                arguments = %redact_arguments(&request.arguments),
                "Executing state-changing tool"
            );
        } else {
            debug!(tool = %spec.name, "Executing tool");
        }

        match (tool, spec.target) {
            (RegisteredTool::Local(local), _) => {
                let value = local.run(&request.arguments).await?;
                Ok(ToolResponse::Single(value))
            }
            (RegisteredTool::Node(node_tool), ToolTarget::SingleNode) => {
                let node = crate::spec::string_arg(&request.arguments, "node")?;
                let api = self.pool.acquire(node).await?;
                let value = node_tool.run(api, &request.arguments).await?;
                Ok(ToolResponse::Single(value))
            }
            (RegisteredTool::Node(node_tool), target) => {
                let kind = match target {
                    ToolTarget::AllOfKind(kind) => Some(kind),
                    _ => None,
                };
                self.invoke_multi(node_tool.clone(), kind, &request.arguments)
                    .await
            }
        }
    }

    async fn invoke_multi(
        &self,
        tool: Arc<dyn NodeTool>,
        kind: Option<proxbridge_common::NodeKind>,
        args: &Map<String, Value>,
    ) -> Result<ToolResponse> {
        let sweep = self.pool.acquire_all(kind).await;

        let mut set: JoinSet<(String, ToolOutcome)> = JoinSet::new();
        for (name, api) in &sweep.ready {
            let tool = tool.clone();
            let api = api.clone();
            let name = name.clone();
            let args = args.clone();
            set.spawn(async move {
                let outcome = match tool.run(api, &args).await {
                    Ok(value) => ToolOutcome::Success { value },
                    Err(err) => {
                        warn!(node = %name, error = %err, "Per-node tool call failed");
                        ToolOutcome::Error {
                            error: ErrorInfo::from(err),
                        }
                    }
                };
                (name, outcome)
            });
        }

        let mut finished: HashMap<String, ToolOutcome> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    finished.insert(name, outcome);
                }
                Err(err) => warn!(error = %err, "Per-node tool task panicked"),
            }
        }

        let mut outcomes = Vec::with_capacity(sweep.ready.len() + sweep.skipped.len());
        for (name, _) in &sweep.ready {
            let outcome = finished.remove(name).unwrap_or(ToolOutcome::Error {
                error: ErrorInfo {
                    kind: "cancelled".to_string(),
                    message: "per-node call abandoned".to_string(),
                    node: Some(name.clone()),
                },
            });
            outcomes.push(NodeOutcome {
                node: name.clone(),
                outcome,
            });
        }
        for (name, error) in sweep.skipped {
            outcomes.push(NodeOutcome {
                node: name,
                outcome: ToolOutcome::Error { error },
            });
        }

        Ok(ToolResponse::PerNode(outcomes))
    }
}

/// Render arguments for the intent log with secret-bearing values masked.
fn redact_arguments(args: &Map<String, Value>) -> String {
    let redacted: Map<String, Value> = args
        .iter()
        .map(|(key, value)| {
            let lower = key.to_lowercase();
            if lower.contains("token") || lower.contains("secret") || lower.contains("password") {
                (key.clone(), Value::String("<redacted>".to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect();
    Value::Object(redacted).to_string()
}

#[cfg(test)]
mod redact_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secrets_are_masked() {
        let args = json!({"node": "pve1", "api_token": "abc", "password": "p"})
            .as_object()
            .unwrap()
            .clone();
        let rendered = redact_arguments(&args);
        assert!(rendered.contains("pve1"));
        assert!(!rendered.contains("abc"));
        assert!(rendered.contains("<redacted>"));
    }
}
