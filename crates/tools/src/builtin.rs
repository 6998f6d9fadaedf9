//! Built-in Proxmox tools exposed through the router.

use crate::router::{LocalTool, NodeTool, ToolRouter};
use crate::spec::{string_arg, ArgKind, ArgSpec, ToolSpec, ToolTarget};
use async_trait::async_trait;
use proxbridge_common::{BridgeError, Event, EventSink, NodeKind, Result, Severity};
use proxbridge_pool::NodeApi;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Register the full built-in catalog. `sink` feeds `send_notification`
/// into the orchestrator's event queue.
pub fn register_builtin_tools(router: &mut ToolRouter, sink: EventSink) {
    router.register_node_tool(Arc::new(ClusterStatusTool::new()));
    router.register_node_tool(Arc::new(NodeStatusTool::new()));
    router.register_node_tool(Arc::new(NodeHealthTool::new()));
    router.register_node_tool(Arc::new(VmListTool::new()));
    router.register_node_tool(Arc::new(VmStatusTool::new()));
    router.register_node_tool(Arc::new(VmPowerTool::start()));
    router.register_node_tool(Arc::new(VmPowerTool::stop()));
    router.register_node_tool(Arc::new(StorageStatusTool::new()));
    router.register_local_tool(Arc::new(SendNotificationTool::new(sink)));
}

fn require_pve(api: &dyn NodeApi) -> Result<()> {
    if api.descriptor().kind != NodeKind::Pve {
        return Err(BridgeError::invalid_arguments(format!(
            "node '{}' is not a PVE node",
            api.descriptor().name
        )));
    }
    Ok(())
}

/// Connectivity and version summary for every configured node.
pub struct ClusterStatusTool {
    spec: ToolSpec,
}

impl ClusterStatusTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::read_only(
                "cluster_status",
                "Get connectivity and version of all configured PVE and PBS nodes",
                ToolTarget::AllNodes,
                vec![],
            ),
        }
    }
}

#[async_trait]
impl NodeTool for ClusterStatusTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, api: Arc<dyn NodeApi>, _args: &Map<String, Value>) -> Result<Value> {
        let version = api.probe().await?;
        let descriptor = api.descriptor();
        Ok(json!({
            "kind": descriptor.kind.as_str(),
            "host": descriptor.host,
            "version": version.version,
            "release": version.release,
        }))
    }
}

/// Detailed status of one node.
pub struct NodeStatusTool {
    spec: ToolSpec,
}

impl NodeStatusTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::read_only(
                "node_status",
                "Get detailed status of a specific node",
                ToolTarget::SingleNode,
                vec![ArgSpec::required("node", ArgKind::String, "Node name")],
            ),
        }
    }
}

#[async_trait]
impl NodeTool for NodeStatusTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, api: Arc<dyn NodeApi>, _args: &Map<String, Value>) -> Result<Value> {
        let name = api.descriptor().name.clone();
        match api.descriptor().kind {
            NodeKind::Pve => api.get(&format!("/nodes/{name}/status")).await,
            NodeKind::Pbs => api.get("/nodes/localhost/status").await,
        }
    }
}

/// Probe-level health check across the fleet.
pub struct NodeHealthTool {
    spec: ToolSpec,
}

impl NodeHealthTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::read_only(
                "node_health",
                "Perform a connectivity health check on all configured nodes",
                ToolTarget::AllNodes,
                vec![],
            ),
        }
    }
}

#[async_trait]
impl NodeTool for NodeHealthTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, api: Arc<dyn NodeApi>, _args: &Map<String, Value>) -> Result<Value> {
        let version = api.probe().await?;
        Ok(json!({
            "status": "healthy",
            "version": version.version,
        }))
    }
}

/// Guest inventory per PVE node.
pub struct VmListTool {
    spec: ToolSpec,
}

impl VmListTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::read_only(
                "vm_list",
                "List VMs and containers on all PVE nodes",
                ToolTarget::AllOfKind(NodeKind::Pve),
                vec![ArgSpec::optional(
                    "type",
                    ArgKind::String,
                    "Guest type filter: qemu, lxc or all",
                )],
            ),
        }
    }
}

#[async_trait]
impl NodeTool for VmListTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, api: Arc<dyn NodeApi>, args: &Map<String, Value>) -> Result<Value> {
        let name = api.descriptor().name.clone();
        let filter = args.get("type").and_then(Value::as_str).unwrap_or("all");

        let mut result = Map::new();
        if filter == "qemu" || filter == "all" {
            result.insert("qemu".to_string(), api.get(&format!("/nodes/{name}/qemu")).await?);
        }
        if filter == "lxc" || filter == "all" {
            result.insert("lxc".to_string(), api.get(&format!("/nodes/{name}/lxc")).await?);
        }
        if result.is_empty() {
            return Err(BridgeError::invalid_arguments(format!(
                "unknown guest type filter '{filter}'"
            )));
        }
        Ok(Value::Object(result))
    }
}

/// Current status of one VM.
pub struct VmStatusTool {
    spec: ToolSpec,
}

impl VmStatusTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::read_only(
                "vm_status",
                "Get status of a specific VM",
                ToolTarget::SingleNode,
                vec![
                    ArgSpec::required("node", ArgKind::String, "Node name"),
                    ArgSpec::required("vmid", ArgKind::String, "VM ID"),
                ],
            ),
        }
    }
}

#[async_trait]
impl NodeTool for VmStatusTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, api: Arc<dyn NodeApi>, args: &Map<String, Value>) -> Result<Value> {
        require_pve(api.as_ref())?;
        let name = api.descriptor().name.clone();
        let vmid = string_arg(args, "vmid")?;
        api.get(&format!("/nodes/{name}/qemu/{vmid}/status/current"))
            .await
    }
}

/// Start or stop one VM. The mutating call itself is never retried.
pub struct VmPowerTool {
    spec: ToolSpec,
    action: &'static str,
}

impl VmPowerTool {
    pub fn start() -> Self {
        Self {
            spec: ToolSpec::state_changing(
                "vm_start",
                "Start a VM",
                ToolTarget::SingleNode,
                Self::args(),
            ),
            action: "start",
        }
    }

    pub fn stop() -> Self {
        Self {
            spec: ToolSpec::state_changing(
                "vm_stop",
                "Stop a VM",
                ToolTarget::SingleNode,
                Self::args(),
            ),
            action: "stop",
        }
    }

    fn args() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("node", ArgKind::String, "Node name"),
            ArgSpec::required("vmid", ArgKind::String, "VM ID"),
        ]
    }
}

#[async_trait]
impl NodeTool for VmPowerTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, api: Arc<dyn NodeApi>, args: &Map<String, Value>) -> Result<Value> {
        require_pve(api.as_ref())?;
        let name = api.descriptor().name.clone();
        let vmid = string_arg(args, "vmid")?;
        api.post(
            &format!("/nodes/{name}/qemu/{vmid}/status/{}", self.action),
            json!({}),
        )
        .await
    }
}

/// Storage usage per PVE node.
pub struct StorageStatusTool {
    spec: ToolSpec,
}

impl StorageStatusTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::read_only(
                "storage_status",
                "Monitor storage usage across PVE nodes",
                ToolTarget::AllOfKind(NodeKind::Pve),
                vec![],
            ),
        }
    }
}

#[async_trait]
impl NodeTool for StorageStatusTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, api: Arc<dyn NodeApi>, _args: &Map<String, Value>) -> Result<Value> {
        let name = api.descriptor().name.clone();
        api.get(&format!("/nodes/{name}/storage")).await
    }
}

/// Inject a notification through the regular dispatch path.
pub struct SendNotificationTool {
    spec: ToolSpec,
    sink: EventSink,
}

impl SendNotificationTool {
    pub fn new(sink: EventSink) -> Self {
        Self {
            spec: ToolSpec::read_only(
                "send_notification",
                "Send a notification through the configured channels",
                ToolTarget::Local,
                vec![
                    ArgSpec::required("title", ArgKind::String, "Notification title"),
                    ArgSpec::required("message", ArgKind::String, "Notification message"),
                    ArgSpec::optional(
                        "severity",
                        ArgKind::String,
                        "Severity: info, warning, error or critical",
                    ),
                ],
            ),
            sink,
        }
    }
}

#[async_trait]
impl LocalTool for SendNotificationTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value> {
        let title = string_arg(args, "title")?;
        let message = string_arg(args, "message")?;
        if title.is_empty() || message.is_empty() {
            return Err(BridgeError::invalid_arguments(
                "title and message must be non-empty",
            ));
        }

        let severity = match args.get("severity").and_then(Value::as_str) {
            Some(raw) => Severity::parse(raw).ok_or_else(|| {
                BridgeError::invalid_arguments(format!("unknown severity '{raw}'"))
            })?,
            None => Severity::Info,
        };

        let event = Event::new("tool", title, message).with_severity(severity);
        let id = event.id.clone();
        self.sink.submit(event).await?;

        Ok(json!({
            "status": "queued",
            "event_id": id,
            "severity": severity.as_str(),
        }))
    }
}
