//! Polls the PVE task history and reports failed tasks.

use super::ListenerTask;
use async_trait::async_trait;
use proxbridge_common::config::TaskListenerConfig;
use proxbridge_common::{BridgeError, Event, EventSink, Listener, NodeKind, Result, Severity};
use proxbridge_pool::ConnectionPool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Extract failed-task events newer than `cursor` from a
/// `/nodes/{node}/tasks` response, returning the new cursor. With
/// `cursor == None` this is a baseline pass: the cursor advances but no
/// events are emitted.
fn collect_task_failures(
    node: &str,
    tasks: &Value,
    cursor: Option<i64>,
) -> (Vec<Event>, Option<i64>) {
    let list = match tasks.as_array() {
        Some(list) => list,
        None => return (Vec::new(), cursor),
    };

    let mut newest = cursor;
    let mut events = Vec::new();
    for task in list {
        let endtime = match task.get("endtime").and_then(Value::as_i64) {
            Some(endtime) => endtime,
            // Still running.
            None => continue,
        };
        if newest.map_or(true, |n| endtime > n) {
            newest = Some(endtime);
        }
        let seen = match cursor {
            Some(seen) => seen,
            None => continue,
        };
        if endtime <= seen {
            continue;
        }
        let status = task.get("status").and_then(Value::as_str).unwrap_or("");
        if status.is_empty() || status.eq_ignore_ascii_case("ok") {
            continue;
        }
        let upid = task.get("upid").and_then(Value::as_str).unwrap_or("?");
        let kind = task.get("type").and_then(Value::as_str).unwrap_or("task");
        let user = task.get("user").and_then(Value::as_str).unwrap_or("?");
        events.push(
            Event::new(
                "tasks",
                format!("Task {kind} failed on {node}"),
                format!("{upid} by {user}: {status}"),
            )
            .with_severity(Severity::Error)
            .with_node(node)
            .with_metadata("upid", upid)
            .with_metadata("task_status", status),
        );
    }
    (events, newest)
}

/// Periodically sweeps every reachable PVE node's recent task history
/// through the connection pool. Unreachable nodes are skipped per sweep,
/// not treated as listener failures.
pub struct TaskListener {
    pool: Arc<ConnectionPool>,
    config: TaskListenerConfig,
    task: ListenerTask,
}

impl TaskListener {
    pub fn new(pool: Arc<ConnectionPool>, config: TaskListenerConfig, grace: Duration) -> Self {
        Self {
            pool,
            config,
            task: ListenerTask::new(grace),
        }
    }
}

#[async_trait]
impl Listener for TaskListener {
    fn name(&self) -> &str {
        "tasks"
    }

    async fn start(&self, sink: EventSink) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        let mut shutdown = self.task.subscribe();
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut cursors: HashMap<String, i64> = HashMap::new();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let sweep = pool.acquire_all(Some(NodeKind::Pve)).await;
                for (name, error) in &sweep.skipped {
                    debug!(node = %name, error = %error.message, "Task poll skipped node");
                }
                for (name, api) in sweep.ready {
                    let tasks = match api.get(&format!("/nodes/{name}/tasks?limit=100")).await {
                        Ok(tasks) => tasks,
                        Err(err) => {
                            warn!(node = %name, error = %err, "Task history fetch failed");
                            continue;
                        }
                    };
                    let cursor = cursors.get(&name).copied();
                    let (events, newest) = collect_task_failures(&name, &tasks, cursor);
                    if let Some(newest) = newest {
                        cursors.insert(name.clone(), newest);
                    }
                    for event in events {
                        if sink.submit(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        self.task.install(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.task.stop(self.name()).await;
        Ok(())
    }

    /// There is nothing to bind; the listener is only useful when the
    /// pool knows at least one PVE node to sweep.
    async fn health_check(&self) -> Result<()> {
        let has_pve = self
            .pool
            .node_names()
            .iter()
            .filter_map(|name| self.pool.descriptor(name))
            .any(|descriptor| descriptor.kind == NodeKind::Pve);
        if has_pve {
            Ok(())
        } else {
            Err(BridgeError::Config(
                "task listener enabled but no PVE node is configured".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxbridge_common::NodeDescriptor;
    use proxbridge_pool::{NodeApi, NodeApiFactory, RetryPolicy};
    use serde_json::json;

    struct NullFactory;

    impl NodeApiFactory for NullFactory {
        fn build(&self, descriptor: &NodeDescriptor) -> Result<Arc<dyn NodeApi>> {
            Err(BridgeError::node_unreachable(
                &descriptor.name,
                "not built in this test",
            ))
        }
    }

    fn descriptor(name: &str, kind: NodeKind) -> NodeDescriptor {
        NodeDescriptor {
            name: name.to_string(),
            kind,
            host: format!("{name}.example:8006"),
            user: "monitor@pve".to_string(),
            token_id: "bridge".to_string(),
            token_secret: "secret".to_string(),
            verify_tls: false,
        }
    }

    fn pool(descriptors: Vec<NodeDescriptor>) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            descriptors,
            Arc::new(NullFactory),
            RetryPolicy {
                max_attempts: 1,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                backoff_multiplier: 2.0,
            },
            Duration::from_secs(600),
        ))
    }

    fn history() -> Value {
        json!([
            {"upid": "UPID:pve1:1", "type": "vzdump", "status": "OK", "endtime": 100, "user": "root@pam"},
            {"upid": "UPID:pve1:2", "type": "qmstart", "status": "job errors", "endtime": 200, "user": "root@pam"},
            {"upid": "UPID:pve1:3", "type": "qmstop"}
        ])
    }

    #[test]
    fn baseline_pass_emits_nothing_but_advances_cursor() {
        let (events, cursor) = collect_task_failures("pve1", &history(), None);
        assert!(events.is_empty());
        assert_eq!(cursor, Some(200));
    }

    #[test]
    fn failed_tasks_after_cursor_become_error_events() {
        let (events, cursor) = collect_task_failures("pve1", &history(), Some(50));
        assert_eq!(events.len(), 1);
        assert_eq!(cursor, Some(200));
        let event = &events[0];
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.node.as_deref(), Some("pve1"));
        assert!(event.message.contains("job errors"));
    }

    #[test]
    fn already_seen_tasks_are_not_replayed() {
        let (events, cursor) = collect_task_failures("pve1", &history(), Some(200));
        assert!(events.is_empty());
        assert_eq!(cursor, Some(200));
    }

    #[test]
    fn non_array_payload_is_ignored() {
        let (events, cursor) = collect_task_failures("pve1", &json!({"oops": true}), Some(10));
        assert!(events.is_empty());
        assert_eq!(cursor, Some(10));
    }

    #[tokio::test]
    async fn health_check_requires_a_pve_node() {
        let config = TaskListenerConfig {
            poll_interval_secs: 30,
        };
        let grace = Duration::from_millis(200);

        let pbs_only = TaskListener::new(
            pool(vec![descriptor("pbs1", NodeKind::Pbs)]),
            config.clone(),
            grace,
        );
        let err = pbs_only.health_check().await.unwrap_err();
        assert_eq!(err.kind(), "config");

        let with_pve = TaskListener::new(
            pool(vec![
                descriptor("pbs1", NodeKind::Pbs),
                descriptor("pve1", NodeKind::Pve),
            ]),
            config,
            grace,
        );
        with_pve.health_check().await.unwrap();
    }
}
