use async_trait::async_trait;
use proxbridge_common::{
    BridgeConfig, BridgeError, Event, EventSink, Listener, NodeDescriptor, NodeKind, Notifier,
    Result, Severity,
};
use proxbridge_manager::{LifecyclePhase, Manager};
use proxbridge_pool::{ConnectionPool, NodeApi, NodeApiFactory, NodeVersion, RetryPolicy};
use proxbridge_tools::ToolRequest;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Emits one event as soon as it starts.
struct OneShotListener {
    name: String,
    fail_start: bool,
}

impl OneShotListener {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_start: false,
        })
    }

    fn broken(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail_start: true,
        })
    }
}

#[async_trait]
impl Listener for OneShotListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, sink: EventSink) -> Result<()> {
        if self.fail_start {
            return Err(BridgeError::listener_start_failed(&self.name, "port busy"));
        }
        sink.submit(
            Event::new("test", "Listener event", "emitted at start")
                .with_severity(Severity::Warning),
        )
        .await
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

struct CountingNotifier {
    name: String,
    received: AtomicU32,
    delay: Duration,
    unhealthy: bool,
}

impl CountingNotifier {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            received: AtomicU32::new(0),
            delay: Duration::ZERO,
            unhealthy: false,
        })
    }

    fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            received: AtomicU32::new(0),
            delay,
            unhealthy: false,
        })
    }

    fn unhealthy(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            received: AtomicU32::new(0),
            delay: Duration::ZERO,
            unhealthy: true,
        })
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _event: &Event) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.unhealthy {
            return Err(BridgeError::Http("simulated outage".to_string()));
        }
        Ok(())
    }
}

struct MockNodeApi {
    descriptor: NodeDescriptor,
    rejected: bool,
}

#[async_trait]
impl NodeApi for MockNodeApi {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn probe(&self) -> Result<NodeVersion> {
        if self.rejected {
            return Err(BridgeError::node_unreachable(
                &self.descriptor.name,
                "authentication rejected",
            ));
        }
        Ok(NodeVersion {
            version: "8.2".to_string(),
            release: None,
            repoid: None,
        })
    }

    async fn get(&self, _path: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn post(&self, _path: &str, _body: Value) -> Result<Value> {
        Ok(Value::Null)
    }
}

struct BadCredentialFactory {
    rejecting: HashSet<String>,
}

impl NodeApiFactory for BadCredentialFactory {
    fn build(&self, descriptor: &NodeDescriptor) -> Result<Arc<dyn NodeApi>> {
        Ok(Arc::new(MockNodeApi {
            rejected: self.rejecting.contains(&descriptor.name),
            descriptor: descriptor.clone(),
        }))
    }
}

fn descriptor(name: &str, kind: NodeKind) -> NodeDescriptor {
    NodeDescriptor {
        name: name.to_string(),
        kind,
        host: format!("{name}.lab"),
        user: "monitor@pve".to_string(),
        token_id: "bridge".to_string(),
        token_secret: "secret".to_string(),
        verify_tls: false,
    }
}

async fn wait_for(notifier: &CountingNotifier, count: u32) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while notifier.received.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("notifier did not receive expected events in time");
}

#[tokio::test]
async fn events_flow_from_listener_to_notifier() {
    let mut manager = Manager::from_config(BridgeConfig::default()).unwrap();
    let notifier = CountingNotifier::new("counting");
    manager.register_listener(OneShotListener::new("oneshot")).unwrap();
    manager.register_notifier(notifier.clone()).unwrap();

    assert_eq!(manager.phase(), LifecyclePhase::Setup);
    manager.start().await.unwrap();
    assert_eq!(manager.phase(), LifecyclePhase::Running);
    assert!(manager.degraded().is_empty());

    wait_for(&notifier, 1).await;

    manager.shutdown().await.unwrap();
    assert_eq!(manager.phase(), LifecyclePhase::Stopped);
}

#[tokio::test]
async fn queued_events_are_drained_during_shutdown() {
    let mut manager = Manager::from_config(BridgeConfig::default()).unwrap();
    let notifier = CountingNotifier::slow("slow", Duration::from_millis(100));
    manager.register_notifier(notifier.clone()).unwrap();
    manager.start().await.unwrap();

    let sink = manager.sink();
    for n in 0..3 {
        sink.submit(Event::new("test", format!("event {n}"), "queued before shutdown"))
            .await
            .unwrap();
    }

    manager.shutdown().await.unwrap();
    assert_eq!(manager.phase(), LifecyclePhase::Stopped);
    assert_eq!(notifier.received.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broken_listener_degrades_instead_of_aborting() {
    let mut manager = Manager::from_config(BridgeConfig::default()).unwrap();
    let notifier = CountingNotifier::new("counting");
    manager.register_listener(OneShotListener::broken("busted")).unwrap();
    manager.register_listener(OneShotListener::new("healthy")).unwrap();
    manager.register_notifier(notifier.clone()).unwrap();

    manager.start().await.unwrap();
    assert_eq!(manager.phase(), LifecyclePhase::Running);
    assert_eq!(manager.degraded(), vec!["busted".to_string()]);

    // The healthy listener still feeds the pipeline.
    wait_for(&notifier, 1).await;
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_without_start_reaches_stopped() {
    let manager = Manager::from_config(BridgeConfig::default()).unwrap();
    manager.shutdown().await.unwrap();
    assert_eq!(manager.phase(), LifecyclePhase::Stopped);
}

#[tokio::test]
async fn registration_is_rejected_after_start() {
    let mut manager = Manager::from_config(BridgeConfig::default()).unwrap();
    manager.start().await.unwrap();
    let err = manager
        .register_notifier(CountingNotifier::new("late"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Config(_)));
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn tools_are_refused_after_shutdown() {
    let manager = Manager::from_config(BridgeConfig::default()).unwrap();
    manager.shutdown().await.unwrap();
    let err = manager
        .invoke_tool(&ToolRequest::new("cluster_status", Default::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Cancelled { .. }));
}

#[tokio::test]
async fn self_test_reports_per_component() {
    let mut manager = Manager::from_config(BridgeConfig::default()).unwrap();
    manager.register_notifier(CountingNotifier::new("good")).unwrap();
    manager.register_notifier(CountingNotifier::unhealthy("bad")).unwrap();

    let report = manager.self_test().await;
    assert!(!report.passed());
    assert_eq!(report.checks.len(), 2);
    assert!(report.checks[0].healthy);
    assert!(!report.checks[1].healthy);
}

#[tokio::test]
async fn self_test_flags_bad_credential_node() {
    let factory = Arc::new(BadCredentialFactory {
        rejecting: ["pve1".to_string()].into_iter().collect(),
    });
    let pool = Arc::new(ConnectionPool::new(
        vec![
            descriptor("pve1", NodeKind::Pve),
            descriptor("pve2", NodeKind::Pve),
        ],
        factory,
        RetryPolicy {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 2.0,
        },
        Duration::from_secs(600),
    ));
    let manager = Manager::with_pool(BridgeConfig::default(), pool).unwrap();

    let report = manager.self_test().await;
    assert!(!report.passed());
    assert_eq!(report.checks.len(), 2);

    assert_eq!(report.checks[0].component, "node:pve1");
    assert!(!report.checks[0].healthy);
    assert!(report.checks[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("authentication rejected"));

    assert_eq!(report.checks[1].component, "node:pve2");
    assert!(report.checks[1].healthy);
}

#[tokio::test]
async fn empty_configuration_self_test_passes() {
    let manager = Manager::from_config(BridgeConfig::default()).unwrap();
    let report = manager.self_test().await;
    assert!(report.checks.is_empty());
    assert!(report.passed());
}
