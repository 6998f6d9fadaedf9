//! Connectivity self-test across nodes, listeners and notifiers.

use crate::manager::Manager;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub component: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentCheck {
    fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: true,
            detail: None,
        }
    }

    fn failed(component: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub checks: Vec<ComponentCheck>,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.healthy)
    }
}

impl Manager {
    /// Probe every configured node and health-check every channel. An
    /// empty configuration passes trivially.
    pub async fn self_test(&self) -> SelfTestReport {
        let mut checks = Vec::new();

        for name in self.pool().node_names().to_vec() {
            let component = format!("node:{name}");
            match self.pool().acquire(&name).await {
                Ok(_) => checks.push(ComponentCheck::healthy(component)),
                Err(err) => checks.push(ComponentCheck::failed(component, err.to_string())),
            }
        }

        for listener in self.listeners() {
            let component = format!("listener:{}", listener.name());
            match listener.health_check().await {
                Ok(()) => checks.push(ComponentCheck::healthy(component)),
                Err(err) => checks.push(ComponentCheck::failed(component, err.to_string())),
            }
        }

        for notifier in self.notifiers() {
            let component = format!("notifier:{}", notifier.name());
            match notifier.health_check().await {
                Ok(()) => checks.push(ComponentCheck::healthy(component)),
                Err(err) => checks.push(ComponentCheck::failed(component, err.to_string())),
            }
        }

        let report = SelfTestReport { checks };
        for check in &report.checks {
            if check.healthy {
                info!(component = %check.component, "Self-test check passed");
            } else {
                warn!(
                    component = %check.component,
                    detail = %check.detail.as_deref().unwrap_or("unknown"),
                    "Self-test check failed"
                );
            }
        }
        report
    }
}
