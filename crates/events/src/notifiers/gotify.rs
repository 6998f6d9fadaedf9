//! Pushes events to a Gotify server.

use async_trait::async_trait;
use proxbridge_common::config::GotifyNotifierConfig;
use proxbridge_common::{BridgeError, Event, Notifier, Result, Severity};
use serde_json::json;
use tracing::debug;

fn priority_for_severity(severity: Severity) -> i64 {
    match severity {
        Severity::Info => 5,
        Severity::Warning => 7,
        Severity::Error => 8,
        Severity::Critical => 10,
    }
}

pub struct GotifyNotifier {
    config: GotifyNotifierConfig,
    client: reqwest::Client,
}

impl GotifyNotifier {
    pub fn new(config: GotifyNotifierConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn message_url(&self) -> String {
        format!("{}/message", self.config.server_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Notifier for GotifyNotifier {
    fn name(&self) -> &str {
        "gotify"
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let body = json!({
            "title": event.title,
            "message": event.message,
            "priority": priority_for_severity(event.severity),
        });
        let response = self
            .client
            .post(self.message_url())
            .header("X-Gotify-Key", &self.config.app_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| BridgeError::notifier_delivery_failed("gotify", err.to_string()))?;

        if !response.status().is_success() {
            return Err(BridgeError::notifier_delivery_failed(
                "gotify",
                format!("server returned {}", response.status()),
            ));
        }
        debug!(event_id = %event.id, "Delivered to gotify");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.config.server_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| BridgeError::Http(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BridgeError::Http(format!(
                "gotify health returned {}",
                response.status()
            )))
        }
    }
}
