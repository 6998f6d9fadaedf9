//! Posts events to a Discord webhook as embeds.

use async_trait::async_trait;
use proxbridge_common::config::DiscordNotifierConfig;
use proxbridge_common::{BridgeError, Event, Notifier, Result, Severity};
use serde_json::{json, Value};
use tracing::debug;

fn color_for_severity(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 0xFF0000,
        Severity::Error => 0xFF4500,
        Severity::Warning => 0xFFA500,
        Severity::Info => 0x00FF00,
    }
}

fn build_embed(event: &Event, username: &str) -> Value {
    let mut fields = vec![json!({
        "name": "Severity",
        "value": event.severity.as_str(),
        "inline": true,
    })];
    if let Some(node) = &event.node {
        fields.push(json!({"name": "Node", "value": node, "inline": true}));
    }
    json!({
        "username": username,
        "embeds": [{
            "title": event.title,
            "description": event.message,
            "color": color_for_severity(event.severity),
            "fields": fields,
        }],
    })
}

pub struct DiscordNotifier {
    config: DiscordNotifierConfig,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(config: DiscordNotifierConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let body = build_embed(event, &self.config.username);
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|err| BridgeError::notifier_delivery_failed("discord", err.to_string()))?;

        // Discord answers 204 without `?wait=true`, 200 with it.
        if !response.status().is_success() {
            return Err(BridgeError::notifier_delivery_failed(
                "discord",
                format!("webhook returned {}", response.status()),
            ));
        }
        debug!(event_id = %event.id, "Delivered to discord");
        Ok(())
    }
}
