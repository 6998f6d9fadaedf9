//! Polls a Gotify server's message stream.

use super::ListenerTask;
use async_trait::async_trait;
use proxbridge_common::config::GotifyListenerConfig;
use proxbridge_common::{BridgeError, Event, EventSink, Listener, Result, Severity};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    priority: i64,
}

fn severity_for_priority(priority: i64) -> Severity {
    match priority {
        p if p >= 8 => Severity::Critical,
        p if p >= 4 => Severity::Warning,
        _ => Severity::Info,
    }
}

/// Polls `GET /message` and emits one event per message that arrived
/// after the listener started. The first successful poll only records the
/// high-water mark, so pre-existing messages are never replayed.
pub struct GotifyListener {
    config: GotifyListenerConfig,
    client: reqwest::Client,
    task: ListenerTask,
}

impl GotifyListener {
    pub fn new(config: GotifyListenerConfig, grace: Duration) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            task: ListenerTask::new(grace),
        }
    }

    async fn fetch_messages(
        client: &reqwest::Client,
        config: &GotifyListenerConfig,
    ) -> Result<Vec<Message>> {
        let url = format!("{}/message?limit=100", config.server_url.trim_end_matches('/'));
        let response = client
            .get(&url)
            .header("X-Gotify-Key", &config.client_token)
            .send()
            .await
            .map_err(|err| BridgeError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::Http(format!(
                "gotify returned {}",
                response.status()
            )));
        }
        let page: MessagePage = response
            .json()
            .await
            .map_err(|err| BridgeError::Http(err.to_string()))?;
        Ok(page.messages)
    }
}

#[async_trait]
impl Listener for GotifyListener {
    fn name(&self) -> &str {
        "gotify"
    }

    async fn start(&self, sink: EventSink) -> Result<()> {
        let client = self.client.clone();
        let config = self.config.clone();
        let mut shutdown = self.task.subscribe();
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            // None until the first successful poll establishes a baseline.
            let mut cursor: Option<u64> = None;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let messages = match Self::fetch_messages(&client, &config).await {
                    Ok(messages) => messages,
                    Err(err) => {
                        warn!(error = %err, "Gotify poll failed");
                        continue;
                    }
                };

                let top = messages.iter().map(|m| m.id).max();
                match cursor {
                    None => {
                        cursor = Some(top.unwrap_or(0));
                        debug!(baseline = cursor.unwrap_or(0), "Gotify baseline recorded");
                    }
                    Some(seen) => {
                        let mut fresh: Vec<&Message> =
                            messages.iter().filter(|m| m.id > seen).collect();
                        fresh.sort_by_key(|m| m.id);
                        for message in fresh {
                            let event = Event::new("gotify", &message.title, &message.message)
                                .with_severity(severity_for_priority(message.priority))
                                .with_metadata("gotify_id", message.id.to_string());
                            if sink.submit(event).await.is_err() {
                                return;
                            }
                        }
                        if let Some(top) = top {
                            cursor = Some(seen.max(top));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_maps_to_severity() {
        assert_eq!(severity_for_priority(0), Severity::Info);
        assert_eq!(severity_for_priority(3), Severity::Info);
        assert_eq!(severity_for_priority(4), Severity::Warning);
        assert_eq!(severity_for_priority(7), Severity::Warning);
        assert_eq!(severity_for_priority(8), Severity::Critical);
        assert_eq!(severity_for_priority(10), Severity::Critical);
    }
}
