//! Polls a Discord channel for operator messages about the cluster.

use super::ListenerTask;
use async_trait::async_trait;
use proxbridge_common::config::DiscordListenerConfig;
use proxbridge_common::{BridgeError, Event, EventSink, Listener, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Messages that do not mention any of these are ignored.
const DEFAULT_KEYWORDS: &[&str] = &[
    "proxmox", "pve", "pbs", "vm", "virtual machine", "backup", "cluster", "node", "migration",
    "storage",
];

#[derive(Debug, Deserialize)]
struct ChannelMessage {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    author: Author,
}

#[derive(Debug, Default, Deserialize)]
struct Author {
    #[serde(default)]
    username: String,
}

fn snowflake(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

fn mentions_cluster(content: &str, keywords: &[String]) -> bool {
    let lower = content.to_lowercase();
    if keywords.is_empty() {
        DEFAULT_KEYWORDS.iter().any(|k| lower.contains(k))
    } else {
        keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
    }
}

/// Turn messages newer than `cursor` into events and advance the cursor.
/// With `cursor == None` only the high-water mark is recorded, so channel
/// history is never replayed.
fn collect_messages(
    messages: &[ChannelMessage],
    cursor: Option<u64>,
    keywords: &[String],
) -> (Vec<Event>, Option<u64>) {
    let top = messages.iter().map(|m| snowflake(&m.id)).max();
    let seen = match cursor {
        Some(seen) => seen,
        None => return (Vec::new(), top.or(Some(0))),
    };

    let mut fresh: Vec<&ChannelMessage> = messages
        .iter()
        .filter(|m| snowflake(&m.id) > seen)
        .collect();
    fresh.sort_by_key(|m| snowflake(&m.id));

    let mut events = Vec::new();
    for message in fresh {
        if !mentions_cluster(&message.content, keywords) {
            continue;
        }
        events.push(
            Event::new(
                "discord",
                format!("Discord message from {}", message.author.username),
                &message.content,
            )
            .with_metadata("discord_id", message.id.clone()),
        );
    }
    (events, Some(top.map_or(seen, |t| seen.max(t))))
}

/// Cursor-based poll of one channel through the bot API. Only messages
/// mentioning the cluster keywords become events.
pub struct DiscordListener {
    config: DiscordListenerConfig,
    client: reqwest::Client,
    task: ListenerTask,
}

impl DiscordListener {
    pub fn new(config: DiscordListenerConfig, grace: Duration) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            task: ListenerTask::new(grace),
        }
    }

    fn channel_url(&self) -> String {
        format!(
            "{}/channels/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.channel_id
        )
    }

    async fn fetch_messages(
        client: &reqwest::Client,
        config: &DiscordListenerConfig,
    ) -> Result<Vec<ChannelMessage>> {
        let url = format!(
            "{}/channels/{}/messages?limit=100",
            config.api_base.trim_end_matches('/'),
            config.channel_id
        );
        let response = client
            .get(&url)
            .header("Authorization", format!("Bot {}", config.bot_token))
            .send()
            .await
            .map_err(|err| BridgeError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::Http(format!(
                "discord returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| BridgeError::Http(err.to_string()))
    }
}

#[async_trait]
impl Listener for DiscordListener {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self, sink: EventSink) -> Result<()> {
        let client = self.client.clone();
        let config = self.config.clone();
        let mut shutdown = self.task.subscribe();
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut cursor: Option<u64> = None;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let messages = match Self::fetch_messages(&client, &config).await {
                    Ok(messages) => messages,
                    Err(err) => {
                        warn!(error = %err, "Discord poll failed");
                        continue;
                    }
                };

                let (events, next) = collect_messages(&messages, cursor, &config.keywords);
                if cursor.is_none() {
                    debug!(baseline = next.unwrap_or(0), "Discord baseline recorded");
                }
                cursor = next;
                for event in events {
                    if sink.submit(event).await.is_err() {
                        return;
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
        let response = self
            .client
            .get(self.channel_url())
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .send()
            .await
            .map_err(|err| BridgeError::Http(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BridgeError::Http(format!(
                "discord channel lookup returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, content: &str) -> ChannelMessage {
        ChannelMessage {
            id: id.to_string(),
            content: content.to_string(),
            author: Author {
                username: "ops".to_string(),
            },
        }
    }

    #[test]
    fn first_poll_records_baseline_silently() {
        let messages = vec![message("30", "pve1 backup failed"), message("10", "old")];
        let (events, cursor) = collect_messages(&messages, None, &[]);
        assert!(events.is_empty());
        assert_eq!(cursor, Some(30));
    }

    #[test]
    fn only_cluster_mentions_become_events() {
        let messages = vec![
            message("40", "lunch at noon?"),
            message("50", "migration of VM 100 to pve2 stuck"),
        ];
        let (events, cursor) = collect_messages(&messages, Some(30), &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(cursor, Some(50));
        assert!(events[0].message.contains("migration"));
        assert_eq!(events[0].title, "Discord message from ops");
    }

    #[test]
    fn already_seen_messages_are_not_replayed() {
        let messages = vec![message("50", "pve node down")];
        let (events, cursor) = collect_messages(&messages, Some(50), &[]);
        assert!(events.is_empty());
        assert_eq!(cursor, Some(50));
    }

    #[test]
    fn custom_keywords_override_the_default_list() {
        let messages = vec![message("60", "ceph osd flapping")];
        let keywords = vec!["ceph".to_string()];
        let (events, _) = collect_messages(&messages, Some(50), &keywords);
        assert_eq!(events.len(), 1);

        let (none, _) = collect_messages(&messages, Some(50), &["zfs".to_string()]);
        assert!(none.is_empty());
    }
}
