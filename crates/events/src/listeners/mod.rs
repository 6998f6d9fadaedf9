//! Input channels that turn external signals into normalized events.

mod discord;
mod gotify;
mod syslog;
mod tasks;
mod webhook;

pub use discord::DiscordListener;
pub use gotify::GotifyListener;
pub use syslog::SyslogListener;
pub use tasks::TaskListener;
pub use webhook::WebhookListener;

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Shared background-task plumbing for listeners: a shutdown signal plus
/// the task handle, with a bounded wait on stop.
pub(crate) struct ListenerTask {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    grace: Duration,
}

impl ListenerTask {
    pub(crate) fn new(grace: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handle: Mutex::new(None),
            grace,
        }
    }

    /// A receiver that resolves once `stop` is called.
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn install(&self, handle: JoinHandle<()>) {
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Signal shutdown and wait up to the grace period for the task to
    /// finish. A task still running after the grace period is aborted and
    /// reported.
    pub(crate) async fn stop(&self, name: &str) {
        let _ = self.shutdown.send(true);
        let handle = match self.handle.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.grace, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(
                        listener = %name,
                        grace_ms = self.grace.as_millis() as u64,
                        "Listener did not stop within grace period, aborting"
                    );
                    handle.abort();
                }
            }
        }
    }
}
