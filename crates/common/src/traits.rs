//! Listener and notifier contracts.
//!
//! These traits are defined in `proxbridge-common` so that both the
//! orchestrator and the channel implementations can reference them without
//! circular dependencies.

use crate::error::{BridgeError, Result};
use crate::event::Event;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Bounded hand-off from a listener into the orchestrator's event queue.
///
/// Submission awaits queue space; it never waits on dispatch fan-out.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end, for tests and setup.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn submit(&self, event: Event) -> Result<()> {
        self.tx.send(event).await.map_err(|_| BridgeError::Cancelled {
            operation: "event queue closed".to_string(),
        })
    }
}

/// A source of normalized events; one implementation per input channel.
#[async_trait]
pub trait Listener: Send + Sync {
    fn name(&self) -> &str;

    /// Begin producing events into the sink. Returns once the listener's
    /// background work is running; it must not block for the lifetime of
    /// the listener.
    async fn start(&self, sink: EventSink) -> Result<()>;

    /// Stop producing events. Must be safe to call even if `start` failed
    /// or was never called. In-flight work abandoned after the grace
    /// period is reported, not silently dropped.
    async fn stop(&self) -> Result<()>;

    /// Lightweight check used by the connectivity self-test; must not
    /// start persistent listening.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A sink that delivers one event to one external channel.
///
/// Failures are returned, never thrown across the call boundary, so the
/// dispatcher's fan-out isolation stays mechanical.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &Event) -> Result<()>;

    /// Lightweight check used by the connectivity self-test.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel(8);
        sink.submit(Event::new("test", "first", "a")).await.unwrap();
        sink.submit(Event::new("test", "second", "b")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().title, "first");
        assert_eq!(rx.recv().await.unwrap().title, "second");
    }

    #[tokio::test]
    async fn sink_errors_when_queue_closed() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        let err = sink
            .submit(Event::new("test", "t", "m"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }
}
