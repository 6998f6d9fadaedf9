//! Accepts events pushed over HTTP.

use super::ListenerTask;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use proxbridge_common::config::WebhookListenerConfig;
use proxbridge_common::{BridgeError, Event, EventSink, Listener, Result, Severity};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct InboundEvent {
    title: String,
    message: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    node: Option<String>,
}

async fn accept_event(
    State(sink): State<EventSink>,
    Json(payload): Json<InboundEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    if payload.title.is_empty() || payload.message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "title and message must be non-empty"})),
        );
    }
    let severity = match payload.severity.as_deref() {
        Some(raw) => match Severity::parse(raw) {
            Some(severity) => severity,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("unknown severity '{raw}'")})),
                );
            }
        },
        None => Severity::Info,
    };

    let source = payload.source.unwrap_or_else(|| "webhook".to_string());
    let mut event = Event::new(source, payload.title, payload.message).with_severity(severity);
    if let Some(node) = payload.node {
        event = event.with_node(node);
    }
    let id = event.id.clone();

    match sink.submit(event).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "event_id": id})),
        ),
        Err(err) => {
            warn!(error = %err, "Webhook event rejected, queue closed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "event queue closed"})),
            )
        }
    }
}

/// A small HTTP server with a single `POST /events` endpoint. Binding
/// happens in `start`, so port conflicts surface immediately.
pub struct WebhookListener {
    config: WebhookListenerConfig,
    task: ListenerTask,
    bound: Mutex<Option<SocketAddr>>,
}

impl WebhookListener {
    pub fn new(config: WebhookListenerConfig, grace: Duration) -> Self {
        Self {
            config,
            task: ListenerTask::new(grace),
            bound: Mutex::new(None),
        }
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().ok().and_then(|slot| *slot)
    }
}

#[async_trait]
impl Listener for WebhookListener {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn start(&self, sink: EventSink) -> Result<()> {
        let tcp = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|err| {
                BridgeError::listener_start_failed(
                    self.name(),
                    format!("bind {}: {err}", self.config.bind_addr),
                )
            })?;
        let local = tcp.local_addr().map_err(|err| {
            BridgeError::listener_start_failed(self.name(), err.to_string())
        })?;
        if let Ok(mut slot) = self.bound.lock() {
            *slot = Some(local);
        }
        debug!(addr = %local, "Webhook listener bound");

        let router = Router::new()
            .route("/events", post(accept_event))
            .with_state(sink);
        let mut shutdown = self.task.subscribe();

        let handle = tokio::spawn(async move {
            let server = axum::serve(tcp, router).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "Webhook listener server failed");
            }
        });
        self.task.install(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.task.stop(self.name()).await;
        if let Ok(mut slot) = self.bound.lock() {
            *slot = None;
        }
        Ok(())
    }

    /// While running the held socket is the proof; otherwise bind and
    /// release to show the address is usable.
    async fn health_check(&self) -> Result<()> {
        if self.bound_addr().is_some() {
            return Ok(());
        }
        tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|err| {
                BridgeError::listener_start_failed(
                    self.name(),
                    format!("bind {}: {err}", self.config.bind_addr),
                )
            })?;
        Ok(())
    }
}
