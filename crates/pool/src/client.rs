//! HTTP client for the Proxmox node APIs.

use async_trait::async_trait;
use proxbridge_common::config::PoolConfig;
use proxbridge_common::{BridgeError, NodeDescriptor, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Version info returned by the `/version` probe endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeVersion {
    pub version: String,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub repoid: Option<String>,
}

/// One authenticated connection to one cluster node.
///
/// The trait seam lets tests substitute counting mocks for the real
/// HTTP transport.
#[async_trait]
pub trait NodeApi: Send + Sync {
    fn descriptor(&self) -> &NodeDescriptor;

    /// Cheap liveness and credential probe.
    async fn probe(&self) -> Result<NodeVersion>;

    async fn get(&self, path: &str) -> Result<Value>;

    async fn post(&self, path: &str, body: Value) -> Result<Value>;
}

impl std::fmt::Debug for dyn NodeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeApi")
            .field("node", &self.descriptor().name)
            .finish()
    }
}

/// Builds a [`NodeApi`] for a descriptor. The pool owns exactly one
/// factory and calls it on (re)connect.
pub trait NodeApiFactory: Send + Sync {
    fn build(&self, descriptor: &NodeDescriptor) -> Result<Arc<dyn NodeApi>>;
}

/// Production [`NodeApi`] backed by reqwest.
pub struct HttpNodeApi {
    descriptor: NodeDescriptor,
    client: reqwest::Client,
}

impl HttpNodeApi {
    pub fn new(
        descriptor: NodeDescriptor,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&descriptor.auth_header())
            .map_err(|e| BridgeError::Config(format!("invalid credentials: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout);
        if !descriptor.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| BridgeError::Http(e.to_string()))?;

        Ok(Self { descriptor, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.descriptor.base_url(), path)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let node = &self.descriptor.name;

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BridgeError::timeout(format!("request to node '{node}'"))
            } else {
                BridgeError::node_unreachable(node, e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(BridgeError::node_unreachable(
                node,
                format!("authentication rejected ({status})"),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Http(format!(
                "node '{node}' returned {status}: {body}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::Http(format!("node '{node}' sent invalid JSON: {e}")))?;

        // The Proxmox APIs wrap every response in a `data` envelope.
        Ok(match payload {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        })
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn probe(&self) -> Result<NodeVersion> {
        let data = self.get("/version").await?;
        let version: NodeVersion = serde_json::from_value(data).map_err(|e| {
            BridgeError::node_unreachable(
                &self.descriptor.name,
                format!("unexpected version payload: {e}"),
            )
        })?;
        debug!(
            node = %self.descriptor.name,
            version = %version.version,
            "Probe succeeded"
        );
        Ok(version)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.execute(self.client.get(self.url(path))).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(self.client.post(self.url(path)).json(&body))
            .await
    }
}

/// Factory producing [`HttpNodeApi`] clients with pool-level timeouts.
pub struct HttpNodeApiFactory {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpNodeApiFactory {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_config(pool: &PoolConfig) -> Self {
        Self::new(
            Duration::from_millis(pool.connect_timeout_ms),
            Duration::from_millis(pool.request_timeout_ms),
        )
    }
}

impl NodeApiFactory for HttpNodeApiFactory {
    fn build(&self, descriptor: &NodeDescriptor) -> Result<Arc<dyn NodeApi>> {
        Ok(Arc::new(HttpNodeApi::new(
            descriptor.clone(),
            self.connect_timeout,
            self.request_timeout,
        )?))
    }
}
