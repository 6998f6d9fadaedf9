//! Static identity of a managed cluster node.

use serde::{Deserialize, Serialize};

/// The two node families the bridge talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Proxmox Virtual Environment
    Pve,
    /// Proxmox Backup Server
    Pbs,
}

impl NodeKind {
    /// Default API port for the node family.
    pub fn api_port(&self) -> u16 {
        match self {
            NodeKind::Pve => 8006,
            NodeKind::Pbs => 8007,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Pve => "pve",
            NodeKind::Pbs => "pbs",
        }
    }
}

/// Immutable identity and credentials of one cluster node.
///
/// Created at configuration load; read-only input to the connection pool.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique name, used as the pool key
    pub name: String,
    pub kind: NodeKind,
    pub host: String,
    /// Principal, e.g. `monitor@pve`
    pub user: String,
    /// API token ID
    pub token_id: String,
    /// API token secret
    pub token_secret: String,
    pub verify_tls: bool,
}

impl NodeDescriptor {
    /// Base URL of the node's JSON API.
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.kind.api_port())
    }

    /// Authorization header value for API token auth.
    ///
    /// PVE and PBS use different separators between token ID and secret.
    pub fn auth_header(&self) -> String {
        match self.kind {
            NodeKind::Pve => format!(
                "PVEAPIToken={}!{}={}",
                self.user, self.token_id, self.token_secret
            ),
            NodeKind::Pbs => format!(
                "PBSAPIToken={}!{}:{}",
                self.user, self.token_id, self.token_secret
            ),
        }
    }
}

// Keeps the token secret out of logs.
impl std::fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("token_id", &self.token_id)
            .field("token_secret", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}
