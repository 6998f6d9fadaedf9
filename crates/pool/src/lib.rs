//! Multi-node API connection pool.
//!
//! Owns one handle per configured cluster node with lazy, coalesced
//! connection establishment, capped retries with exponential backoff and
//! idle-staleness probing. Per-node failures never abort sibling nodes.

pub mod client;
pub mod pool;
pub mod retry;

pub use client::{HttpNodeApi, HttpNodeApiFactory, NodeApi, NodeApiFactory, NodeVersion};
pub use pool::{ConnectionPool, HandleState, NodeStatus, PoolSweep};
pub use retry::RetryPolicy;
