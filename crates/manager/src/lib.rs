//! Orchestrator: owns the connection pool, the event pipeline and the
//! tool router, and drives their shared lifecycle.

pub mod manager;
pub mod selftest;

pub use manager::{LifecyclePhase, Manager};
pub use selftest::{ComponentCheck, SelfTestReport};
