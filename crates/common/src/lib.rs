//! Common types and traits shared across the proxbridge crates.
//!
//! This crate provides the foundational abstractions: the normalized
//! [`Event`] model, node identity, the error taxonomy, the
//! [`Listener`]/[`Notifier`] contracts and the configuration surface.

pub mod config;
pub mod error;
pub mod event;
pub mod node;
pub mod traits;

pub use config::BridgeConfig;
pub use error::{BridgeError, ErrorInfo, Result};
pub use event::{Event, Severity};
pub use node::{NodeDescriptor, NodeKind};
pub use traits::{EventSink, Listener, Notifier};
