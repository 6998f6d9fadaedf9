//! Tool-invocation router.
//!
//! Maps named, schema-validated tool requests onto the connection pool,
//! fanning multi-node tools out concurrently and aggregating one outcome
//! per node regardless of individual failures.

pub mod builtin;
pub mod router;
pub mod spec;

pub use builtin::register_builtin_tools;
pub use router::{
    LocalTool, NodeOutcome, NodeTool, ToolOutcome, ToolRequest, ToolResponse, ToolRouter,
};
pub use spec::{ArgKind, ArgSpec, ToolSpec, ToolTarget};
