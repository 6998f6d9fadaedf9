//! Tool catalog model and argument validation.

use proxbridge_common::{BridgeError, NodeKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
}

impl ArgKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Boolean => value.is_boolean(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    pub required: bool,
    pub description: String,
}

impl ArgSpec {
    pub fn required(name: &str, kind: ArgKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ArgKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        }
    }
}

/// What a tool runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTarget {
    /// One named node; the request must carry a `node` argument.
    SingleNode,
    /// Every configured node of one family.
    AllOfKind(NodeKind),
    /// Every configured node of both families.
    AllNodes,
    /// No node access at all.
    Local,
}

impl ToolTarget {
    pub fn is_multi_node(&self) -> bool {
        matches!(self, ToolTarget::AllOfKind(_) | ToolTarget::AllNodes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    pub target: ToolTarget,
    /// State-changing tools mutate remote cluster resources and execute
    /// at most once per invocation.
    pub state_changing: bool,
}

impl ToolSpec {
    pub fn read_only(name: &str, description: &str, target: ToolTarget, args: Vec<ArgSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            args,
            target,
            state_changing: false,
        }
    }

    pub fn state_changing(
        name: &str,
        description: &str,
        target: ToolTarget,
        args: Vec<ArgSpec>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            args,
            target,
            state_changing: true,
        }
    }

    /// Check argument presence and types. Runs before any pool access so
    /// invalid requests produce no side effects.
    pub fn validate_args(&self, args: &Map<String, Value>) -> Result<()> {
        for spec in &self.args {
            match args.get(&spec.name) {
                None if spec.required => {
                    return Err(BridgeError::invalid_arguments(format!(
                        "tool '{}' requires argument '{}'",
                        self.name, spec.name
                    )));
                }
                Some(value) if !value.is_null() && !spec.kind.matches(value) => {
                    return Err(BridgeError::invalid_arguments(format!(
                        "argument '{}' of tool '{}' must be a {}",
                        spec.name,
                        self.name,
                        spec.kind.as_str()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Pull a required string argument after validation.
pub fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::invalid_arguments(format!("missing argument '{name}'")))
}
