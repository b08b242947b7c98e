//! Raw preset/plugin declarations, before resolution.
//!
//! A declaration is what a user writes in a config file or what a preset
//! yields from its `apply`: a specifier string, a specifier plus static
//! config, a specifier group, or (plugins only) an already-constructed
//! in-memory stub.

use std::fmt;

use serde_json::Value;

use armature_core::{CoreError, CoreResult};

use crate::loader::ApplyFn;
use crate::plugin::EnablePredicate;

/// An unresolved preset/plugin reference.
#[derive(Clone)]
pub enum Declaration {
    /// A module specifier (path or package name).
    Specifier(String),
    /// A module specifier with its static config.
    WithConfig(String, Value),
    /// A group of specifiers, flattened during resolution.
    Group(Vec<String>),
    /// An already-constructed plugin stub (plugins only).
    Instance(PluginStub),
}

impl Declaration {
    /// Parses a declaration from a config-file value.
    ///
    /// Accepted shapes: `"specifier"`, `["specifier", config]`, and
    /// `["a", "b", ...]` (a group).
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        match value {
            Value::String(s) => Ok(Self::Specifier(s.clone())),
            Value::Array(items) => {
                if items.len() == 2 {
                    if let (Some(Value::String(s)), Some(cfg)) = (items.first(), items.get(1)) {
                        if !cfg.is_string() {
                            return Ok(Self::WithConfig(s.clone(), cfg.clone()));
                        }
                    }
                }
                let mut group = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => group.push(s.clone()),
                        other => {
                            return Err(CoreError::configuration(format!(
                                "unsupported plugin declaration element: {other}"
                            )))
                        }
                    }
                }
                Ok(Self::Group(group))
            }
            other => Err(CoreError::configuration(format!(
                "unsupported plugin declaration: {other}"
            ))),
        }
    }
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specifier(s) => f.debug_tuple("Specifier").field(s).finish(),
            Self::WithConfig(s, cfg) => f.debug_tuple("WithConfig").field(s).field(cfg).finish(),
            Self::Group(g) => f.debug_tuple("Group").field(g).finish(),
            Self::Instance(stub) => f.debug_tuple("Instance").field(stub).finish(),
        }
    }
}

impl From<&str> for Declaration {
    fn from(s: &str) -> Self {
        Self::Specifier(s.to_string())
    }
}

impl From<String> for Declaration {
    fn from(s: String) -> Self {
        Self::Specifier(s)
    }
}

impl From<(String, Value)> for Declaration {
    fn from((specifier, config): (String, Value)) -> Self {
        Self::WithConfig(specifier, config)
    }
}

/// An in-memory plugin definition, registered without file resolution.
///
/// `id` and `key` are required; `apply` defaults to a no-op, `config` to an
/// empty value.
#[derive(Clone, Default)]
pub struct PluginStub {
    /// Unique plugin id.
    pub id: String,
    /// Capability-lookup key.
    pub key: String,
    /// Optional `apply` entry point (defaults to a no-op).
    pub apply: Option<ApplyFn>,
    /// Optional enable predicate.
    pub enable: Option<EnablePredicate>,
    /// Optional static config.
    pub config: Option<Value>,
}

impl fmt::Debug for PluginStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginStub")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
