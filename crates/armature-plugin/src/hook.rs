//! Hook records — one registered callback with ordering metadata.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use armature_core::{CoreError, CoreResult};

use crate::plugin::Plugin;

/// Invocation context handed to a hook callback.
///
/// `memo` carries the running accumulator for modifier compositions and is
/// absent otherwise; `args` carries the host-supplied arguments.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Running accumulator (modifier compositions only).
    pub memo: Option<Value>,
    /// Host-supplied arguments.
    pub args: Option<Value>,
}

/// A hook callback. Returning `None` means the hook produced no value.
pub type HookFn =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, CoreResult<Option<Value>>> + Send + Sync>;

/// Ordering options for a hook registration.
#[derive(Clone, Default)]
pub struct HookOpts {
    /// Ordering stage; smaller runs earlier. Untagged hooks run at 0.
    pub stage: i32,
    /// Key of another plugin whose hook (under the same name) this hook
    /// must run ahead of.
    pub before: Option<String>,
}

/// One registered callback answering a named extension point.
pub struct Hook {
    /// The plugin that registered this hook.
    pub plugin: Arc<Plugin>,
    /// The hook name this callback answers.
    pub key: String,
    callback: HookFn,
    /// Ordering stage; smaller runs earlier.
    pub stage: i32,
    /// Run-before constraint (owning plugin key of the target hook).
    pub before: Option<String>,
}

impl Hook {
    /// Creates a hook record. An empty or blank `key` is a hard error.
    pub fn new(
        plugin: Arc<Plugin>,
        key: impl Into<String>,
        callback: HookFn,
        opts: HookOpts,
    ) -> CoreResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(CoreError::configuration(
                "a hook requires a non-empty key and a callback",
            ));
        }
        Ok(Self {
            plugin,
            key,
            callback,
            stage: opts.stage,
            before: opts.before,
        })
    }

    /// Returns the hook's callback.
    pub fn callback(&self) -> &HookFn {
        &self.callback
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("key", &self.key)
            .field("plugin", &self.plugin.id())
            .field("stage", &self.stage)
            .field("before", &self.before)
            .finish()
    }
}
