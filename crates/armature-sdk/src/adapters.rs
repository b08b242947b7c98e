//! Adapters lifting plain async closures into the engine's callback types.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use armature_core::CoreResult;
use armature_plugin::api::{MethodPayload, PluginApi};
use armature_plugin::hook::HookContext;
use armature_plugin::loader::{ApplyFn, LoadedModule, PluginOutput, RegistryLoader};
use armature_plugin::plugin::EnablePredicate;

/// Lifts an async closure into an `apply` entry point.
pub fn apply_fn<F, Fut>(f: F) -> ApplyFn
where
    F: Fn(PluginApi, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<Option<PluginOutput>>> + Send + 'static,
{
    Arc::new(move |api, config| Box::pin(f(api, config)))
}

/// Lifts an async closure into a hook callback.
pub fn hook_fn<F, Fut>(f: F) -> armature_plugin::hook::HookFn
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<Option<Value>>> + Send + 'static,
{
    Arc::new(move |context| Box::pin(f(context)))
}

/// Lifts an async closure into a plugin-method implementation.
pub fn method_fn<F, Fut>(f: F) -> armature_plugin::api::MethodFn
where
    F: Fn(PluginApi, MethodPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<Option<Value>>> + Send + 'static,
{
    Arc::new(move |api, payload| Box::pin(f(api, payload)))
}

/// Lifts a closure into an enable predicate.
pub fn enable_fn<F>(f: F) -> EnablePredicate
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Builder for in-process plugin modules.
pub struct ModuleBuilder {
    module: LoadedModule,
}

impl ModuleBuilder {
    /// Starts a module from its `apply` entry point.
    pub fn new(apply: ApplyFn) -> Self {
        Self {
            module: LoadedModule::from_apply(apply),
        }
    }

    /// Attaches a static config export.
    pub fn config(mut self, config: Value) -> Self {
        self.module = self.module.with_config(config);
        self
    }

    /// Finishes the module.
    pub fn build(self) -> LoadedModule {
        self.module
    }

    /// Registers the module with a [`RegistryLoader`] under `path`.
    pub fn register(self, loader: &RegistryLoader, path: impl Into<PathBuf>) {
        loader.register_module(path, self.module);
    }
}
