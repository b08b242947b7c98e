//! Scoped capability surface handed to a plugin's `apply` entry point.
//!
//! One `PluginApi` exists per plugin. It is handed to `apply` and may be
//! captured by closures that call back into the orchestrator later, so it
//! holds only a weak engine reference.
//!
//! Besides the typed methods, [`PluginApi::invoke`] dispatches by name with
//! a fixed lookup priority: registered plugin-methods first, then engine
//! members, then the base api members expressible with a value payload.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use serde_json::Value;

use armature_core::{CoreError, CoreResult};

use crate::declaration::Declaration;
use crate::hook::{Hook, HookFn, HookOpts};
use crate::plugin::{Plugin, PluginKind, PluginMergeOpts};
use crate::pluggable::{ApplyPluginsOpts, LoadState, Pluggable};

/// Payload handed to a registered plugin-method.
#[derive(Clone)]
pub enum MethodPayload {
    /// A bare hook callback.
    Hook(HookFn),
    /// A hook callback with ordering options.
    HookWithOptions {
        /// The callback.
        hook: HookFn,
        /// Ordering stage.
        stage: Option<i32>,
        /// Run-before constraint.
        before: Option<String>,
    },
    /// An arbitrary value.
    Value(Value),
}

impl MethodPayload {
    fn into_value(self, name: &str) -> CoreResult<Value> {
        match self {
            Self::Value(v) => Ok(v),
            _ => Err(CoreError::configuration(format!(
                "plugin api method '{name}' expects a value payload"
            ))),
        }
    }
}

/// A custom plugin-method implementation. Receives the *calling* plugin's
/// api explicitly, so a method installed by one plugin acts on whichever
/// plugin invokes it.
pub type MethodFn = Arc<
    dyn Fn(PluginApi, MethodPayload) -> BoxFuture<'static, CoreResult<Option<Value>>>
        + Send
        + Sync,
>;

/// A named capability installed via `register_method`.
#[derive(Clone)]
pub struct PluginMethod {
    /// The plugin that installed the method.
    pub plugin: Arc<Plugin>,
    /// The implementation; `None` installs the default registration shim.
    pub method: Option<MethodFn>,
}

#[derive(serde::Deserialize)]
struct ApplyPluginsCall {
    key: String,
    #[serde(rename = "type", default)]
    kind: Option<crate::pluggable::ApplyKind>,
    #[serde(rename = "initialValue", default)]
    initial_value: Option<Value>,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(serde::Deserialize)]
struct DescribeCall {
    #[serde(default)]
    key: Option<String>,
}

/// Capability surface for one plugin.
#[derive(Clone)]
pub struct PluginApi {
    engine: Weak<Pluggable>,
    plugin: Arc<Plugin>,
}

impl PluginApi {
    pub(crate) fn new(engine: Weak<Pluggable>, plugin: Arc<Plugin>) -> Self {
        Self { engine, plugin }
    }

    fn engine(&self) -> CoreResult<Arc<Pluggable>> {
        self.engine
            .upgrade()
            .ok_or_else(|| CoreError::state("the orchestrator was dropped"))
    }

    /// The plugin this api is scoped to.
    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    /// The orchestrator's working directory.
    pub fn cwd(&self) -> CoreResult<PathBuf> {
        Ok(self.engine()?.cwd().to_path_buf())
    }

    /// The orchestrator's current lifecycle state.
    pub fn state(&self) -> CoreResult<LoadState> {
        Ok(self.engine()?.state())
    }

    /// The user configuration fetched during `load()`.
    pub async fn user_config(&self) -> CoreResult<Value> {
        Ok(self.engine()?.user_config().await)
    }

    /// Renames the calling plugin's key and/or supplies its enable gate.
    pub fn describe(&self, opts: PluginMergeOpts) {
        self.plugin.merge(opts);
    }

    /// Registers a hook under `key`, tagged with the calling plugin.
    pub async fn register(&self, key: &str, callback: HookFn, opts: HookOpts) -> CoreResult<()> {
        let engine = self.engine()?;
        let hook = Hook::new(self.plugin.clone(), key, callback, opts)?;
        engine.add_hook(hook).await;
        Ok(())
    }

    /// Installs a named capability reachable through [`PluginApi::invoke`].
    ///
    /// With `method` absent, a default shim is installed that forwards the
    /// payload to the *calling* plugin's `register` under the method name —
    /// sugar for ad-hoc registration verbs.
    pub async fn register_method(&self, name: &str, method: Option<MethodFn>) -> CoreResult<()> {
        let engine = self.engine()?;
        engine
            .insert_plugin_method(
                name,
                PluginMethod {
                    plugin: self.plugin.clone(),
                    method,
                },
            )
            .await
    }

    /// Queues further presets ahead of the ones already waiting.
    ///
    /// Legal only while presets are being initialized.
    pub async fn register_presets(&self, declarations: Vec<Declaration>) -> CoreResult<()> {
        let engine = self.engine()?;
        let state = engine.state();
        if state != LoadState::InitPresets {
            return Err(CoreError::state(format!(
                "presets may only be registered while presets initialize (state: {state})"
            )));
        }
        let resolved = Plugin::resolve_plugins(
            &declarations,
            PluginKind::Preset,
            engine.cwd(),
            engine.loader().as_ref(),
        )?;
        engine.enqueue_presets_front(resolved).await;
        Ok(())
    }

    /// Queues further plugins.
    ///
    /// While presets initialize, registered plugins are parked after the
    /// current preset pass; while plugins initialize they are processed
    /// next. Illegal in any other state.
    pub async fn register_plugins(&self, declarations: Vec<Declaration>) -> CoreResult<()> {
        let engine = self.engine()?;
        let state = engine.state();
        if !matches!(state, LoadState::InitPresets | LoadState::InitPlugins) {
            return Err(CoreError::state(format!(
                "plugins may only be registered while presets or plugins initialize (state: {state})"
            )));
        }
        let resolved = Plugin::resolve_plugins(
            &declarations,
            PluginKind::Plugin,
            engine.cwd(),
            engine.loader().as_ref(),
        )?;
        match state {
            LoadState::InitPresets => engine.accumulate_plugins(resolved).await,
            _ => engine.enqueue_plugins_front(resolved).await,
        }
        Ok(())
    }

    /// Excludes other plugins (by key) from all hook composition.
    ///
    /// Skipping the calling plugin itself is a state error; an unknown key
    /// is a configuration error.
    pub async fn skip_plugins(&self, keys: &[String]) -> CoreResult<()> {
        let engine = self.engine()?;
        let own_key = self.plugin.key();
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            if *key == own_key {
                return Err(CoreError::state(format!(
                    "plugin '{own_key}' must not skip itself"
                )));
            }
            let target = engine.plugin_by_key(key).await.ok_or_else(|| {
                CoreError::configuration(format!("unknown plugin key '{key}'"))
            })?;
            ids.push(target.id().to_string());
        }
        engine.skip_plugin_ids(&self.plugin, ids).await;
        Ok(())
    }

    /// Runs the hook composition for `key` (engine member, bound here for
    /// hook callbacks that re-enter the orchestrator).
    pub async fn apply_plugins(
        &self,
        key: &str,
        opts: ApplyPluginsOpts,
    ) -> CoreResult<Option<Value>> {
        self.engine()?.apply_plugins(key, opts).await
    }

    /// Whether the plugin registered under `key` participates in hook
    /// composition.
    pub async fn is_plugin_enabled(&self, key: &str) -> CoreResult<bool> {
        self.engine()?.is_plugin_enabled(key).await
    }

    /// Dispatches a named capability with a fixed lookup priority:
    /// (1) registered plugin-methods, (2) engine members, (3) base api
    /// members expressible with a value payload. Unknown names are a
    /// configuration error.
    pub async fn invoke(&self, name: &str, payload: MethodPayload) -> CoreResult<Option<Value>> {
        let engine = self.engine()?;

        // Tier 1: registered plugin-methods.
        if let Some(entry) = engine.plugin_method(name).await {
            return match entry.method {
                Some(method) => method(self.clone(), payload).await,
                // Default shim: forward to the *calling* plugin's register.
                None => match payload {
                    MethodPayload::Hook(hook) => {
                        self.register(name, hook, HookOpts::default()).await?;
                        Ok(None)
                    }
                    MethodPayload::HookWithOptions {
                        hook,
                        stage,
                        before,
                    } => {
                        self.register(
                            name,
                            hook,
                            HookOpts {
                                stage: stage.unwrap_or(0),
                                before,
                            },
                        )
                        .await?;
                        Ok(None)
                    }
                    MethodPayload::Value(value) => Err(CoreError::configuration(format!(
                        "plugin method '{name}' expects a hook callback, got {value}"
                    ))),
                },
            };
        }

        // Tier 2: engine members exposed to plugins.
        match name {
            "applyPlugins" => {
                let call: ApplyPluginsCall =
                    serde_json::from_value(payload.into_value(name)?)?;
                return engine
                    .apply_plugins(
                        &call.key,
                        ApplyPluginsOpts {
                            kind: call.kind,
                            initial_value: call.initial_value,
                            args: call.args,
                        },
                    )
                    .await;
            }
            "cwd" => {
                return Ok(Some(Value::String(
                    engine.cwd().to_string_lossy().into_owned(),
                )))
            }
            "state" => return Ok(Some(Value::String(engine.state().to_string()))),
            "userConfig" => return Ok(Some(engine.user_config().await)),
            "isPluginEnable" => {
                let key = payload.into_value(name)?;
                let key = key.as_str().ok_or_else(|| {
                    CoreError::configuration("isPluginEnable expects a plugin key string")
                })?;
                return Ok(Some(Value::Bool(engine.is_plugin_enabled(key).await?)));
            }
            _ => {}
        }

        // Tier 3: base api members expressible with a value payload.
        match name {
            "describe" => {
                let call: DescribeCall = serde_json::from_value(payload.into_value(name)?)?;
                self.describe(PluginMergeOpts {
                    key: call.key,
                    enable: None,
                });
                Ok(None)
            }
            "skipPlugins" => {
                let keys: Vec<String> = serde_json::from_value(payload.into_value(name)?)?;
                self.skip_plugins(&keys).await?;
                Ok(None)
            }
            _ => Err(CoreError::configuration(format!(
                "unknown plugin api method '{name}'"
            ))),
        }
    }
}

impl std::fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginApi")
            .field("plugin", &self.plugin.id())
            .finish()
    }
}
