//! The orchestrator: staged lifecycle, resolution/registration loop, and
//! the hook-composition engine.
//!
//! A [`Pluggable`] owns every registry (hooks, plugins, keys, skip set,
//! plugin-methods). Registries mutate only during the `Init*` phases; after
//! `Loaded` the only writes are the append-only timing vectors, inside the
//! same sequential hook-invocation path. The host must not issue two
//! concurrent top-level `load`/`apply_plugins` calls on one instance.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use armature_core::{paths, CoreError, CoreResult};

use crate::api::{PluginApi, PluginMethod};
use crate::declaration::Declaration;
use crate::hook::{Hook, HookContext};
use crate::loader::{ModuleLoader, RegistryLoader};
use crate::plugin::{Plugin, PluginKind};
use crate::user_config::{ConfigProvider, FileConfigProvider, NullConfigProvider};

/// Lifecycle states, totally ordered and monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    /// Constructed, `load()` not yet called.
    Uninitialized,
    /// Fetching user configuration and resolving declarations.
    Init,
    /// Draining the preset queue.
    InitPresets,
    /// Draining the plugin queue.
    InitPlugins,
    /// Registration finished; registries are read-only.
    Loaded,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Init => write!(f, "init"),
            Self::InitPresets => write!(f, "init-presets"),
            Self::InitPlugins => write!(f, "init-plugins"),
            Self::Loaded => write!(f, "loaded"),
        }
    }
}

/// The four hook-composition semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyKind {
    /// Hooks append items onto an array accumulator.
    Add,
    /// Hooks transform a running accumulator.
    Modify,
    /// Hooks run for side effects only.
    Event,
    /// The first defined hook result is observed.
    Get,
}

impl ApplyKind {
    /// Infers the composition kind from a hook key's prefix.
    pub fn infer(key: &str) -> Option<Self> {
        if key.starts_with("on") {
            Some(Self::Event)
        } else if key.starts_with("get") {
            Some(Self::Get)
        } else if key.starts_with("modify") {
            Some(Self::Modify)
        } else if key.starts_with("add") {
            Some(Self::Add)
        } else {
            None
        }
    }
}

/// Options for one hook composition.
#[derive(Clone, Default)]
pub struct ApplyPluginsOpts {
    /// Composition kind; inferred from the key prefix when absent.
    pub kind: Option<ApplyKind>,
    /// Starting accumulator (array for `Add`, anything for `Modify`).
    pub initial_value: Option<Value>,
    /// Arguments handed to every hook.
    pub args: Option<Value>,
}

/// Construction options for [`Pluggable`].
#[derive(Default)]
pub struct PluggableOpts {
    /// Working directory declarations resolve against. Required.
    pub cwd: PathBuf,
    /// Presets declared by the host.
    pub presets: Vec<Declaration>,
    /// Plugins declared by the host.
    pub plugins: Vec<Declaration>,
    /// Module loader; defaults to an empty [`RegistryLoader`].
    pub loader: Option<Arc<dyn ModuleLoader>>,
    /// User-config boundary; defaults to a file provider over
    /// `default_config_files`, or an inert provider when none are given.
    pub config_provider: Option<Arc<dyn ConfigProvider>>,
    /// Config file stems probed by the default provider.
    pub default_config_files: Vec<String>,
    /// Config file extensions probed by the default provider.
    pub default_config_exts: Vec<String>,
}

type ResolvedPlugin = (Arc<Plugin>, Option<Value>);

/// The plugin/preset orchestration engine.
pub struct Pluggable {
    self_ref: Weak<Pluggable>,
    cwd: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    config_provider: Arc<dyn ConfigProvider>,
    declared_presets: Vec<Declaration>,
    declared_plugins: Vec<Declaration>,

    state: std::sync::RwLock<LoadState>,
    user_config: RwLock<Value>,
    hooks: RwLock<HashMap<String, Vec<Arc<Hook>>>>,
    plugins: RwLock<HashMap<String, Arc<Plugin>>>,
    key_to_plugin: RwLock<HashMap<String, Arc<Plugin>>>,
    skipped_plugin_ids: RwLock<HashSet<String>>,
    plugin_methods: RwLock<HashMap<String, PluginMethod>>,

    preset_queue: Mutex<VecDeque<ResolvedPlugin>>,
    plugin_queue: Mutex<VecDeque<ResolvedPlugin>>,
    preset_yielded_plugins: Mutex<Vec<ResolvedPlugin>>,
}

impl Pluggable {
    /// Builds an orchestrator. The working directory must exist.
    pub fn new(opts: PluggableOpts) -> CoreResult<Arc<Self>> {
        let PluggableOpts {
            cwd,
            presets,
            plugins,
            loader,
            config_provider,
            default_config_files,
            default_config_exts,
        } = opts;

        if cwd.as_os_str().is_empty() {
            return Err(CoreError::configuration("a working directory is required"));
        }
        let cwd = paths::normalize(&cwd);
        if !cwd.is_dir() {
            return Err(CoreError::configuration(format!(
                "working directory '{}' does not exist",
                cwd.display()
            )));
        }

        let loader = loader.unwrap_or_else(|| Arc::new(RegistryLoader::new()));
        let config_provider = config_provider.unwrap_or_else(|| {
            if default_config_files.is_empty() {
                Arc::new(NullConfigProvider) as Arc<dyn ConfigProvider>
            } else {
                Arc::new(FileConfigProvider::new(
                    cwd.clone(),
                    default_config_files,
                    default_config_exts,
                ))
            }
        });

        Ok(Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            cwd,
            loader,
            config_provider,
            declared_presets: presets,
            declared_plugins: plugins,
            state: std::sync::RwLock::new(LoadState::Uninitialized),
            user_config: RwLock::new(Value::Null),
            hooks: RwLock::new(HashMap::new()),
            plugins: RwLock::new(HashMap::new()),
            key_to_plugin: RwLock::new(HashMap::new()),
            skipped_plugin_ids: RwLock::new(HashSet::new()),
            plugin_methods: RwLock::new(HashMap::new()),
            preset_queue: Mutex::new(VecDeque::new()),
            plugin_queue: Mutex::new(VecDeque::new()),
            preset_yielded_plugins: Mutex::new(Vec::new()),
        }))
    }

    /// The working directory declarations resolve against.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// The injected module loader.
    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    /// The current lifecycle state.
    pub fn state(&self) -> LoadState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: LoadState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if next > *state {
            tracing::debug!(from = %state, to = %next, "Lifecycle advanced");
            *state = next;
        }
    }

    /// The user configuration fetched during `load()` (minus the
    /// preset/plugin declarations, which are consumed).
    pub async fn user_config(&self) -> Value {
        self.user_config.read().await.clone()
    }

    /// Resolves declarations, drains presets then plugins, and transitions
    /// to `Loaded`. May only be called once.
    pub async fn load(&self) -> CoreResult<()> {
        let state = self.state();
        if state != LoadState::Uninitialized {
            return Err(CoreError::state(format!(
                "load() may only be called once (state: {state})"
            )));
        }
        self.advance(LoadState::Init);

        let user = self.config_provider.get_config().await?;
        *self.user_config.write().await = user.extra;

        let presets: Vec<Declaration> = self
            .declared_presets
            .iter()
            .cloned()
            .chain(user.presets)
            .collect();
        let plugins: Vec<Declaration> = self
            .declared_plugins
            .iter()
            .cloned()
            .chain(user.plugins)
            .collect();

        let (presets, plugins) = Plugin::presets_and_plugins(
            &self.cwd,
            self.loader.as_ref(),
            Some(&presets),
            Some(&plugins),
        )?;

        self.preset_queue
            .lock()
            .await
            .extend(presets.unwrap_or_default());

        self.advance(LoadState::InitPresets);
        loop {
            let next = self.preset_queue.lock().await.pop_front();
            match next {
                Some((preset, config)) => self.init_module(preset, config).await?,
                None => break,
            }
        }

        {
            // Preset-yielded plugins run ahead of the declared ones.
            let yielded = std::mem::take(&mut *self.preset_yielded_plugins.lock().await);
            let mut queue = self.plugin_queue.lock().await;
            queue.extend(yielded);
            queue.extend(plugins.unwrap_or_default());
        }

        self.advance(LoadState::InitPlugins);
        loop {
            let next = self.plugin_queue.lock().await.pop_front();
            match next {
                Some((plugin, config)) => self.init_module(plugin, config).await?,
                None => break,
            }
        }

        self.advance(LoadState::Loaded);
        tracing::info!(
            plugins = self.plugins.read().await.len(),
            hook_keys = self.hooks.read().await.len(),
            "Plugin graph loaded"
        );
        Ok(())
    }

    /// Registers one resolved module and runs its `apply`.
    async fn init_module(&self, plugin: Arc<Plugin>, config: Option<Value>) -> CoreResult<()> {
        {
            // Duplicate ids abort before the second module's apply runs.
            let mut plugins = self.plugins.write().await;
            if plugins.contains_key(plugin.id()) {
                return Err(CoreError::configuration(format!(
                    "{} '{}' is already registered",
                    plugin.kind(),
                    plugin.id()
                )));
            }
            plugins.insert(plugin.id().to_string(), plugin.clone());
        }

        tracing::info!(
            kind = %plugin.kind(),
            id = %plugin.id(),
            "Registering module"
        );

        let apply = plugin.apply(self.loader.as_ref())?;
        let api = self.plugin_api(plugin.clone());

        let start = Instant::now();
        let output = apply(api.clone(), config.unwrap_or(Value::Null)).await?;
        plugin.record_register(start.elapsed());

        {
            // Keys register after apply: a module may rename itself through
            // describe while applying.
            let key = plugin.key();
            let mut key_to_plugin = self.key_to_plugin.write().await;
            if let Some(existing) = key_to_plugin.get(&key) {
                return Err(CoreError::configuration(format!(
                    "plugin key '{key}' is already registered (by '{}')",
                    existing.id()
                )));
            }
            key_to_plugin.insert(key, plugin.clone());
        }

        if let Some(output) = output {
            if plugin.kind() == PluginKind::Plugin && !output.is_empty() {
                return Err(CoreError::configuration(format!(
                    "plugin '{}' must not yield further presets or plugins",
                    plugin.id()
                )));
            }
            if !output.presets.is_empty() {
                api.register_presets(output.presets).await?;
            }
            if !output.plugins.is_empty() {
                api.register_plugins(output.plugins).await?;
            }
        }

        Ok(())
    }

    /// Builds the scoped capability surface for a plugin.
    pub fn plugin_api(&self, plugin: Arc<Plugin>) -> PluginApi {
        PluginApi::new(self.self_ref.clone(), plugin)
    }

    pub(crate) async fn add_hook(&self, hook: Hook) {
        tracing::debug!(
            key = %hook.key,
            plugin = %hook.plugin.key(),
            stage = hook.stage,
            "Hook registered"
        );
        self.hooks
            .write()
            .await
            .entry(hook.key.clone())
            .or_default()
            .push(Arc::new(hook));
    }

    pub(crate) async fn insert_plugin_method(
        &self,
        name: &str,
        method: PluginMethod,
    ) -> CoreResult<()> {
        let mut methods = self.plugin_methods.write().await;
        if let Some(existing) = methods.get(name) {
            return Err(CoreError::state(format!(
                "plugin method '{name}' is already registered by plugin '{}'",
                existing.plugin.key()
            )));
        }
        tracing::debug!(name, plugin = %method.plugin.key(), "Plugin method registered");
        methods.insert(name.to_string(), method);
        Ok(())
    }

    pub(crate) async fn plugin_method(&self, name: &str) -> Option<PluginMethod> {
        self.plugin_methods.read().await.get(name).cloned()
    }

    pub(crate) async fn enqueue_presets_front(&self, resolved: Vec<ResolvedPlugin>) {
        let mut queue = self.preset_queue.lock().await;
        for item in resolved.into_iter().rev() {
            queue.push_front(item);
        }
    }

    pub(crate) async fn accumulate_plugins(&self, resolved: Vec<ResolvedPlugin>) {
        self.preset_yielded_plugins.lock().await.extend(resolved);
    }

    pub(crate) async fn enqueue_plugins_front(&self, resolved: Vec<ResolvedPlugin>) {
        let mut queue = self.plugin_queue.lock().await;
        for item in resolved.into_iter().rev() {
            queue.push_front(item);
        }
    }

    pub(crate) async fn skip_plugin_ids(&self, caller: &Arc<Plugin>, ids: Vec<String>) {
        let mut skipped = self.skipped_plugin_ids.write().await;
        for id in ids {
            tracing::info!(by = %caller.key(), id = %id, "Plugin skipped");
            skipped.insert(id);
        }
    }

    /// Looks up a registered plugin by id.
    pub async fn plugin(&self, id: &str) -> Option<Arc<Plugin>> {
        self.plugins.read().await.get(id).cloned()
    }

    /// Looks up a registered plugin by key.
    pub async fn plugin_by_key(&self, key: &str) -> Option<Arc<Plugin>> {
        self.key_to_plugin.read().await.get(key).cloned()
    }

    /// Whether a plugin is registered under `key`.
    pub async fn has_plugin(&self, key: &str) -> bool {
        self.key_to_plugin.read().await.contains_key(key)
    }

    /// All registered plugins.
    pub async fn plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins.read().await.values().cloned().collect()
    }

    /// All hook keys with at least one registration.
    pub async fn hook_keys(&self) -> Vec<String> {
        self.hooks.read().await.keys().cloned().collect()
    }

    /// Whether the plugin registered under `key` participates in hook
    /// composition. Unknown keys are a configuration error.
    pub async fn is_plugin_enabled(&self, key: &str) -> CoreResult<bool> {
        let plugin = self
            .plugin_by_key(key)
            .await
            .ok_or_else(|| CoreError::configuration(format!("unknown plugin key '{key}'")))?;
        Ok(self.plugin_enabled(&plugin).await)
    }

    /// Enable gate for one plugin: the skip set (by id) takes priority,
    /// then the plugin's own predicate, then the always-enabled default.
    pub async fn plugin_enabled(&self, plugin: &Arc<Plugin>) -> bool {
        if self.skipped_plugin_ids.read().await.contains(plugin.id()) {
            return false;
        }
        match plugin.enable_predicate() {
            Some(predicate) => predicate(),
            None => true,
        }
    }

    /// Runs the hook composition registered under `key`.
    pub async fn apply_plugins(
        &self,
        key: &str,
        opts: ApplyPluginsOpts,
    ) -> CoreResult<Option<Value>> {
        let kind = opts
            .kind
            .or_else(|| ApplyKind::infer(key))
            .ok_or_else(|| {
                CoreError::runtime(format!(
                    "unable to infer a composition kind for hook key '{key}'"
                ))
            })?;

        let registered: Vec<Arc<Hook>> = self
            .hooks
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default();

        let mut hooks = Vec::with_capacity(registered.len());
        for hook in registered {
            if self.plugin_enabled(&hook.plugin).await {
                hooks.push(hook);
            }
        }
        order_hooks(&mut hooks);

        tracing::debug!(key, kind = ?kind, hooks = hooks.len(), "Applying plugins");

        match kind {
            ApplyKind::Add => {
                let mut memo = match opts.initial_value.unwrap_or_else(|| Value::Array(Vec::new()))
                {
                    Value::Array(items) => items,
                    other => {
                        return Err(CoreError::runtime(format!(
                            "'{key}' requires an array initial value, got {other}"
                        )))
                    }
                };
                for hook in &hooks {
                    let produced = self
                        .run_hook(
                            hook,
                            key,
                            HookContext {
                                memo: None,
                                args: opts.args.clone(),
                            },
                        )
                        .await?;
                    match produced {
                        Some(Value::Array(items)) => memo.extend(items),
                        Some(item) => memo.push(item),
                        None => {}
                    }
                }
                Ok(Some(Value::Array(memo)))
            }
            ApplyKind::Modify => {
                let mut memo = opts.initial_value;
                for hook in &hooks {
                    memo = self
                        .run_hook(
                            hook,
                            key,
                            HookContext {
                                memo,
                                args: opts.args.clone(),
                            },
                        )
                        .await?;
                }
                Ok(memo)
            }
            ApplyKind::Get => {
                // Every hook runs; the first defined value is observed.
                let mut result = None;
                for hook in &hooks {
                    let produced = self
                        .run_hook(
                            hook,
                            key,
                            HookContext {
                                memo: None,
                                args: opts.args.clone(),
                            },
                        )
                        .await?;
                    if result.is_none() {
                        result = produced;
                    }
                }
                Ok(result)
            }
            ApplyKind::Event => {
                for hook in &hooks {
                    self.run_hook(
                        hook,
                        key,
                        HookContext {
                            memo: None,
                            args: opts.args.clone(),
                        },
                    )
                    .await?;
                }
                Ok(None)
            }
        }
    }

    async fn run_hook(
        &self,
        hook: &Arc<Hook>,
        key: &str,
        context: HookContext,
    ) -> CoreResult<Option<Value>> {
        let start = Instant::now();
        let result = (hook.callback())(context).await;
        hook.plugin.record_hook(key, start.elapsed());
        result
    }
}

impl fmt::Debug for Pluggable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pluggable")
            .field("cwd", &self.cwd)
            .field("state", &self.state())
            .finish()
    }
}

/// Orders hooks by `stage` (stable, so declaration order breaks ties), then
/// applies `before` constraints: a hook naming a target currently ahead of
/// it is moved to sit immediately before that target. `before` is a hard
/// constraint and may cross stage boundaries.
fn order_hooks(hooks: &mut Vec<Arc<Hook>>) {
    hooks.sort_by_key(|h| h.stage);

    let constrained: Vec<Arc<Hook>> = hooks
        .iter()
        .filter(|h| h.before.is_some())
        .cloned()
        .collect();

    for hook in constrained {
        let Some(before) = hook.before.clone() else {
            continue;
        };
        let Some(position) = hooks.iter().position(|h| Arc::ptr_eq(h, &hook)) else {
            continue;
        };
        let target = hooks
            .iter()
            .position(|h| h.plugin.key() == before && !Arc::ptr_eq(h, &hook));
        if let Some(target) = target {
            if target < position {
                let moved = hooks.remove(position);
                hooks.insert(target, moved);
            }
        }
    }
}
