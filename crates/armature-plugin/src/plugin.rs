//! Plugin records — identity, lazy module loading, config, timing.
//!
//! A `Plugin` is one resolved preset/plugin. Its `id` is the
//! duplicate-registration identity derived from where the module lives; its
//! `key` is the capability-lookup identity, renameable by the plugin itself
//! through `merge`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use armature_core::{paths, text, CoreError, CoreResult};

use crate::declaration::{Declaration, PluginStub};
use crate::loader::{ApplyFn, ModuleExport, ModuleLoader, MODULE_EXTENSIONS};
use crate::manifest::{LocatedManifest, PackageManifest};

/// The framework's own package scope, kept verbatim by
/// [`Plugin::strip_none_scope`] so first-party plugins retain a stable
/// namespaced key.
pub const FRAMEWORK_SCOPE: &str = "@armature";

/// Whether a module participates as a preset or an ordinary plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// May yield further presets/plugins from `apply`.
    Preset,
    /// Contributes hooks and methods; must not yield further modules.
    Plugin,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preset => write!(f, "preset"),
            Self::Plugin => write!(f, "plugin"),
        }
    }
}

/// Zero-argument gate deciding whether a plugin participates in hook
/// composition.
pub type EnablePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Wall-clock timings recorded by the engine for one plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginTiming {
    /// Duration of the plugin's own `apply` invocation.
    pub register: Option<Duration>,
    /// Per-invocation durations of every hook the plugin contributed,
    /// keyed by hook key.
    pub hooks: HashMap<String, Vec<Duration>>,
}

/// Identity/gating overrides applied through `PluginApi::describe`.
#[derive(Clone, Default)]
pub struct PluginMergeOpts {
    /// New capability-lookup key.
    pub key: Option<String>,
    /// Enable predicate supplied by the plugin itself.
    pub enable: Option<EnablePredicate>,
}

/// One resolved preset/plugin.
pub struct Plugin {
    kind: PluginKind,
    path: PathBuf,
    id: String,
    key: RwLock<String>,
    enable: RwLock<Option<EnablePredicate>>,
    config: RwLock<Value>,
    time: Mutex<PluginTiming>,
    inline: Option<ApplyFn>,
}

impl Plugin {
    /// Resolves identity for the module at `path` (which must exist).
    pub fn new(path: &Path, kind: PluginKind, cwd: &Path) -> CoreResult<Self> {
        let cwd = paths::normalize(cwd);
        let path = paths::absolutize(path, &cwd);
        if !path.exists() {
            return Err(CoreError::configuration(format!(
                "{kind} module '{}' does not exist",
                path.display()
            )));
        }

        let located = match path.parent() {
            Some(parent) => PackageManifest::find_ancestor(parent)?,
            None => None,
        };
        let is_entry = located
            .as_ref()
            .and_then(|l| l.manifest.entry_path(&l.dir))
            .map(|entry| entry == path)
            .unwrap_or(false);

        let id = Self::derive_id(&path, &cwd, located.as_ref(), is_entry);
        let key = Self::derive_key(&path, located.as_ref(), is_entry)?;

        Ok(Self {
            kind,
            path,
            id,
            key: RwLock::new(key),
            enable: RwLock::new(None),
            config: RwLock::new(Value::Null),
            time: Mutex::new(PluginTiming::default()),
            inline: None,
        })
    }

    /// Builds a plugin from an in-memory stub (no file resolution).
    ///
    /// The stub must carry a non-empty `id` and `key`; `apply` defaults to
    /// a no-op and `config` to an empty value.
    pub fn from_stub(stub: PluginStub) -> CoreResult<Self> {
        if stub.id.is_empty() || stub.key.is_empty() {
            return Err(CoreError::configuration(
                "an in-memory plugin must carry both an id and a key",
            ));
        }
        let apply: ApplyFn = stub
            .apply
            .unwrap_or_else(|| Arc::new(|_, _| Box::pin(async { Ok(None) })));
        Ok(Self {
            kind: PluginKind::Plugin,
            path: PathBuf::new(),
            id: stub.id,
            key: RwLock::new(stub.key),
            enable: RwLock::new(stub.enable),
            config: RwLock::new(stub.config.unwrap_or(Value::Null)),
            time: Mutex::new(PluginTiming::default()),
            inline: Some(apply),
        })
    }

    /// The plugin's kind.
    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// The normalized module path (empty for in-memory plugins).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The duplicate-registration identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current capability-lookup key.
    pub fn key(&self) -> String {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The plugin's static config (captured on first `apply`).
    pub fn config(&self) -> Value {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The plugin's enable predicate, when one was supplied.
    pub fn enable_predicate(&self) -> Option<EnablePredicate> {
        self.enable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the timings recorded so far.
    pub fn timing(&self) -> PluginTiming {
        self.time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// In-place identity/gating override (used by `PluginApi::describe`).
    pub fn merge(&self, opts: PluginMergeOpts) {
        if let Some(key) = opts.key {
            *self.key.write().unwrap_or_else(PoisonError::into_inner) = key;
        }
        if let Some(enable) = opts.enable {
            *self.enable.write().unwrap_or_else(PoisonError::into_inner) = Some(enable);
        }
    }

    /// Loads the module and returns its `apply` entry point.
    ///
    /// A static `config` export is captured onto the plugin. A module whose
    /// entry is not callable is a configuration error naming the path and
    /// the value received. Re-entrant; each call may re-load.
    pub fn apply(&self, loader: &dyn ModuleLoader) -> CoreResult<ApplyFn> {
        if let Some(inline) = &self.inline {
            return Ok(inline.clone());
        }

        let module = loader.load(&self.path)?;
        if let Some(config) = module.config {
            *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        }
        match module.export {
            ModuleExport::Apply(apply) => Ok(apply),
            ModuleExport::Value(value) => Err(CoreError::configuration(format!(
                "{} module '{}' must export a callable apply entry, got {value}",
                self.kind,
                self.path.display()
            ))),
        }
    }

    pub(crate) fn record_register(&self, elapsed: Duration) {
        self.time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register = Some(elapsed);
    }

    pub(crate) fn record_hook(&self, key: &str, elapsed: Duration) {
        self.time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hooks
            .entry(key.to_string())
            .or_default()
            .push(elapsed);
    }

    /// Removes an `@scope/` prefix from a package name, except when the
    /// scope is the framework's own, which is kept verbatim.
    pub fn strip_none_scope(name: &str) -> String {
        if let Some(rest) = name.strip_prefix('@') {
            if let Some((scope, pkg)) = rest.split_once('/') {
                let framework = FRAMEWORK_SCOPE.trim_start_matches('@');
                if scope == framework {
                    return name.to_string();
                }
                return pkg.to_string();
            }
        }
        name.to_string()
    }

    fn derive_id(
        path: &Path,
        cwd: &Path,
        located: Option<&LocatedManifest>,
        is_entry: bool,
    ) -> String {
        let raw = if is_entry {
            located
                .map(|l| l.manifest.name.clone())
                .unwrap_or_else(|| path.display().to_string())
        } else if let Some(rel) = paths::relative_slash(cwd, path) {
            format!("./{rel}")
        } else if let Some(loc) = located {
            match paths::relative_slash(&loc.dir, path) {
                Some(rel) => format!("{}/{}", loc.manifest.name, rel),
                None => path.display().to_string(),
            }
        } else {
            path.display().to_string()
        };
        Self::strip_module_extension(&raw)
    }

    fn derive_key(
        path: &Path,
        located: Option<&LocatedManifest>,
        is_entry: bool,
    ) -> CoreResult<String> {
        if is_entry {
            if let Some(loc) = located {
                return Ok(Self::strip_none_scope(&loc.manifest.name));
            }
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        // The generic `index` stem carries no identity; disambiguate with a
        // content hash.
        if stem == "index" {
            let bytes = std::fs::read(path)?;
            let digest = format!("{:x}", Sha256::digest(&bytes));
            return Ok(format!("index.{}", &digest[..8]));
        }

        Ok(text::to_camel_case(&stem))
    }

    fn strip_module_extension(id: &str) -> String {
        for ext in MODULE_EXTENSIONS {
            if let Some(stripped) = id.strip_suffix(&format!(".{ext}")) {
                return stripped.to_string();
            }
        }
        id.to_string()
    }

    /// Resolves declarations into `(plugin, declared-config)` tuples.
    ///
    /// Empty-string specifiers are dropped silently, groups are flattened,
    /// and resolution failures name the offending declaration. Stub
    /// instances are only accepted for plugin-kind resolution.
    pub fn resolve_plugins(
        declarations: &[Declaration],
        kind: PluginKind,
        cwd: &Path,
        loader: &dyn ModuleLoader,
    ) -> CoreResult<Vec<(Arc<Plugin>, Option<Value>)>> {
        let mut resolved = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            match declaration {
                Declaration::Specifier(s) => {
                    if s.is_empty() {
                        continue;
                    }
                    let path = loader.resolve(s, cwd)?;
                    resolved.push((Arc::new(Self::new(&path, kind, cwd)?), None));
                }
                Declaration::WithConfig(s, config) => {
                    if s.is_empty() {
                        continue;
                    }
                    let path = loader.resolve(s, cwd)?;
                    resolved.push((
                        Arc::new(Self::new(&path, kind, cwd)?),
                        Some(config.clone()),
                    ));
                }
                Declaration::Group(specifiers) => {
                    for s in specifiers {
                        if s.is_empty() {
                            continue;
                        }
                        let path = loader.resolve(s, cwd)?;
                        resolved.push((Arc::new(Self::new(&path, kind, cwd)?), None));
                    }
                }
                Declaration::Instance(stub) => {
                    if kind == PluginKind::Preset {
                        return Err(CoreError::configuration(
                            "preset declarations must be module specifiers",
                        ));
                    }
                    resolved.push((Arc::new(Self::from_stub(stub.clone())?), None));
                }
            }
        }
        Ok(resolved)
    }

    /// Resolves both declaration lists, returning `None` for an absent or
    /// empty list.
    #[allow(clippy::type_complexity)]
    pub fn presets_and_plugins(
        cwd: &Path,
        loader: &dyn ModuleLoader,
        presets: Option<&[Declaration]>,
        plugins: Option<&[Declaration]>,
    ) -> CoreResult<(
        Option<Vec<(Arc<Plugin>, Option<Value>)>>,
        Option<Vec<(Arc<Plugin>, Option<Value>)>>,
    )> {
        let resolve = |decls: Option<&[Declaration]>, kind| -> CoreResult<Option<Vec<_>>> {
            match decls {
                None => Ok(None),
                Some([]) => Ok(None),
                Some(list) => Ok(Some(Self::resolve_plugins(list, kind, cwd, loader)?)),
            }
        };
        Ok((
            resolve(presets, PluginKind::Preset)?,
            resolve(plugins, PluginKind::Plugin)?,
        ))
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("key", &self.key())
            .field("path", &self.path)
            .finish()
    }
}
