//! Module loading capability.
//!
//! The engine never loads plugin code directly; it goes through a
//! [`ModuleLoader`] injected at construction. A loaded module is one
//! callable `apply` entry point plus an optional static config value.
//!
//! Two implementations ship with the engine:
//!
//! - [`RegistryLoader`] — an in-memory registry of module factories keyed by
//!   path, for hosts that compile their plugins in (and for tests).
//! - `DynamicLoader` — shared-library loading via `libloading`, behind the
//!   `dynamic` feature.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use armature_core::{paths, CoreError, CoreResult};

use crate::api::PluginApi;
use crate::declaration::Declaration;
use crate::manifest::{PackageManifest, MANIFEST_FILE};

/// Module extensions tried during resolution and stripped from plugin ids.
pub const MODULE_EXTENSIONS: &[&str] = &["so", "dylib", "dll", "wasm"];

/// Declarations yielded by a preset's `apply` entry point.
#[derive(Clone, Default)]
pub struct PluginOutput {
    /// Further presets to process ahead of already-queued ones.
    pub presets: Vec<Declaration>,
    /// Further plugins to process.
    pub plugins: Vec<Declaration>,
}

impl PluginOutput {
    /// Creates an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds presets to the output.
    pub fn with_presets(mut self, presets: Vec<Declaration>) -> Self {
        self.presets = presets;
        self
    }

    /// Adds plugins to the output.
    pub fn with_plugins(mut self, plugins: Vec<Declaration>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Returns whether the output yields nothing.
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty() && self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginOutput")
            .field("presets", &self.presets.len())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

/// A module's `apply` entry point.
///
/// Receives the calling plugin's scoped api and the per-declaration config
/// (`Value::Null` when none was declared).
pub type ApplyFn = Arc<
    dyn Fn(PluginApi, Value) -> BoxFuture<'static, CoreResult<Option<PluginOutput>>> + Send + Sync,
>;

/// What a module exports as its entry.
#[derive(Clone)]
pub enum ModuleExport {
    /// A callable `apply` entry point.
    Apply(ApplyFn),
    /// A non-callable value; rejected when the plugin is applied.
    Value(Value),
}

impl fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply(_) => f.write_str("ModuleExport::Apply"),
            Self::Value(v) => write!(f, "ModuleExport::Value({v})"),
        }
    }
}

/// A loaded plugin module.
#[derive(Clone, Debug)]
pub struct LoadedModule {
    /// The module's entry export.
    pub export: ModuleExport,
    /// Optional static config exported alongside the entry.
    pub config: Option<Value>,
}

impl LoadedModule {
    /// Creates a module from an `apply` entry point.
    pub fn from_apply(apply: ApplyFn) -> Self {
        Self {
            export: ModuleExport::Apply(apply),
            config: None,
        }
    }

    /// Attaches a static config export.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// Capability for resolving declarations to paths and loading modules.
pub trait ModuleLoader: Send + Sync {
    /// Resolves a declaration specifier to a module path, rooted at `cwd`.
    fn resolve(&self, specifier: &str, cwd: &Path) -> CoreResult<PathBuf>;

    /// Loads the module at `path`.
    fn load(&self, path: &Path) -> CoreResult<LoadedModule>;
}

/// Factory producing a fresh [`LoadedModule`] per load.
pub type ModuleFactory = Arc<dyn Fn() -> LoadedModule + Send + Sync>;

/// Builds the ordered list of path candidates for a specifier: the bare
/// path first, then one candidate per extension.
fn candidate_paths(specifier: &str, cwd: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let base = paths::absolutize(Path::new(specifier), cwd);
    let mut candidates = vec![base.clone()];
    for ext in extensions {
        candidates.push(PathBuf::from(format!("{}.{}", base.display(), ext)));
    }
    candidates
}

/// Expands a package directory to its declared entry module, when `path` is
/// a directory carrying a `package.toml` with a `main` field.
fn expand_package_dir(path: &Path) -> CoreResult<Option<PathBuf>> {
    if !path.is_dir() || !path.join(MANIFEST_FILE).is_file() {
        return Ok(None);
    }
    let manifest = PackageManifest::load(&path.join(MANIFEST_FILE))?;
    Ok(manifest.entry_path(path))
}

/// In-memory module registry, the build-time plugin registry rendition of
/// the loader capability.
///
/// Hosts register a factory per module path; resolution checks registered
/// paths and the filesystem, trying candidate extensions in order and
/// following `package.toml` entry declarations for package directories.
pub struct RegistryLoader {
    modules: dashmap::DashMap<PathBuf, ModuleFactory>,
    extensions: Vec<String>,
}

impl RegistryLoader {
    /// Creates a registry loader with the default extension candidates.
    pub fn new() -> Self {
        Self::with_extensions(
            MODULE_EXTENSIONS
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
        )
    }

    /// Creates a registry loader with custom extension candidates.
    pub fn with_extensions(extensions: Vec<String>) -> Self {
        Self {
            modules: dashmap::DashMap::new(),
            extensions,
        }
    }

    /// Registers a module factory under a path.
    pub fn register(&self, path: impl Into<PathBuf>, factory: ModuleFactory) {
        let path = paths::normalize(&path.into());
        tracing::debug!(path = %path.display(), "Module factory registered");
        self.modules.insert(path, factory);
    }

    /// Registers a fixed module under a path.
    pub fn register_module(&self, path: impl Into<PathBuf>, module: LoadedModule) {
        self.register(path, Arc::new(move || module.clone()));
    }

    fn accepts(&self, candidate: &Path) -> bool {
        self.modules.contains_key(candidate) || candidate.is_file()
    }
}

impl Default for RegistryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for RegistryLoader {
    fn resolve(&self, specifier: &str, cwd: &Path) -> CoreResult<PathBuf> {
        for candidate in candidate_paths(specifier, cwd, &self.extensions) {
            if let Some(entry) = expand_package_dir(&candidate)? {
                if self.accepts(&entry) {
                    return Ok(entry);
                }
            }
            if self.accepts(&candidate) {
                return Ok(candidate);
            }
        }
        Err(CoreError::configuration(format!(
            "unable to resolve plugin declaration '{specifier}' from '{}'",
            cwd.display()
        )))
    }

    fn load(&self, path: &Path) -> CoreResult<LoadedModule> {
        let path = paths::normalize(path);
        let factory = self
            .modules
            .get(&path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "no module registered for path '{}'",
                    path.display()
                ))
            })?;
        Ok(factory())
    }
}

impl fmt::Debug for RegistryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryLoader")
            .field("registered", &self.modules.len())
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// Shared-library module loader (feature-gated).
#[cfg(feature = "dynamic")]
pub mod dynamic_loader {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use armature_core::{paths, CoreError, CoreResult};

    use super::{candidate_paths, expand_package_dir, LoadedModule, ModuleLoader};

    /// Type of the module creation function exported by dynamic modules.
    ///
    /// Dynamic modules must export:
    /// `extern "C" fn armature_create_module() -> *mut LoadedModule`
    pub type CreateModuleFn = unsafe extern "C" fn() -> *mut LoadedModule;

    /// Loads plugin modules from shared libraries (.so / .dll / .dylib).
    pub struct DynamicLoader {
        /// Loaded libraries (kept alive for the lifetime of the loader).
        libraries: Mutex<Vec<libloading::Library>>,
        extensions: Vec<String>,
    }

    impl DynamicLoader {
        /// Creates a new dynamic loader.
        pub fn new() -> Self {
            Self {
                libraries: Mutex::new(Vec::new()),
                extensions: super::MODULE_EXTENSIONS
                    .iter()
                    .map(|e| (*e).to_string())
                    .collect(),
            }
        }
    }

    impl Default for DynamicLoader {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ModuleLoader for DynamicLoader {
        fn resolve(&self, specifier: &str, cwd: &Path) -> CoreResult<PathBuf> {
            for candidate in candidate_paths(specifier, cwd, &self.extensions) {
                if let Some(entry) = expand_package_dir(&candidate)? {
                    if entry.is_file() {
                        return Ok(entry);
                    }
                }
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
            Err(CoreError::configuration(format!(
                "unable to resolve plugin declaration '{specifier}' from '{}'",
                cwd.display()
            )))
        }

        /// # Safety
        ///
        /// Loads and runs arbitrary code from a shared library. Only load
        /// trusted modules.
        fn load(&self, path: &Path) -> CoreResult<LoadedModule> {
            let path = paths::normalize(path);
            unsafe {
                let lib = libloading::Library::new(&path).map_err(|e| {
                    CoreError::configuration(format!(
                        "failed to load module library '{}': {}",
                        path.display(),
                        e
                    ))
                })?;

                let create: libloading::Symbol<CreateModuleFn> =
                    lib.get(b"armature_create_module").map_err(|e| {
                        CoreError::configuration(format!(
                            "module '{}' missing 'armature_create_module' symbol: {}",
                            path.display(),
                            e
                        ))
                    })?;

                let module = Box::from_raw(create());

                tracing::info!(path = %path.display(), "Dynamic module loaded");

                self.libraries
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(lib);

                Ok(*module)
            }
        }
    }

    impl std::fmt::Debug for DynamicLoader {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("DynamicLoader")
                .field(
                    "loaded_count",
                    &self
                        .libraries
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .len(),
                )
                .finish()
        }
    }
}

#[cfg(feature = "dynamic")]
pub use dynamic_loader::DynamicLoader;
