//! # armature-plugin
//!
//! Plugin/preset orchestration engine. Provides:
//!
//! - Plugin identity and declaration resolution
//! - A staged lifecycle state machine (presets drain before plugins)
//! - A hook registry with stage + run-before ordering
//! - Four typed hook compositions: event, getter, modifier, accumulator
//! - A scoped capability surface handed to each plugin's `apply`
//! - Pluggable module loading (in-memory registry, optional `libloading`)

pub mod api;
pub mod declaration;
pub mod hook;
pub mod loader;
pub mod manifest;
pub mod pluggable;
pub mod plugin;
pub mod user_config;

pub use api::{MethodFn, MethodPayload, PluginApi, PluginMethod};
pub use declaration::{Declaration, PluginStub};
pub use hook::{Hook, HookContext, HookFn, HookOpts};
pub use loader::{ApplyFn, LoadedModule, ModuleExport, ModuleLoader, PluginOutput, RegistryLoader};
pub use manifest::{LocatedManifest, PackageManifest};
pub use pluggable::{ApplyKind, ApplyPluginsOpts, LoadState, Pluggable, PluggableOpts};
pub use plugin::{
    EnablePredicate, Plugin, PluginKind, PluginMergeOpts, PluginTiming, FRAMEWORK_SCOPE,
};
pub use user_config::{ConfigProvider, FileConfigProvider, NullConfigProvider, UserConfig};

#[cfg(feature = "dynamic")]
pub use loader::DynamicLoader;
