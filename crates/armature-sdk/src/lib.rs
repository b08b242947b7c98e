//! # armature-sdk
//!
//! SDK for authoring Armature presets and plugins.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use armature_sdk::prelude::*;
//!
//! let module = ModuleBuilder::new(apply_fn(|api, _config| async move {
//!     api.register(
//!         "onRelease",
//!         hook_fn(|_ctx| async { Ok(None) }),
//!         HookOpts::default(),
//!     )
//!     .await?;
//!     Ok(None)
//! }))
//! .config(serde_json::json!({ "defaults": true }))
//! .build();
//! ```

pub mod adapters;

pub use adapters::{apply_fn, enable_fn, hook_fn, method_fn, ModuleBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use armature_core::{CoreError, CoreResult, ErrorKind};
    pub use armature_plugin::api::{MethodFn, MethodPayload, PluginApi};
    pub use armature_plugin::declaration::{Declaration, PluginStub};
    pub use armature_plugin::hook::{HookContext, HookFn, HookOpts};
    pub use armature_plugin::loader::{
        ApplyFn, LoadedModule, ModuleExport, ModuleLoader, PluginOutput, RegistryLoader,
    };
    pub use armature_plugin::pluggable::{
        ApplyKind, ApplyPluginsOpts, LoadState, Pluggable, PluggableOpts,
    };
    pub use armature_plugin::plugin::{EnablePredicate, Plugin, PluginKind, PluginMergeOpts};

    pub use crate::adapters::{apply_fn, enable_fn, hook_fn, method_fn, ModuleBuilder};
}
