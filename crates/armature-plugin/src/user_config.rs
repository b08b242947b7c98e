//! User configuration boundary.
//!
//! The orchestrator consumes user configuration behind an opaque async
//! provider: whatever it returns is treated purely as additional
//! preset/plugin declarations plus arbitrary host config. The default
//! provider reads the first matching `cwd/<file>.<ext>` through the
//! `config` crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use armature_core::{CoreError, CoreResult};

use crate::declaration::Declaration;

/// Extensions probed by [`FileConfigProvider`] when none are configured.
pub const DEFAULT_CONFIG_EXTS: &[&str] = &["toml", "json", "yaml"];

/// User configuration split into declarations and everything else.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    /// Presets declared in the config file.
    pub presets: Vec<Declaration>,
    /// Plugins declared in the config file.
    pub plugins: Vec<Declaration>,
    /// The remaining host configuration, untouched by the engine.
    pub extra: Value,
}

/// Async producer of user configuration.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Fetches the user configuration.
    async fn get_config(&self) -> CoreResult<UserConfig>;
}

/// Provider returning an empty configuration, for embedded hosts.
#[derive(Debug, Default)]
pub struct NullConfigProvider;

#[async_trait]
impl ConfigProvider for NullConfigProvider {
    async fn get_config(&self) -> CoreResult<UserConfig> {
        Ok(UserConfig::default())
    }
}

/// File-backed provider probing `cwd/<file>.<ext>` combinations in order;
/// the first existing file wins, no file yields an empty configuration.
#[derive(Debug)]
pub struct FileConfigProvider {
    cwd: PathBuf,
    files: Vec<String>,
    exts: Vec<String>,
}

impl FileConfigProvider {
    /// Creates a provider. Empty `exts` fall back to
    /// [`DEFAULT_CONFIG_EXTS`].
    pub fn new(cwd: PathBuf, files: Vec<String>, exts: Vec<String>) -> Self {
        let exts = if exts.is_empty() {
            DEFAULT_CONFIG_EXTS.iter().map(|e| (*e).to_string()).collect()
        } else {
            exts
        };
        Self { cwd, files, exts }
    }

    fn parse(path: &Path) -> CoreResult<UserConfig> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        let mut value: Value = settings.try_deserialize()?;

        let mut user = UserConfig::default();
        if let Value::Object(map) = &mut value {
            if let Some(presets) = map.remove("presets") {
                user.presets = parse_declarations("presets", &presets)?;
            }
            if let Some(plugins) = map.remove("plugins") {
                user.plugins = parse_declarations("plugins", &plugins)?;
            }
        }
        user.extra = value;

        tracing::debug!(path = %path.display(), "User configuration loaded");
        Ok(user)
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn get_config(&self) -> CoreResult<UserConfig> {
        for file in &self.files {
            for ext in &self.exts {
                let path = self.cwd.join(format!("{file}.{ext}"));
                if path.is_file() {
                    return Self::parse(&path);
                }
            }
        }
        Ok(UserConfig::default())
    }
}

fn parse_declarations(field: &str, value: &Value) -> CoreResult<Vec<Declaration>> {
    match value {
        Value::Array(items) => items.iter().map(Declaration::from_value).collect(),
        other => Err(CoreError::configuration(format!(
            "'{field}' must be an array of plugin declarations, got {other}"
        ))),
    }
}
