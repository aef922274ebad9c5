//! Layered configuration for the image store.
//!
//! Sources are merged in order, later ones overriding earlier ones:
//!
//! 1. `<user config dir>/imgstore/config.toml`, when it exists;
//! 2. an explicit file (TOML, YAML or JSON, chosen by extension);
//! 3. `IMGSTORE_*` environment variables, nested with `__`
//!    (`IMGSTORE_STORAGE__PRIMARY=local`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use imgstore_storage::settings::{FilesystemSettings, FtpSettings, ObjectStorageSettings};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "IMGSTORE_";

fn default_max_width() -> u32 {
    1920
}

fn default_max_height() -> u32 {
    1080
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub drivers: BTreeMap<String, DriverSettings>,
}

/// Orchestrator settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Driver that receives new uploads.
    pub primary: String,
    /// Driver that receives an upload when the primary fails to save it.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Local cache for derivatives served by `fetch`.
    pub cache_dir: PathBuf,
    /// Source image shown when an original is missing. A built-in grey
    /// square is used when unset.
    #[serde(default)]
    pub placeholder: Option<PathBuf>,
    /// Uploads larger than this are downscaled before being stored.
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

/// One `[drivers.<name>]` table, discriminated by its `type` key.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverSettings {
    Filesystem(FilesystemSettings),
    Ftp(FtpSettings),
    ObjectStorage(ObjectStorageSettings),
}

impl DriverSettings {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::Ftp(_) => "ftp",
            Self::ObjectStorage(_) => "object_storage",
        }
    }
}

impl Config {
    /// Load from the default locations, optionally layering an explicit file
    /// on top.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(default) = default_path()
            && default.is_file()
        {
            tracing::debug!(path = %default.display(), "Loading default configuration");
            figment = figment.merge(Toml::file_exact(default));
        }
        if let Some(path) = explicit {
            figment = merge_file(figment, path)?;
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate a configuration from an already assembled
    /// figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;
        if !self.drivers.contains_key(&storage.primary) {
            exn::bail!(ErrorKind::Invalid(format!("primary driver `{}` is not configured", storage.primary)));
        }
        if let Some(fallback) = &storage.fallback {
            if fallback == &storage.primary {
                exn::bail!(ErrorKind::Invalid(format!("fallback driver `{fallback}` is also the primary")));
            }
            if !self.drivers.contains_key(fallback) {
                exn::bail!(ErrorKind::Invalid(format!("fallback driver `{fallback}` is not configured")));
            }
        }
        if storage.max_width == 0 || storage.max_height == 0 {
            exn::bail!(ErrorKind::Invalid("maximum dimensions must be positive".to_string()));
        }
        Ok(())
    }
}

/// `<user config dir>/imgstore/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "imgstore").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
    }
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}
