use crate::CoreError;
use ocirootfs_schema::Platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the default config file location.
pub const CONFIG_ENV: &str = "OCIROOTFS_CONFIG";

/// Defaults applied when a caller does not pass them explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// `os[/arch[/variant]]` or `host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl LoaderConfig {
    /// Load `$OCIROOTFS_CONFIG`, or `~/.config/ocirootfs/config.json`.
    /// A missing file yields the default config.
    pub fn load_default() -> Result<Self, CoreError> {
        let path = default_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            CoreError::Config(format!("invalid config {}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configured platform, with `host` expanded.
    pub fn platform(&self) -> Result<Option<Platform>, CoreError> {
        self.platform.as_deref().map(parse_platform).transpose()
    }

    /// Fill every unset field from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            scratch_dir: self.scratch_dir.or(fallback.scratch_dir),
            platform: self.platform.or(fallback.platform),
            reference: self.reference.or(fallback.reference),
        }
    }
}

/// Parse a platform argument; `host` means the running platform.
pub fn parse_platform(value: &str) -> Result<Platform, CoreError> {
    if value.eq_ignore_ascii_case("host") {
        return Ok(Platform::host());
    }
    Platform::parse(value).map_err(|e| CoreError::Config(e.to_string()))
}

pub fn default_config_path() -> Result<PathBuf, CoreError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home =
        std::env::var_os("HOME").ok_or_else(|| CoreError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/ocirootfs/config.json"))
}
