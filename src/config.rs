use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATABASE_PATH: &str = "CMS_DATABASE_PATH";
pub const ENV_UPLOAD_ROOT: &str = "CMS_UPLOAD_ROOT";
pub const ENV_UPLOAD_PUBLIC_PREFIX: &str = "CMS_UPLOAD_PUBLIC_PREFIX";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CmsConfig {
    pub database_path: PathBuf,
    /// Filesystem base for stored uploads.
    pub upload_root: PathBuf,
    /// Replaces `upload_root` in the paths handed back to clients.
    pub upload_public_prefix: String,
    pub log_dir: PathBuf,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/cms.sqlite"),
            upload_root: PathBuf::from("data/upload"),
            upload_public_prefix: "/upload".to_string(),
            log_dir: PathBuf::from("data/logs"),
            log_filter: "info".to_string(),
        }
    }
}

impl CmsConfig {
    /// Reads a YAML config file, then applies `CMS_*` environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config =
            Self::from_yaml(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DATABASE_PATH).filter(|value| !value.is_empty()) {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_UPLOAD_ROOT).filter(|value| !value.is_empty()) {
            self.upload_root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_UPLOAD_PUBLIC_PREFIX) {
            self.upload_public_prefix = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CmsConfig, ENV_UPLOAD_PUBLIC_PREFIX, ENV_UPLOAD_ROOT};
    use std::path::PathBuf;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = CmsConfig::from_yaml("uploadRoot: /srv/upload\nlogFilter: debug\n").expect("yaml");
        assert_eq!(config.upload_root, PathBuf::from("/srv/upload"));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.upload_public_prefix, "/upload");
        assert_eq!(CmsConfig::from_yaml("  \n").expect("empty"), CmsConfig::default());
    }

    #[test]
    fn env_overrides_apply_after_file() {
        let mut config = CmsConfig::default();
        config.apply_env_overrides(|key| match key {
            ENV_UPLOAD_ROOT => Some("/mnt/files".to_string()),
            ENV_UPLOAD_PUBLIC_PREFIX => Some("https://cdn.example.com/u".to_string()),
            _ => None,
        });
        assert_eq!(config.upload_root, PathBuf::from("/mnt/files"));
        assert_eq!(config.upload_public_prefix, "https://cdn.example.com/u");
        assert_eq!(config.database_path, PathBuf::from("data/cms.sqlite"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = CmsConfig::load(&dir.path().join("absent.yaml")).expect_err("missing");
        assert!(format!("{:#}", error).contains("reading config"));
    }
}
