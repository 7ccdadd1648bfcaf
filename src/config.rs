use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::disk::DEFAULT_DISK_API_URL;
use crate::dogapi::DEFAULT_DOG_API_URL;
use crate::domain::RemotePath;
use crate::error::DogError;
use crate::manifest::DEFAULT_MANIFEST_PATH;

pub const CONFIG_FILE: &str = "dogbatch.json";
pub const DEFAULT_SETTINGS_PATH: &str = ".env";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub dog_api_url: Option<String>,
    #[serde(default)]
    pub disk_api_url: Option<String>,
    #[serde(default)]
    pub manifest_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub remote_root: Option<String>,
    #[serde(default)]
    pub settings_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub manifest_path: Option<Utf8PathBuf>,
    pub remote_root: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub dog_api_url: String,
    pub disk_api_url: String,
    pub manifest_path: Utf8PathBuf,
    pub remote_root: RemotePath,
    pub settings_path: Utf8PathBuf,
    pub timeout: Duration,
    pub source: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(path) = &overrides.manifest_path {
            self.manifest_path = path.clone();
        }
        if let Some(root) = &overrides.remote_root {
            self.remote_root = RemotePath::new(root);
        }
        self
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            dog_api_url: DEFAULT_DOG_API_URL.to_string(),
            disk_api_url: DEFAULT_DISK_API_URL.to_string(),
            manifest_path: Utf8PathBuf::from(DEFAULT_MANIFEST_PATH),
            remote_root: RemotePath::root(),
            settings_path: Utf8PathBuf::from(DEFAULT_SETTINGS_PATH),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            source: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Without one, `dogbatch.json` in the working
    /// directory is used, then the per-user config file, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DogError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::candidates().into_iter().find(|candidate| candidate.exists()),
        };

        let Some(config_path) = config_path else {
            return Ok(ResolvedConfig::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| DogError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DogError::ConfigParse(err.to_string()))?;

        let mut resolved = Self::resolve_config(config)?;
        resolved.source = Some(config_path);
        Ok(resolved)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.config_dir().join("dogbatch").join(CONFIG_FILE))
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
        candidates.extend(Self::user_config_path());
        candidates
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DogError> {
        let defaults = ResolvedConfig::default();

        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version != SCHEMA_VERSION {
            return Err(DogError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let timeout = match config.timeout_secs {
            Some(0) => {
                return Err(DogError::ConfigParse(
                    "timeout_secs must be positive".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };

        Ok(ResolvedConfig {
            schema_version,
            dog_api_url: non_empty(config.dog_api_url).unwrap_or(defaults.dog_api_url),
            disk_api_url: non_empty(config.disk_api_url).unwrap_or(defaults.disk_api_url),
            manifest_path: config.manifest_path.unwrap_or(defaults.manifest_path),
            remote_root: config
                .remote_root
                .as_deref()
                .map(RemotePath::new)
                .unwrap_or(defaults.remote_root),
            settings_path: config.settings_path.unwrap_or(defaults.settings_path),
            timeout,
            source: None,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
