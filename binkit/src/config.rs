use crate::binary::{Binary, InstallStrategy};
use crate::error::{BinkitError, Result};
use crate::utils;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,

    #[serde(default)]
    pub binary: BTreeMap<String, BinaryConfig>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DefaultConfig {
    #[serde(default = "default_install_dir")]
    pub install_dir: String,

    /// Request deadline in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub strategy: InstallStrategy,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            timeout: None,
            strategy: InstallStrategy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct BinaryConfig {
    pub url: Option<String>,
    pub version: Option<String>,
    /// Program path inside the install root, when it is not `<name>`.
    pub executable: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Per-invocation settings that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct BinaryOverrides {
    pub url: Option<String>,
    pub version: Option<String>,
    pub install_dir: Option<String>,
    pub strategy: Option<InstallStrategy>,
    pub executable: Option<String>,
}

fn default_install_dir() -> String {
    directories::BaseDirs::new()
        .map(|dirs| {
            dirs.cache_dir()
                .join("binkit")
                .join("bin")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "~/.cache/binkit/bin".to_string())
}

impl Config {
    /// Load configuration from file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BinkitError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("binkit.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/binkit.toml"))
    }

    pub fn install_dir(&self) -> PathBuf {
        utils::expand_tilde(&self.default.install_dir)
    }

    pub fn get_binary_config(&self, name: &str) -> Option<&BinaryConfig> {
        self.binary.get(name)
    }

    /// Build a [`Binary`] for `name`. Fields set in `overrides` win over the
    /// `[binary.<name>]` table, which wins over `[default]`.
    pub fn binary(&self, name: &str, overrides: &BinaryOverrides) -> Result<Binary> {
        let entry = self.get_binary_config(name);
        let url = overrides
            .url
            .clone()
            .or_else(|| entry.and_then(|e| e.url.clone()));
        let version = overrides
            .version
            .clone()
            .or_else(|| entry.and_then(|e| e.version.clone()));

        let (url, version) = match (url, version) {
            (Some(url), Some(version)) => (url, version),
            _ => return Err(self.unknown_binary(name)),
        };

        let install_dir = overrides
            .install_dir
            .as_deref()
            .map(utils::expand_tilde)
            .unwrap_or_else(|| self.install_dir());

        let mut binary = Binary::new(name, url, version, install_dir)
            .with_strategy(overrides.strategy.unwrap_or(self.default.strategy));

        if let Some(executable) = overrides
            .executable
            .as_deref()
            .or_else(|| entry.and_then(|e| e.executable.as_deref()))
        {
            binary = binary.with_executable(executable);
        }

        Ok(binary)
    }

    pub fn unknown_binary(&self, name: &str) -> BinkitError {
        let available = self.binary.keys().cloned().collect::<Vec<_>>().join(", ");
        BinkitError::UnknownBinary {
            name: name.to_string(),
            available: if available.is_empty() {
                "none".to_string()
            } else {
                available
            },
        }
    }

    /// Headers configured for `name`, if any.
    pub fn headers(&self, name: &str) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        if let Some(entry) = self.get_binary_config(name) {
            for (key, value) in &entry.headers {
                let (name, value) = header_pair(key, value)?;
                map.insert(name, value);
            }
        }
        Ok(map)
    }
}

/// Parse a `Name: value` header as given on the command line.
pub fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let (key, value) = raw.split_once(':').ok_or_else(|| BinkitError::InvalidHeader {
        header: raw.to_string(),
        reason: "missing ':'".to_string(),
    })?;
    header_pair(key.trim(), value.trim())
}

fn header_pair(key: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = |reason: String| BinkitError::InvalidHeader {
        header: format!("{key}: {value}"),
        reason,
    };
    let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok((name, value))
}
