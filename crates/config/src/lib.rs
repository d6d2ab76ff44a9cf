#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for vessel
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/vessel/config.toml)
//! - Environment variables (`VESSEL_*`)
//! - CLI flags

pub mod core;

pub use crate::core::{
    GeneralConfig, NetworkConfig, PathConfig, Repositories, RepositoryConfig, SecurityConfig,
    UploadConfig,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use vessel_errors::{ConfigError, Error};
use vessel_types::{ColorChoice, OutputFormat};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub paths: PathConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub repos: Repositories,

    /// Car locations keyed by package id, consulted before any remote
    #[serde(default)]
    pub car_overrides: BTreeMap<String, String>,
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    fn config_dir() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("vessel"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` on invalid TOML.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: &Option<PathBuf>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with process environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Merge with variables supplied by `lookup`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending variable.
    pub fn merge_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(output) = lookup("VESSEL_OUTPUT") {
            self.general.default_output = match output.as_str() {
                "plain" => OutputFormat::Plain,
                "tty" => OutputFormat::Tty,
                "json" => OutputFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "VESSEL_OUTPUT".to_string(),
                        value: output,
                    }
                    .into())
                }
            };
        }

        if let Some(color) = lookup("VESSEL_COLOR") {
            self.general.color = match color.as_str() {
                "always" => ColorChoice::Always,
                "auto" => ColorChoice::Auto,
                "never" => ColorChoice::Never,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "VESSEL_COLOR".to_string(),
                        value: color,
                    }
                    .into())
                }
            };
        }

        if let Some(jobs) = lookup("VESSEL_PARALLELISM") {
            self.general.parallelism = jobs.parse().map_err(|_| ConfigError::InvalidValue {
                field: "VESSEL_PARALLELISM".to_string(),
                value: jobs,
            })?;
        }

        if let Some(timeout) = lookup("VESSEL_TIMEOUT") {
            self.network.timeout = timeout.parse().map_err(|_| ConfigError::InvalidValue {
                field: "VESSEL_TIMEOUT".to_string(),
                value: timeout,
            })?;
        }

        if let Some(dir) = lookup("VESSEL_DATA_DIR") {
            self.paths.data_dir = Some(non_empty_path("VESSEL_DATA_DIR", dir)?);
        }

        if let Some(dir) = lookup("VESSEL_BUILD_DIR") {
            self.paths.build_dir = Some(non_empty_path("VESSEL_BUILD_DIR", dir)?);
        }

        if let Some(dir) = lookup("VESSEL_RECIPES_DIR") {
            self.paths.recipes_dir = Some(non_empty_path("VESSEL_RECIPES_DIR", dir)?);
        }

        if let Some(url) = lookup("VESSEL_UPLOAD_URL").filter(|u| !u.is_empty()) {
            self.upload.url = Some(url);
        }

        if let Some(token) = lookup("VESSEL_UPLOAD_TOKEN").filter(|t| !t.is_empty()) {
            self.upload.token = Some(token);
        }

        Ok(())
    }

    /// Root of all on-disk state
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/var/lib"))
                .join("vessel")
        })
    }

    /// `<data>/store`
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("store")
    }

    /// `<data>/cache`
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    /// `<data>/archive`
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir().join("archive")
    }

    /// `<data>/roots`
    #[must_use]
    pub fn roots_path(&self) -> PathBuf {
        self.data_dir().join("roots")
    }

    /// `<data>/profiles`
    #[must_use]
    pub fn profiles_path(&self) -> PathBuf {
        self.data_dir().join("profiles")
    }

    /// Build scratch space
    #[must_use]
    pub fn build_path(&self) -> PathBuf {
        self.paths
            .build_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("build"))
    }

    /// Local recipe directory
    #[must_use]
    pub fn recipes_path(&self) -> PathBuf {
        self.paths
            .recipes_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./packages"))
    }

    /// Recipe back-ends in lookup order: the local recipe directory, then
    /// every configured repo
    #[must_use]
    pub fn lookup_paths(&self) -> Vec<String> {
        let mut paths = vec![local_entry(&self.recipes_path())];
        for repo in self.repos.values() {
            if let Some(path) = &repo.path {
                paths.push(local_entry(path));
            }
            if let Some(github) = &repo.github {
                if github.starts_with("github.com/") {
                    paths.push(github.clone());
                } else {
                    paths.push(format!("github.com/{github}"));
                }
            }
        }
        paths.dedup();
        paths
    }

    /// Location of the car signing key
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured and the config directory is unknown.
    pub fn signing_key_path(&self) -> Result<PathBuf, Error> {
        match &self.security.signing_key {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("signing.key")),
        }
    }
}

/// A directory as a lookup entry, which must start with `/` or `.`
fn local_entry(path: &Path) -> String {
    let text = path.display().to_string();
    if text.starts_with('/') || text.starts_with('.') {
        text
    } else {
        format!("./{text}")
    }
}

fn non_empty_path(field: &str, value: String) -> Result<PathBuf, Error> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        }
        .into());
    }
    Ok(PathBuf::from(value))
}
