//! Configuration sections and their defaults

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use vessel_types::{ColorChoice, OutputFormat};

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    #[serde(default = "default_color_choice")]
    pub color: ColorChoice,
    /// Concurrent installers; 0 = auto-detect
    #[serde(default)]
    pub parallelism: usize,
    /// Seconds an install plan may run before it is cancelled; 0 = no limit
    #[serde(default)]
    pub plan_deadline: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: OutputFormat::Tty,
            color: ColorChoice::Auto,
            parallelism: 0,
            plan_deadline: 0,
        }
    }
}

/// Path configuration; unset paths derive from `data_dir`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    pub data_dir: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub recipes_dir: Option<PathBuf>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64, // seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64, // seconds
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// Signing and trust configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Private key used to sign cars; defaults to `<config>/signing.key`
    pub signing_key: Option<PathBuf>,
    /// base58 public keys accepted on unpack; empty trusts the declared signer
    #[serde(default)]
    pub trusted_signers: Vec<String>,
}

/// Remote car store that `upload` pushes to
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UploadConfig {
    /// Base URL; cars land at `<url>/<id>.car` next to `<id>.car-info.json`
    pub url: Option<String>,
    /// Bearer token sent with every PUT
    pub token: Option<String>,
}

/// Where recipes and cars of a named repo live
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Code-host shorthand, e.g. `github.com/acme/packages`
    pub github: Option<String>,
    /// Local directory holding recipes
    pub path: Option<PathBuf>,
}

pub type Repositories = BTreeMap<String, RepositoryConfig>;

fn default_output_format() -> OutputFormat {
    OutputFormat::Tty
}

fn default_color_choice() -> ColorChoice {
    ColorChoice::Auto
}

fn default_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_user_agent() -> String {
    format!("vessel/{}", env!("CARGO_PKG_VERSION"))
}
