//! Layered configuration
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `.repodigest.toml`, `.repodigest.yaml` / `.yml`, `.repodigest.json` in
//!    the working directory, or one explicit file
//! 3. `REPODIGEST_*` environment variables (`__` separates nested keys, e.g.
//!    `REPODIGEST_HTTP__TIMEOUT_SECS=30`)

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::process::CommandSpec;

/// Config file names searched in the working directory
pub const CONFIG_FILES: [&str; 4] =
    [".repodigest.toml", ".repodigest.yaml", ".repodigest.yml", ".repodigest.json"];

/// Environment variable prefix
pub const ENV_PREFIX: &str = "REPODIGEST_";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub remote: RemoteConfig,
    pub update: UpdateConfig,
    pub tokenizer: TokenizerConfig,
}

/// HTTP client settings shared by the resolver and the update manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: format!("repodigest/{}", crate::VERSION),
        }
    }
}

/// Repository host settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the metadata API
    pub api_base: String,
    /// Version-control program used for probes and clones
    pub git_program: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_owned(),
            git_program: "git".to_owned(),
        }
    }
}

/// Self-update settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Published package name
    pub package_name: String,
    /// Feed returning `{"version": "..."}` for the latest release
    pub feed_url: String,
    /// Directory the tool runs from; a VCS dir here means a source checkout
    pub install_root: Option<PathBuf>,
    /// Project whose dependency directory may hold a local install
    pub project_root: Option<PathBuf>,
    /// Name of the local dependency directory under `project_root`
    pub dependency_dir: String,
    /// Lists globally installed packages; stdout is searched for the package
    pub global_list_command: CommandSpec,
    pub global_update_command: CommandSpec,
    pub local_update_command: CommandSpec,
    /// Prints the installed version
    pub version_command: CommandSpec,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        let package = "repodigest";
        Self {
            package_name: package.to_owned(),
            feed_url: format!("https://registry.npmjs.org/{}/latest", package),
            install_root: None,
            project_root: None,
            dependency_dir: "node_modules".to_owned(),
            global_list_command: CommandSpec::new("npm", ["list", "-g", "--depth=0", package]),
            global_update_command: CommandSpec::new(
                "npm",
                ["install", "-g", &format!("{}@latest", package)],
            ),
            local_update_command: CommandSpec::new(
                "npm",
                ["install", &format!("{}@latest", package)],
            ),
            version_command: CommandSpec::new(package, ["--version"]),
        }
    }
}

/// Token counting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Use exact BPE tokenizers when available
    pub exact: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self { exact: true }
    }
}

impl Config {
    /// Load from the working directory's config files and the environment
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut figment = Self::defaults();
        for name in CONFIG_FILES {
            let path = dir.join(name);
            if path.exists() {
                log::debug!("Loading config from {}", path.display());
                figment = merge_file(figment, &path);
            }
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load one explicit file plus the environment
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let figment = merge_file(Self::defaults(), path);
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract().map_err(|e| ConfigError::Invalid(Box::new(e)))
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}
