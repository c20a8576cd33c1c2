//! Self-update
//!
//! One attempt runs `check → detect installation → apply → verify`. Only
//! package-manager installs are updated automatically; source checkouts and
//! installs we cannot identify get manual instructions instead. A mismatched
//! version after the update is reported as a failure and nothing is rolled
//! back.

use async_trait::async_trait;
use regex::Regex;
use semver::Version;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::config::{Config, UpdateConfig};
use crate::http::{HttpClient, HttpError, JsonFetcher};
use crate::process::{CommandRunner, CommandSpec, SystemCommandRunner};
use crate::types::{InstallationKind, UpdateCheck, UpdateInfo, UpdateResult};

#[cfg(test)]
use mockall::automock;

/// Message returned when the feed yields no version
pub const COULD_NOT_CHECK: &str = "Could not check for updates";

/// Error reported when the installed version does not match the target
pub const VERIFICATION_FAILED: &str = "Version verification failed";

/// Prefix of every manual-update instruction
pub const MANUAL_UPDATE_REQUIRED: &str = "Manual update required";

/// Update errors
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("Failed to run `{command}`: {message}")]
    Command { command: String, message: String },
    #[error("Could not read installed version from `{0}`")]
    VersionUnreadable(String),
    #[error("Failed to read {path}: {message}")]
    Manifest { path: String, message: String },
}

/// Where the latest published version comes from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// `Ok(None)` when the source answered but named no version
    async fn latest_version(&self) -> Result<Option<String>, UpdateError>;
}

/// Reads `version` from a JSON update feed
pub struct RegistryVersionSource {
    fetcher: Arc<dyn JsonFetcher>,
    url: String,
}

impl RegistryVersionSource {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, url: impl Into<String>) -> Self {
        Self { fetcher, url: url.into() }
    }
}

#[async_trait]
impl VersionSource for RegistryVersionSource {
    async fn latest_version(&self) -> Result<Option<String>, UpdateError> {
        let feed = self.fetcher.get_json(&self.url).await?;
        Ok(feed
            .get("version")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned))
    }
}

/// Facts gathered about the local installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallProbe {
    /// The install root holds version-control metadata
    pub has_vcs_dir: bool,
    /// Result of the global package listing; None if the listing could not run
    pub listed_globally: Option<bool>,
    /// The project's dependency directory holds the package
    pub has_local_package: bool,
}

/// Classify an installation from probe results
///
/// A source checkout wins over everything else; a failed global probe makes
/// the installation `Unknown` so nothing is updated blindly.
pub fn classify_installation(probe: &InstallProbe) -> InstallationKind {
    if probe.has_vcs_dir {
        return InstallationKind::GitSource;
    }
    match probe.listed_globally {
        None => InstallationKind::Unknown,
        Some(true) => InstallationKind::GlobalPackage,
        Some(false) if probe.has_local_package => InstallationKind::LocalPackage,
        Some(false) => InstallationKind::Unknown,
    }
}

/// Compare versions semantically when both parse, textually otherwise
fn parse_version(v: &str) -> Option<Version> {
    Version::parse(v.trim().trim_start_matches('v')).ok()
}

/// True when `latest` is newer than `current`
pub fn is_newer(latest: &str, current: &str) -> bool {
    match (parse_version(latest), parse_version(current)) {
        (Some(l), Some(c)) => l > c,
        _ => latest.trim().trim_start_matches('v') != current.trim().trim_start_matches('v'),
    }
}

fn same_version(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim().trim_start_matches('v') == b.trim().trim_start_matches('v'),
    }
}

/// First semver-looking token in a command's output
pub fn extract_version(output: &str) -> Option<String> {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let re = VERSION_RE.get_or_init(|| {
        Regex::new(r"v?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)")
            .expect("version regex is valid")
    });
    re.captures(output).map(|c| c[1].to_owned())
}

/// Checks for and applies updates to the running tool
pub struct UpdateManager {
    current_version: String,
    source: Arc<dyn VersionSource>,
    fetcher: Arc<dyn JsonFetcher>,
    runner: Arc<dyn CommandRunner>,
    config: UpdateConfig,
}

impl UpdateManager {
    pub fn new(
        current_version: impl Into<String>,
        source: Arc<dyn VersionSource>,
        fetcher: Arc<dyn JsonFetcher>,
        runner: Arc<dyn CommandRunner>,
        config: UpdateConfig,
    ) -> Self {
        Self { current_version: current_version.into(), source, fetcher, runner, config }
    }

    /// Manager for this build, using the configured feed and real subprocesses
    pub fn from_config(config: &Config) -> Result<Self, UpdateError> {
        let fetcher: Arc<dyn JsonFetcher> = Arc::new(HttpClient::new(&config.http)?);
        let source = RegistryVersionSource::new(Arc::clone(&fetcher), config.update.feed_url.as_str());
        Ok(Self::new(
            crate::VERSION,
            Arc::new(source),
            fetcher,
            Arc::new(SystemCommandRunner),
            config.update.clone(),
        ))
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Ask the version source whether something newer is published
    ///
    /// Never fails: lookup errors land in `UpdateCheck::error`.
    pub async fn check_for_updates(&self) -> UpdateCheck {
        log::debug!("Checking for updates (current: {})", self.current_version);

        let mut check = UpdateCheck {
            available: false,
            current_version: self.current_version.clone(),
            latest_version: None,
            message: None,
            error: None,
        };

        match self.source.latest_version().await {
            Ok(None) => check.message = Some(COULD_NOT_CHECK.to_owned()),
            Err(e) => {
                log::debug!("Update check failed: {}", e);
                check.error = Some(e.to_string());
            }
            Ok(Some(latest)) => {
                check.available = is_newer(&latest, &self.current_version);
                check.message = Some(if check.available {
                    format!("Update available: {} -> {}", self.current_version, latest)
                } else {
                    "You are running the latest version".to_owned()
                });
                check.latest_version = Some(latest);
            }
        }

        check
    }

    /// One GET decoded as JSON
    pub async fn fetch_json(&self, url: &str) -> Result<Value, HttpError> {
        self.fetcher.get_json(url).await
    }

    /// Probe the filesystem and package manager, then classify
    pub async fn detect_installation(&self) -> InstallationKind {
        let probe = self.probe_installation().await;
        let kind = classify_installation(&probe);
        log::debug!("Installation probe {:?} -> {:?}", probe, kind);
        kind
    }

    async fn probe_installation(&self) -> InstallProbe {
        let has_vcs_dir = self.install_root().join(".git").exists();
        let has_local_package = self.local_package_dir().exists();

        let listed_globally = match self.runner.run(&self.config.global_list_command).await {
            Ok(output) => Some(output.success && output.stdout.contains(&self.config.package_name)),
            Err(e) => {
                log::debug!("Global package probe failed: {}", e);
                None
            }
        };

        InstallProbe { has_vcs_dir, listed_globally, has_local_package }
    }

    /// Run the installed binary's version command and parse its output
    pub async fn installed_version(&self) -> Result<String, UpdateError> {
        let command = &self.config.version_command;
        let output = self.runner.run(command).await.map_err(|e| UpdateError::Command {
            command: command.to_string(),
            message: e.to_string(),
        })?;
        if !output.success {
            return Err(UpdateError::Command {
                command: command.to_string(),
                message: output.stderr.trim().to_owned(),
            });
        }
        extract_version(&output.stdout).ok_or_else(|| UpdateError::VersionUnreadable(command.to_string()))
    }

    /// Version recorded in the project's own copy of the package
    ///
    /// Reads `<project_root>/<dependency_dir>/<package_name>/package.json`, so
    /// a different binary earlier on PATH cannot answer for the local install.
    pub async fn local_package_version(&self) -> Result<String, UpdateError> {
        let path = self.local_package_dir().join("package.json");
        let manifest_error = |message: String| UpdateError::Manifest {
            path: path.display().to_string(),
            message,
        };

        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| manifest_error(e.to_string()))?;
        let manifest: Value = serde_json::from_str(&raw).map_err(|e| manifest_error(e.to_string()))?;
        manifest
            .get("version")
            .and_then(Value::as_str)
            .and_then(extract_version)
            .ok_or_else(|| UpdateError::VersionUnreadable(path.display().to_string()))
    }

    /// Apply `info.latest_version` if the installation allows it
    pub async fn install_update(&self, info: &UpdateInfo) -> UpdateResult {
        let kind = self.detect_installation().await;
        log::info!("Updating {} ({}) to {}", self.config.package_name, kind.label(), info.latest_version);

        let command = match kind {
            InstallationKind::GitSource => {
                return UpdateResult::manual(format!(
                    "{}: {} is running from a git checkout at {}. Run `git pull` there and rebuild.",
                    MANUAL_UPDATE_REQUIRED,
                    self.config.package_name,
                    self.install_root().display()
                ));
            }
            InstallationKind::Unknown => {
                return UpdateResult::manual(format!(
                    "{}: could not determine how {} was installed. Run `{}`.",
                    MANUAL_UPDATE_REQUIRED, self.config.package_name, self.config.global_update_command
                ));
            }
            InstallationKind::GlobalPackage => self.config.global_update_command.clone(),
            InstallationKind::LocalPackage => {
                self.config.local_update_command.clone().in_dir(self.project_root())
            }
        };

        if let Some(error) = self.run_update(&command).await {
            log::warn!("{}", error);
            return UpdateResult::manual(format!("{}: run `{}` yourself.", MANUAL_UPDATE_REQUIRED, command))
                .with_error(error);
        }

        let installed = match kind {
            InstallationKind::LocalPackage => self.local_package_version().await,
            _ => self.installed_version().await,
        };

        match installed {
            Ok(installed) if same_version(&installed, &info.latest_version) => {
                log::info!("Updated to {}", installed);
                UpdateResult::succeeded()
            }
            Ok(installed) => {
                log::warn!("Expected version {} after update, found {}", info.latest_version, installed);
                UpdateResult::failed(VERIFICATION_FAILED).with_instructions(format!(
                    "Expected {} but {} is installed. Run `{}` manually.",
                    info.latest_version, installed, command
                ))
            }
            Err(e) => {
                log::warn!("Could not verify update: {}", e);
                UpdateResult::failed(VERIFICATION_FAILED)
                    .with_instructions(format!("{}. Run `{}` manually.", e, command))
            }
        }
    }

    /// Error message if the update command could not complete
    async fn run_update(&self, command: &CommandSpec) -> Option<String> {
        match self.runner.run(command).await {
            Ok(output) if output.success => None,
            Ok(output) => Some(format!(
                "`{}` exited with {}: {}",
                command,
                output.code.map_or_else(|| "signal".to_owned(), |c| c.to_string()),
                output.stderr.trim()
            )),
            Err(e) => Some(format!("Failed to run `{}`: {}", command, e)),
        }
    }

    fn install_root(&self) -> PathBuf {
        self.config.install_root.clone().unwrap_or_else(locate_install_root)
    }

    fn local_package_dir(&self) -> PathBuf {
        self.project_root().join(&self.config.dependency_dir).join(&self.config.package_name)
    }

    fn project_root(&self) -> PathBuf {
        self.config
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Nearest ancestor of the running executable that looks like an install root
fn locate_install_root() -> PathBuf {
    let exe = std::env::current_exe()
        .ok()
        .map(|p| std::fs::canonicalize(&p).unwrap_or(p));
    let Some(exe_dir) = exe.as_deref().and_then(Path::parent) else {
        return PathBuf::from(".");
    };

    exe_dir
        .ancestors()
        .take(4)
        .find(|dir| dir.join(".git").exists() || dir.join("package.json").exists())
        .unwrap_or(exe_dir)
        .to_path_buf()
}
