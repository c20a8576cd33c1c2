//! Core type definitions for repodigest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default branch assumed when an identifier names none
pub const DEFAULT_BRANCH: &str = "main";

/// How a repository identifier was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    /// `https://host/owner/repo`
    Https,
    /// `git@host:owner/repo.git`
    Ssh,
    /// `owner/repo`
    ShortForm,
}

/// A parsed repository identifier
///
/// `owner` and `repo` are never empty and never contain a path separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryReference {
    pub owner: String,
    pub repo: String,
    /// `owner/repo`
    pub full_name: String,
    pub branch: String,
    pub source_kind: UrlKind,
    /// Host the identifier pointed at
    pub host: String,
}

impl RepositoryReference {
    /// HTTPS URL suitable for `git clone`
    pub fn clone_url(&self) -> String {
        format!("https://{}/{}.git", self.host, self.full_name)
    }

    /// Path of the metadata endpoint relative to the API base
    pub fn api_path(&self) -> String {
        format!("/repos/{}", self.full_name)
    }

    /// Same repository, different branch
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.full_name, self.branch)
    }
}

/// Live metadata for a remote repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub full_name: String,
    pub description: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub default_branch: String,
    pub size_kb: u64,
    pub primary_language: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A published version the caller wants installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// How the running tool was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationKind {
    GitSource,
    GlobalPackage,
    LocalPackage,
    Unknown,
}

impl InstallationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::GitSource => "git checkout",
            Self::GlobalPackage => "global package",
            Self::LocalPackage => "local package",
            Self::Unknown => "unknown",
        }
    }

    /// Whether an update can be applied without the user's hands
    pub fn is_automatable(self) -> bool {
        matches!(self, Self::GlobalPackage | Self::LocalPackage)
    }
}

/// Outcome of one version check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub available: bool,
    pub current_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateCheck {
    /// The [`UpdateInfo`] to install, when an update is available
    pub fn update_info(&self) -> Option<UpdateInfo> {
        let latest = self.latest_version.as_ref().filter(|_| self.available)?;
        Some(UpdateInfo {
            current_version: self.current_version.clone(),
            latest_version: latest.clone(),
            download_url: None,
        })
    }
}

/// Terminal result of one update attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub success: bool,
    pub manual_update_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateResult {
    pub fn succeeded() -> Self {
        Self { success: true, manual_update_required: false, instructions: None, error: None }
    }

    pub fn manual(instructions: impl Into<String>) -> Self {
        Self {
            success: false,
            manual_update_required: true,
            instructions: Some(instructions.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            manual_update_required: false,
            instructions: None,
            error: Some(error.into()),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
