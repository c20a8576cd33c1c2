//! Remote repository support
//!
//! Turns user-supplied repository identifiers into [`RepositoryReference`]s and
//! talks to the repository host: metadata lookups over HTTPS, shallow clones
//! and availability probes through the local `git`.
//!
//! Accepted identifiers, in priority order:
//! - `https://github.com/owner/repo[.git][/tree/branch]`
//! - `git@github.com:owner/repo.git`
//! - `owner/repo`

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::{Config, RemoteConfig};
use crate::http::{HttpClient, HttpError, JsonFetcher};
use crate::process::{CommandRunner, CommandSpec, SystemCommandRunner};
use crate::types::{RepositoryMetadata, RepositoryReference, UrlKind, DEFAULT_BRANCH};

/// Host assumed for short-form identifiers
pub const DEFAULT_HOST: &str = "github.com";

/// Remote repository errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid repository reference: {0}")]
    InvalidReference(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Git error: {0}")]
    Git(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<HttpError> for RemoteError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::MalformedJson(msg) => Self::MalformedResponse(msg),
            other => Self::Network(other.to_string()),
        }
    }
}

/// Parse a repository identifier
pub fn parse_github_url(input: &str) -> Result<RepositoryReference, RemoteError> {
    let input = input.trim();

    if input.starts_with("https://") {
        return parse_https_url(input);
    }
    if input.starts_with("http://") {
        return Err(invalid(input, "only https URLs are supported"));
    }
    if let Some(rest) = input.strip_prefix("git@") {
        return parse_ssh_url(input, rest);
    }
    parse_short_form(input)
}

fn parse_https_url(input: &str) -> Result<RepositoryReference, RemoteError> {
    let url = Url::parse(input).map_err(|e| invalid(input, &e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid(input, "missing host"))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        return Err(invalid(input, "expected /<owner>/<repo>"));
    }

    // Only `/tree/<branch>` may follow the repository
    let branch = match &segments[2..] {
        [] => DEFAULT_BRANCH.to_owned(),
        ["tree", branch @ ..] if !branch.is_empty() => branch.join("/"),
        _ => return Err(invalid(input, "expected /<owner>/<repo>[/tree/<branch>]")),
    };

    build_reference(input, host, segments[0], segments[1], branch, UrlKind::Https)
}

fn parse_ssh_url(input: &str, rest: &str) -> Result<RepositoryReference, RemoteError> {
    let (host, path) = rest
        .split_once(':')
        .ok_or_else(|| invalid(input, "expected git@<host>:<owner>/<repo>"))?;
    if host.is_empty() {
        return Err(invalid(input, "missing host"));
    }

    let (owner, repo) = path
        .split_once('/')
        .ok_or_else(|| invalid(input, "expected <owner>/<repo> after ':'"))?;

    build_reference(input, host, owner, repo, DEFAULT_BRANCH.to_owned(), UrlKind::Ssh)
}

fn parse_short_form(input: &str) -> Result<RepositoryReference, RemoteError> {
    let (owner, repo) = input
        .split_once('/')
        .ok_or_else(|| invalid(input, "expected <owner>/<repo>"))?;

    build_reference(input, DEFAULT_HOST, owner, repo, DEFAULT_BRANCH.to_owned(), UrlKind::ShortForm)
}

fn build_reference(
    input: &str,
    host: &str,
    owner: &str,
    repo: &str,
    branch: String,
    source_kind: UrlKind,
) -> Result<RepositoryReference, RemoteError> {
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    if !is_valid_name(owner) {
        return Err(invalid(input, &format!("invalid owner '{}'", owner)));
    }
    if !is_valid_name(repo) {
        return Err(invalid(input, &format!("invalid repository name '{}'", repo)));
    }

    Ok(RepositoryReference {
        owner: owner.to_owned(),
        repo: repo.to_owned(),
        full_name: format!("{}/{}", owner, repo),
        branch,
        source_kind,
        host: host.to_owned(),
    })
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn invalid(input: &str, reason: &str) -> RemoteError {
    RemoteError::InvalidReference(format!("{} ({})", input, reason))
}

/// Cheap check for "this looks like a remote identifier, not a local path"
pub fn is_remote_reference(input: &str) -> bool {
    input.starts_with("https://")
        || input.starts_with("http://")
        || input.starts_with("git@")
        || (input.matches('/').count() == 1
            && !input.starts_with('/')
            && !input.starts_with('.')
            && !Path::new(input).exists())
}

/// Metadata endpoint payload
#[derive(Debug, Deserialize)]
struct ApiRepository {
    full_name: String,
    description: Option<String>,
    stargazers_count: u64,
    forks_count: u64,
    default_branch: String,
    size: u64,
    language: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<ApiRepository> for RepositoryMetadata {
    fn from(api: ApiRepository) -> Self {
        Self {
            full_name: api.full_name,
            description: api.description,
            stars: api.stargazers_count,
            forks: api.forks_count,
            default_branch: api.default_branch,
            size_kb: api.size,
            primary_language: api.language,
            updated_at: api.updated_at,
        }
    }
}

/// Resolves identifiers and queries the repository host
pub struct RepositoryResolver {
    fetcher: Arc<dyn JsonFetcher>,
    runner: Arc<dyn CommandRunner>,
    config: RemoteConfig,
}

impl RepositoryResolver {
    pub fn new(
        fetcher: Arc<dyn JsonFetcher>,
        runner: Arc<dyn CommandRunner>,
        config: RemoteConfig,
    ) -> Self {
        Self { fetcher, runner, config }
    }

    /// Resolver using the real HTTP client and subprocesses
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        let client = HttpClient::new(&config.http)?;
        Ok(Self::new(Arc::new(client), Arc::new(SystemCommandRunner), config.remote.clone()))
    }

    pub fn parse_github_url(&self, input: &str) -> Result<RepositoryReference, RemoteError> {
        parse_github_url(input)
    }

    /// True only if `git --version` runs and exits 0
    pub async fn is_git_installed(&self) -> bool {
        let probe = CommandSpec::new(self.config.git_program.as_str(), ["--version"]);
        match self.runner.run(&probe).await {
            Ok(output) => output.success,
            Err(e) => {
                log::debug!("{} not available: {}", self.config.git_program, e);
                false
            }
        }
    }

    /// Fetch live metadata for a repository. Not retried.
    pub async fn get_repository_info(
        &self,
        reference: &RepositoryReference,
    ) -> Result<RepositoryMetadata, RemoteError> {
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), reference.api_path());
        let value = self.fetcher.get_json(&url).await?;

        let api: ApiRepository = serde_json::from_value(value)
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;
        Ok(api.into())
    }

    /// Shallow, single-branch clone into `target`
    ///
    /// `target` must not exist or be an empty directory.
    pub async fn clone_repository(
        &self,
        reference: &RepositoryReference,
        target: &Path,
    ) -> Result<PathBuf, RemoteError> {
        if target.exists() {
            let mut entries =
                tokio::fs::read_dir(target).await.map_err(|e| RemoteError::Io(e.to_string()))?;
            let occupied =
                entries.next_entry().await.map_err(|e| RemoteError::Io(e.to_string()))?.is_some();
            if occupied {
                return Err(RemoteError::Io(format!(
                    "target directory is not empty: {}",
                    target.display()
                )));
            }
        }

        let clone = CommandSpec::new(
            self.config.git_program.as_str(),
            ["clone", "--depth", "1", "--single-branch", "--branch"],
        )
        .arg(reference.branch.as_str())
        .arg(reference.clone_url())
        .arg(target.to_string_lossy());

        log::info!("Cloning {} into {}", reference, target.display());
        let output = self
            .runner
            .run(&clone)
            .await
            .map_err(|e| RemoteError::Git(format!("Failed to run git: {}", e)))?;

        if !output.success {
            return Err(RemoteError::Git(format!("git clone failed: {}", output.stderr.trim())));
        }

        Ok(target.to_path_buf())
    }
}

#[cfg(test)]
#[allow(clippy::str_to_string)]
mod tests {
    use super::*;
    use crate::http::MockJsonFetcher;
    use crate::process::{CommandOutput, MockCommandRunner};
    use serde_json::json;
    use std::io;

    fn resolver(fetcher: MockJsonFetcher, runner: MockCommandRunner) -> RepositoryResolver {
        let config = RemoteConfig { api_base: "https://api.test/".to_string(), ..Default::default() };
        RepositoryResolver::new(Arc::new(fetcher), Arc::new(runner), config)
    }

    fn react_payload() -> serde_json::Value {
        json!({
            "full_name": "facebook/react",
            "description": "The library for web and native user interfaces.",
            "stargazers_count": 230000,
            "forks_count": 47000,
            "default_branch": "main",
            "size": 1024,
            "language": "JavaScript",
            "updated_at": "2024-05-01T12:00:00Z",
            "private": false
        })
    }

    #[test]
    fn test_parse_https_url() {
        let r = parse_github_url("https://github.com/facebook/react").unwrap();
        assert_eq!(r.owner, "facebook");
        assert_eq!(r.repo, "react");
        assert_eq!(r.full_name, "facebook/react");
        assert_eq!(r.branch, "main");
        assert_eq!(r.source_kind, UrlKind::Https);
    }

    #[test]
    fn test_parse_https_with_git_suffix_and_branch() {
        let r = parse_github_url("https://github.com/rust-lang/rust.git").unwrap();
        assert_eq!(r.repo, "rust");

        let r = parse_github_url("https://github.com/rust-lang/rust/tree/master").unwrap();
        assert_eq!(r.branch, "master");

        let r = parse_github_url("https://github.com/a/b/tree/feature/nested").unwrap();
        assert_eq!(r.branch, "feature/nested");
    }

    #[test]
    fn test_parse_https_rejects_non_tree_suffix() {
        for input in [
            "https://github.com/a/b/blob/dev/src/x.rs",
            "https://github.com/a/b/issues/12",
            "https://github.com/a/b/pulls",
            "https://github.com/a/b/tree",
            "https://github.com/a/b.git/commits/main",
        ] {
            assert!(
                matches!(parse_github_url(input), Err(RemoteError::InvalidReference(_))),
                "{:?} should be rejected",
                input
            );
        }

        let r = parse_github_url("https://github.com/a/b/").unwrap();
        assert_eq!(r.branch, "main");
    }

    #[test]
    fn test_parse_ssh_url() {
        let r = parse_github_url("git@github.com:vercel/next.js.git").unwrap();
        assert_eq!(r.owner, "vercel");
        assert_eq!(r.repo, "next.js");
        assert_eq!(r.branch, "main");
        assert_eq!(r.source_kind, UrlKind::Ssh);
        assert_eq!(r.host, "github.com");
    }

    #[test]
    fn test_parse_short_form() {
        let r = parse_github_url("  rust-lang/rust  ").unwrap();
        assert_eq!(r.full_name, "rust-lang/rust");
        assert_eq!(r.source_kind, UrlKind::ShortForm);
        assert_eq!(r.clone_url(), "https://github.com/rust-lang/rust.git");
    }

    #[test]
    fn test_parse_invalid() {
        for input in [
            "not-a-valid-thing",
            "",
            "/",
            "owner/",
            "a/b/c",
            "owner/.git",
            "https://github.com/only-owner",
            "https:///a/b",
            "git@github.com",
            "git@:a/b",
            "has space/repo",
            "http://github.com/facebook/react",
        ] {
            assert!(
                matches!(parse_github_url(input), Err(RemoteError::InvalidReference(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_full_name_round_trips_as_short_form() {
        for input in [
            "https://github.com/facebook/react",
            "git@github.com:vercel/next.js.git",
            "https://gitlab.com/group/project/tree/dev",
            "tokio-rs/tokio",
        ] {
            let first = parse_github_url(input).unwrap();
            let again = parse_github_url(&first.full_name).unwrap();
            assert_eq!(again.full_name, first.full_name);
        }
    }

    #[test]
    fn test_is_remote_reference() {
        assert!(is_remote_reference("https://github.com/foo/bar"));
        assert!(is_remote_reference("git@github.com:foo/bar.git"));
        // Recognised so that parsing can reject it with a clear reason
        assert!(is_remote_reference("http://github.com/foo/bar"));
        assert!(is_remote_reference("foo/bar"));
        assert!(!is_remote_reference("/path/to/local/repo"));
        assert!(!is_remote_reference("./local"));
    }

    #[tokio::test]
    async fn test_git_installed() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.program == "git" && cmd.args == ["--version"])
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("git version 2.43.0")));
        assert!(resolver(MockJsonFetcher::new(), runner).is_git_installed().await);
    }

    #[tokio::test]
    async fn test_git_missing_or_failing_is_false() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Err(io::Error::new(io::ErrorKind::NotFound, "no such file")));
        assert!(!resolver(MockJsonFetcher::new(), runner).is_git_installed().await);

        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| Ok(CommandOutput::failed(127, "not found")));
        assert!(!resolver(MockJsonFetcher::new(), runner).is_git_installed().await);
    }

    #[tokio::test]
    async fn test_get_repository_info() {
        let mut fetcher = MockJsonFetcher::new();
        fetcher
            .expect_get_json()
            .withf(|url| url == "https://api.test/repos/facebook/react")
            .times(1)
            .returning(|_| Ok(react_payload()));

        let reference = parse_github_url("facebook/react").unwrap();
        let meta = resolver(fetcher, MockCommandRunner::new())
            .get_repository_info(&reference)
            .await
            .unwrap();

        assert_eq!(meta.full_name, "facebook/react");
        assert_eq!(meta.stars, 230000);
        assert_eq!(meta.forks, 47000);
        assert_eq!(meta.size_kb, 1024);
        assert_eq!(meta.primary_language.as_deref(), Some("JavaScript"));
        assert_eq!(meta.updated_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[tokio::test]
    async fn test_get_repository_info_network_error() {
        let mut fetcher = MockJsonFetcher::new();
        fetcher
            .expect_get_json()
            .times(1)
            .returning(|_| Err(HttpError::Transport("connection refused".to_string())));

        let reference = parse_github_url("facebook/react").unwrap();
        let err = resolver(fetcher, MockCommandRunner::new())
            .get_repository_info(&reference)
            .await
            .unwrap_err();
        match err {
            RemoteError::Network(msg) => assert!(msg.contains("connection refused")),
            other => panic!("expected network error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_repository_info_not_found_is_network_error() {
        let mut fetcher = MockJsonFetcher::new();
        fetcher.expect_get_json().returning(|url| {
            Err(HttpError::Status { url: url.to_string(), status: 404 })
        });

        let reference = parse_github_url("ghost/missing").unwrap();
        let err = resolver(fetcher, MockCommandRunner::new())
            .get_repository_info(&reference)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Network(ref msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn test_get_repository_info_malformed() {
        let mut fetcher = MockJsonFetcher::new();
        fetcher
            .expect_get_json()
            .returning(|_| Err(HttpError::MalformedJson("expected value".to_string())));
        let reference = parse_github_url("facebook/react").unwrap();
        let err = resolver(fetcher, MockCommandRunner::new())
            .get_repository_info(&reference)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::MalformedResponse(_)));

        let mut fetcher = MockJsonFetcher::new();
        fetcher.expect_get_json().returning(|_| Ok(json!({"full_name": "facebook/react"})));
        let err = resolver(fetcher, MockCommandRunner::new())
            .get_repository_info(&reference)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_clone_repository() {
        let temp = tempfile::TempDir::new().unwrap();
        let target = temp.path().join("react");

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| {
                cmd.program == "git"
                    && cmd.args.starts_with(&["clone".to_string(), "--depth".to_string()])
                    && cmd.args.contains(&"https://github.com/facebook/react.git".to_string())
                    && cmd.args.contains(&"canary".to_string())
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));

        let reference = parse_github_url("https://github.com/facebook/react/tree/canary").unwrap();
        let path = resolver(MockJsonFetcher::new(), runner)
            .clone_repository(&reference, &target)
            .await
            .unwrap();
        assert_eq!(path, target);
    }

    #[tokio::test]
    async fn test_clone_failure_and_occupied_target() {
        let temp = tempfile::TempDir::new().unwrap();
        let reference = parse_github_url("facebook/react").unwrap();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failed(128, "Remote branch main not found\n")));
        let err = resolver(MockJsonFetcher::new(), runner)
            .clone_repository(&reference, &temp.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Git(ref msg) if msg.ends_with("not found")));

        std::fs::write(temp.path().join("keep.txt"), "data").unwrap();
        let err = resolver(MockJsonFetcher::new(), MockCommandRunner::new())
            .clone_repository(&reference, temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Io(_)));
        assert!(temp.path().join("keep.txt").exists());
    }
}
