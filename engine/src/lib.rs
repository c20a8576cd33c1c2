//! repodigest Engine - integration and resilience layer
//!
//! The parts of repodigest that talk to things which may be slow, absent or
//! wrong, and must degrade instead of crashing the CLI:
//!
//! - Token accounting with lazily-built exact tokenizers and a deterministic
//!   estimation fallback
//! - Repository identifier parsing, host metadata lookups and shallow clones
//! - Self-update with installation detection and post-update verification
//!
//! # Example
//!
//! ```rust,ignore
//! use repodigest_engine::{parse_github_url, TokenService};
//!
//! let reference = parse_github_url("https://github.com/facebook/react")?;
//! let service = TokenService::new();
//! let tokens = service.calculate_for_model("fn main() {}", "gpt-4o").await;
//! ```

pub mod config;
pub mod http;
pub mod process;
pub mod remote;
pub mod tokenizer;
pub mod types;
pub mod update;

pub use config::{Config, ConfigError, HttpConfig, RemoteConfig, TokenizerConfig, UpdateConfig};
pub use http::{HttpClient, HttpError, JsonFetcher};
pub use process::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use remote::{is_remote_reference, parse_github_url, RemoteError, RepositoryResolver};
pub use tokenizer::{
    estimate_tokens, BackendError, BackendManager, TelemetryCounters, TelemetrySnapshot,
    TokenCount, TokenService, TokenizerBackend,
};
pub use types::*;
pub use update::{
    classify_installation, InstallProbe, RegistryVersionSource, UpdateError, UpdateManager,
    VersionSource,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Model used when the caller names none
pub const DEFAULT_MODEL: &str = "gpt-4o";
