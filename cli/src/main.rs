//! repodigest CLI - token accounting, repository lookup and self-update
//!
//! Thin shell over `repodigest-engine`: parses arguments, loads configuration,
//! calls the engine and renders what comes back.

// CLI tools legitimately use print macros for user output
#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use humansize::{format_size, BINARY};
use std::path::{Path, PathBuf};
use std::time::Instant;

mod scanner;

use repodigest_engine::{
    is_remote_reference, parse_github_url, Config, RepositoryResolver, TokenService,
    UpdateManager, DEFAULT_MODEL,
};

/// repodigest - token-budgeted repository digests for LLMs
#[derive(Parser)]
#[command(
    name = "repodigest",
    version,
    about = "Measure, fetch and maintain repository digests for LLMs",
    long_about = "repodigest measures repository content in model tokens, resolves remote\nrepositories, and keeps itself up to date."
)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (default: .repodigest.{toml,yaml,json} in current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count tokens for every file under a path or remote repository
    Tokens {
        /// Local path or repository identifier (default: current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Model to count for (omit for the model-independent estimate)
        #[arg(short, long)]
        model: Option<String>,

        /// Include hidden files
        #[arg(long)]
        hidden: bool,

        /// Don't respect .gitignore
        #[arg(long)]
        no_gitignore: bool,

        /// Limit number of files listed (0 = all)
        #[arg(long, default_value = "20")]
        top: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show tokenizer backends, model routing and call counters
    Tokenizers {
        /// Model to resolve
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a repository identifier, optionally fetching live metadata
    Repo {
        /// https URL, git@host:owner/repo.git, or owner/repo
        identifier: String,

        /// Fetch metadata from the repository host
        #[arg(long)]
        info: bool,

        /// Shallow-clone into this directory
        #[arg(long)]
        clone: Option<PathBuf>,

        /// Branch to clone instead of the parsed one
        #[arg(long)]
        branch: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check for a newer release and install it
    Update {
        /// Only check, don't install
        #[arg(long)]
        check: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write it to .repodigest.toml in the current directory
        #[arg(long)]
        init: bool,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Tokens { path, model, hidden, no_gitignore, top, json } => {
            let scan = scanner::ScanConfig {
                include_hidden: hidden,
                respect_gitignore: !no_gitignore,
                ..Default::default()
            };
            cmd_tokens(&config, &path, model.as_deref(), scan, top, json).await
        }
        Commands::Tokenizers { model, json } => cmd_tokenizers(&config, &model, json).await,
        Commands::Repo { identifier, info, clone, branch, json } => {
            cmd_repo(&config, &identifier, info, clone, branch, json).await
        }
        Commands::Update { check, json } => cmd_update(&config, check, json).await,
        Commands::Config { init, force } => cmd_config(&config, init, force),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            Config::load(&cwd).context("Failed to load configuration")
        }
    }
}

async fn cmd_tokens(
    config: &Config,
    target: &str,
    model: Option<&str>,
    scan: scanner::ScanConfig,
    top: usize,
    json_output: bool,
) -> Result<()> {
    let start = Instant::now();

    // Remote identifiers are cloned into a temp dir that lives until we return
    let (root, _temp_dir) = if is_remote_reference(target) {
        let resolver =
            RepositoryResolver::from_config(config).context("Failed to set up repository access")?;
        let reference = parse_github_url(target)?;
        if !resolver.is_git_installed().await {
            bail!("git is required to fetch {} but was not found", reference.full_name);
        }
        let temp = tempfile::TempDir::new().context("Failed to create temp directory")?;
        let cloned = resolver
            .clone_repository(&reference, &temp.path().join(&reference.repo))
            .await
            .context("Failed to clone repository")?;
        (cloned, Some(temp))
    } else {
        (PathBuf::from(target), None)
    };

    let files = scanner::scan_files(&root, &scan).context("Failed to scan files")?;
    let service = TokenService::from_config(&config.tokenizer);

    let mut rows = Vec::with_capacity(files.len());
    let mut estimated_files = 0usize;
    for file in &files {
        let tokens = match model {
            Some(model) => {
                let count = service.count_for_model(&file.content, model).await;
                if count.is_estimated() {
                    estimated_files += 1;
                }
                count.tokens()
            }
            None => {
                estimated_files += 1;
                service.calculate(&file.content, &file.relative_path)
            }
        };
        rows.push((file.relative_path.as_str(), tokens, file.content.len()));
    }
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let total_tokens: u64 = rows.iter().map(|r| u64::from(r.1)).sum();
    let total_bytes: usize = rows.iter().map(|r| r.2).sum();
    let method = match model {
        Some(model) => service.get_method_for_model(model).await,
        None => repodigest_engine::tokenizer::estimation_label(),
    };
    let shown = if top == 0 { rows.len() } else { top.min(rows.len()) };

    if json_output {
        let report = serde_json::json!({
            "path": target,
            "model": model,
            "method": method,
            "files": rows.iter().map(|(path, tokens, bytes)| serde_json::json!({
                "path": path,
                "tokens": tokens,
                "bytes": bytes,
            })).collect::<Vec<_>>(),
            "total_files": rows.len(),
            "total_tokens": total_tokens,
            "estimated_files": estimated_files,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{}", "─".repeat(50).dimmed());
    println!("  {}", "Token Counts".cyan().bold());
    println!("{}", "─".repeat(50).dimmed());
    println!();
    println!("  Path:         {}", target.yellow());
    println!("  Method:       {}", method);
    println!("  Files:        {}", rows.len());
    println!("  Total Size:   {}", format_size(total_bytes, BINARY));
    println!("  Total Tokens: {}", total_tokens.to_string().green().bold());
    if model.is_some() && estimated_files > 0 {
        println!("  Estimated:    {} of {} files", estimated_files, rows.len());
    }
    println!("  Time:         {:?}", start.elapsed());
    println!();

    if shown > 0 {
        println!("  {}:", "Largest Files".cyan());
        for (path, tokens, _) in rows.iter().take(shown) {
            println!("    {:>8}  {}", tokens, path);
        }
        if shown < rows.len() {
            println!("    {} more", format!("... {}", rows.len() - shown).dimmed());
        }
        println!();
    }

    Ok(())
}

async fn cmd_tokenizers(config: &Config, model: &str, json_output: bool) -> Result<()> {
    let service = TokenService::from_config(&config.tokenizer);
    let available = service.get_available_tokenizers().await;
    let detected = service.detect_tokenizer(model).await;
    let method = service.get_method_for_model(model).await;
    let telemetry = service.get_telemetry().await;

    if json_output {
        let report = serde_json::json!({
            "available": available,
            "model": model,
            "detected": detected,
            "method": method,
            "telemetry": telemetry,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("  {}:", "Available Tokenizers".cyan());
    for name in &available {
        println!("    {}", name);
    }
    println!();
    println!("  Model:    {}", model.yellow());
    println!("  Backend:  {}", detected);
    println!("  Method:   {}", method);
    for (name, counters) in &telemetry.backends {
        println!(
            "  {}: {} calls, {} errors, {} estimated",
            name, counters.call_count, counters.error_count, counters.estimation_fallback_count
        );
    }

    Ok(())
}

async fn cmd_repo(
    config: &Config,
    identifier: &str,
    fetch_info: bool,
    clone: Option<PathBuf>,
    branch: Option<String>,
    json_output: bool,
) -> Result<()> {
    let mut reference = parse_github_url(identifier)?;
    if let Some(branch) = branch {
        reference = reference.with_branch(branch);
    }

    let resolver = RepositoryResolver::from_config(config)
        .context("Failed to set up repository access")?;

    let metadata = if fetch_info {
        Some(
            resolver
                .get_repository_info(&reference)
                .await
                .with_context(|| format!("Failed to fetch metadata for {}", reference.full_name))?,
        )
    } else {
        None
    };

    let git_installed = if fetch_info || clone.is_some() {
        Some(resolver.is_git_installed().await)
    } else {
        None
    };

    let cloned = match clone {
        Some(target) => {
            if git_installed == Some(false) {
                bail!("git is required to clone {} but was not found", reference.full_name);
            }
            Some(resolver.clone_repository(&reference, &target).await?)
        }
        None => None,
    };

    if json_output {
        let report = serde_json::json!({
            "reference": reference,
            "clone_url": reference.clone_url(),
            "git_installed": git_installed,
            "metadata": metadata,
            "cloned_to": cloned,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("  Repository:   {}", reference.full_name.yellow());
    println!("  Owner:        {}", reference.owner);
    println!("  Name:         {}", reference.repo);
    println!("  Branch:       {}", reference.branch);
    println!("  Host:         {}", reference.host);
    println!("  Clone URL:    {}", reference.clone_url());
    if let Some(installed) = git_installed {
        let status = if installed { "yes".green() } else { "no".red() };
        println!("  Git:          {}", status);
    }
    if let Some(meta) = metadata {
        println!();
        println!("  {}:", "Metadata".cyan());
        if let Some(ref description) = meta.description {
            println!("    {}", description);
        }
        println!("    Stars:          {}", meta.stars);
        println!("    Forks:          {}", meta.forks);
        println!("    Default branch: {}", meta.default_branch);
        println!("    Size:           {}", format_size(meta.size_kb * 1024, BINARY));
        println!("    Language:       {}", meta.primary_language.as_deref().unwrap_or("-"));
        println!("    Updated:        {}", meta.updated_at.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(path) = cloned {
        println!("  Cloned to:    {}", path.display());
    }

    Ok(())
}

async fn cmd_update(config: &Config, check_only: bool, json_output: bool) -> Result<()> {
    let manager = UpdateManager::from_config(config).context("Failed to set up updater")?;
    let check = manager.check_for_updates().await;

    let info = match check.update_info() {
        Some(info) if !check_only => info,
        _ => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else if let Some(ref error) = check.error {
                println!("{} {}", "Update check failed:".yellow(), error);
            } else if let Some(ref message) = check.message {
                let line = if check.available { message.green() } else { message.normal() };
                println!("{}", line);
            }
            return Ok(());
        }
    };

    if !json_output {
        println!(
            "Updating {} -> {}...",
            info.current_version,
            info.latest_version.green()
        );
    }
    let result = manager.install_update(&info).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.success {
        println!("{} Now running {}", "Updated.".green().bold(), info.latest_version);
    } else if result.manual_update_required {
        println!("{}", "Automatic update not possible.".yellow().bold());
        if let Some(ref error) = result.error {
            println!("  {}", error);
        }
        if let Some(ref instructions) = result.instructions {
            println!("  {}", instructions);
        }
    } else {
        if let Some(ref instructions) = result.instructions {
            eprintln!("  {}", instructions);
        }
        bail!("{}", result.error.as_deref().unwrap_or("Update failed"));
    }

    Ok(())
}

fn cmd_config(config: &Config, init: bool, force: bool) -> Result<()> {
    let rendered = config.to_toml()?;
    if !init {
        print!("{}", rendered);
        return Ok(());
    }

    let path = PathBuf::from(".repodigest.toml");
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(&path, rendered)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display().to_string().green());
    Ok(())
}
