//! File collection for token accounting
//!
//! Walks a directory with the `ignore` crate (respects .gitignore), skips
//! binaries and oversized files, and reads the rest in parallel with rayon.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Configuration for file collection
pub(crate) struct ScanConfig {
    /// Include hidden files (starting with .)
    pub(crate) include_hidden: bool,
    /// Respect .gitignore files
    pub(crate) respect_gitignore: bool,
    /// Maximum file size to include (bytes)
    pub(crate) max_file_size: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_hidden: false,
            respect_gitignore: true,
            max_file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// A text file and its content
pub(crate) struct ScannedFile {
    pub(crate) relative_path: String,
    pub(crate) content: String,
}

/// Collect readable text files under `base_path`, sorted by path
pub(crate) fn scan_files(base_path: &Path, config: &ScanConfig) -> Result<Vec<ScannedFile>> {
    let base_path = base_path
        .canonicalize()
        .with_context(|| format!("Invalid path: {}", base_path.display()))?;

    if base_path.is_file() {
        let name = base_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(read_text(&base_path)
            .map(|content| ScannedFile { relative_path: name, content })
            .into_iter()
            .collect());
    }

    let paths = collect_paths(&base_path, config);
    log::debug!("Found {} candidate files under {}", paths.len(), base_path.display());

    let mut files: Vec<ScannedFile> = paths
        .par_iter()
        .filter_map(|path| {
            let content = read_text(path)?;
            let relative_path = path
                .strip_prefix(&base_path)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            Some(ScannedFile { relative_path, content })
        })
        .collect();

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

fn collect_paths(base_path: &Path, config: &ScanConfig) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(base_path)
        .hidden(!config.include_hidden)
        .git_ignore(config.respect_gitignore)
        .git_global(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter(|entry| {
            entry
                .metadata()
                .map(|m| m.len() <= config.max_file_size)
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .filter(|path| !is_binary_extension(path))
        .collect()
}

/// Read a file as UTF-8 text; None for unreadable or binary content
fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.iter().take(8192).any(|b| *b == 0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

fn is_binary_extension(path: &Path) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_lowercase(),
        None => return false,
    };

    matches!(
        ext.as_str(),
        // Executables
        "exe" | "dll" | "so" | "dylib" | "a" | "o" | "obj" | "lib" |
        // Compiled
        "pyc" | "pyo" | "class" | "jar" | "wasm" |
        // Archives
        "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar" | "tgz" |
        // Images
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp" | "tiff" | "psd" |
        // Audio/Video
        "mp3" | "mp4" | "avi" | "mov" | "wav" | "flac" | "ogg" | "webm" | "mkv" |
        // Documents
        "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" |
        // Fonts
        "ttf" | "otf" | "woff" | "woff2"
    )
}
