use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::{
    chunking::Document,
    error::{Error, Result},
};

/// Patterns used when the caller does not supply any.
pub const DEFAULT_PATTERNS: &[&str] = &["**/*.md", "**/*.txt"];

/// A discovered document file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the ingestion root, with `/` separators.
    pub relative_path: String,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

/// Compile glob patterns matched against root-relative paths.
///
/// An empty pattern list falls back to [`DEFAULT_PATTERNS`].
pub fn build_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    if patterns.is_empty() {
        for pattern in DEFAULT_PATTERNS {
            builder.add(parse_glob(pattern)?);
        }
    } else {
        for pattern in patterns {
            builder.add(parse_glob(pattern.as_ref())?);
        }
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob patterns: {e}")))
}

fn parse_glob(pattern: &str) -> Result<Glob> {
    Glob::new(pattern)
        .map_err(|e| Error::Config(format!("invalid glob pattern {pattern:?}: {e}")))
}

/// Recursively walk a directory and discover files matching `patterns`.
///
/// Skips hidden files/directories (names starting with `.`). Results are
/// sorted by relative path.
pub fn discover_files(root: &Path, patterns: &GlobSet) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, patterns, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    patterns: &GlobSet,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, patterns, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                debug!(path = %path.display(), "skipping broken symlink");
                continue;
            };
            // Links to directories are not followed.
            if resolved.is_file()
                && let Some(df) = make_discovered(root, &path, &resolved, patterns)?
            {
                results.push(df);
            }
        } else if file_type.is_file()
            && let Some(df) = make_discovered(root, &path, &path, patterns)?
        {
            results.push(df);
        }
    }

    Ok(())
}

fn relative_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    target: &Path,
    patterns: &GlobSet,
) -> Result<Option<DiscoveredFile>> {
    let relative_path = relative_string(root, original_path);
    if !patterns.is_match(&relative_path) {
        return Ok(None);
    }

    let mtime = std::fs::metadata(target)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(Some(DiscoveredFile {
        relative_path,
        absolute_path: target.canonicalize()?,
        mtime,
    }))
}

/// Read a discovered file as a [`Document`] keyed by its relative path.
///
/// Invalid UTF-8 is replaced rather than rejected. Returns `None` for files
/// with no non-whitespace content.
pub fn load_document(file: &DiscoveredFile) -> Result<Option<Document>> {
    let bytes = std::fs::read(&file.absolute_path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        debug!(path = %file.relative_path, "skipping blank document");
        return Ok(None);
    }
    Ok(Some(Document::new(file.relative_path.clone(), text)))
}
