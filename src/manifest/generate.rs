//! Manifest generation: hash a local tree into `path,hash` lines.
//!
//! The server-side counterpart of the sync client. Walks a directory,
//! hashes every regular file, and emits one manifest line per file with
//! `/`-separated relative paths, sorted for deterministic output. The
//! client's own transient artifacts (`.progress`, `.part<N>`) and common
//! tooling directories are skipped.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::hash::{HashError, hash_file};
use crate::progress::PROGRESS_SUFFIX;

/// Directory and file names skipped in every walk.
const DEFAULT_EXCLUSIONS: &[&str] = &[".git", ".DS_Store", ".vscode", ".idea"];

/// Errors producing a manifest from a local tree.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The target folder does not exist.
    #[error("target folder does not exist: {path}")]
    MissingTarget {
        /// The folder that was requested.
        path: PathBuf,
    },

    /// File system error while walking or writing.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A file could not be hashed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Walks `target` and returns sorted `path,hash` manifest lines.
///
/// `exclusions` are additional file or directory names to skip, matched
/// exactly against the final path component.
///
/// # Errors
///
/// Returns [`GenerateError`] when the target is missing or a file cannot
/// be read or hashed.
pub async fn generate_manifest(
    target: &Path,
    exclusions: &[String],
) -> Result<Vec<String>, GenerateError> {
    if !target.is_dir() {
        return Err(GenerateError::MissingTarget {
            path: target.to_path_buf(),
        });
    }

    let mut lines = Vec::new();
    let mut pending = vec![target.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| GenerateError::Io {
            path: dir.clone(),
            source: e,
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| GenerateError::Io {
            path: dir.clone(),
            source: e,
        })? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if is_excluded(&name, exclusions) {
                debug!(path = %path.display(), "excluded from manifest");
                continue;
            }

            let file_type = entry.file_type().await.map_err(|e| GenerateError::Io {
                path: path.clone(),
                source: e,
            })?;

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let digest = hash_file(&path).await?;
                lines.push(format!("{},{digest}", relative_manifest_path(target, &path)));
            }
        }
    }

    lines.sort();
    info!(files = lines.len(), target = %target.display(), "manifest generated");
    Ok(lines)
}

/// Writes manifest lines to `output`, one per line, creating parent
/// directories as needed.
///
/// # Errors
///
/// Returns [`GenerateError::Io`] on any write failure.
pub async fn write_manifest(lines: &[String], output: &Path) -> Result<(), GenerateError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GenerateError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
    }

    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    tokio::fs::write(output, contents)
        .await
        .map_err(|e| GenerateError::Io {
            path: output.to_path_buf(),
            source: e,
        })?;

    info!(path = %output.display(), entries = lines.len(), "manifest written");
    Ok(())
}

fn is_excluded(name: &str, exclusions: &[String]) -> bool {
    DEFAULT_EXCLUSIONS.contains(&name)
        || exclusions.iter().any(|excluded| excluded == name)
        || is_transient_artifact(name)
}

/// Whether a filename is one of the client's own sidecar artifacts.
fn is_transient_artifact(name: &str) -> bool {
    if name.ends_with(PROGRESS_SUFFIX) {
        return true;
    }
    if let Some(position) = name.rfind(".part") {
        let suffix = &name[position + ".part".len()..];
        return !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit());
    }
    false
}

/// Relative path with `/` separators regardless of platform.
fn relative_manifest_path(target: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(target).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
