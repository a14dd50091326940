//! Manifest parsing: the server's list of expected files and content hashes.
//!
//! # Wire format
//!
//! UTF-8 text, one `relativePath,hexHash` entry per line; blank lines are
//! ignored. The format has no escaping: the first comma splits the line,
//! so paths containing commas are unsupported (the spilled remainder fails
//! hash validation and the line is reported as malformed rather than
//! silently special-cased).

mod generate;

pub use generate::{GenerateError, generate_manifest, write_manifest};

use tracing::{debug, warn};

/// One expected file: where it lives relative to the target directory and
/// the SHA-256 hash its contents must have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the sync target directory.
    pub relative_path: String,
    /// Expected lowercase hex SHA-256 digest.
    pub expected_hash: String,
}

/// Result of parsing a manifest document.
///
/// Malformed lines are captured rather than dropped so the orchestrator
/// can report them as failures without attempting any network action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedManifest {
    /// Well-formed entries in manifest order.
    pub entries: Vec<ManifestEntry>,
    /// Raw text of lines that could not be parsed.
    pub malformed: Vec<String>,
}

/// Length of a hex-encoded SHA-256 digest.
const HASH_HEX_LEN: usize = 64;

/// Parses a manifest document.
///
/// A line is well-formed when it splits on its first comma into a
/// non-empty path and a 64-character hex digest. Entries are unique by
/// path; later duplicates are ignored with a log line.
#[must_use]
pub fn parse_manifest(text: &str) -> ParsedManifest {
    let mut parsed = ParsedManifest::default();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((path, hash)) = line.split_once(',') else {
            warn!(line, "manifest line has no path,hash separator");
            parsed.malformed.push(line.to_string());
            continue;
        };

        let path = path.trim();
        let hash = hash.trim();
        if path.is_empty() || !is_hex_digest(hash) {
            warn!(line, "manifest line has an empty path or malformed hash");
            parsed.malformed.push(line.to_string());
            continue;
        }

        if parsed
            .entries
            .iter()
            .any(|entry| entry.relative_path == path)
        {
            debug!(path, "duplicate manifest entry ignored");
            continue;
        }

        parsed.entries.push(ManifestEntry {
            relative_path: path.to_string(),
            expected_hash: hash.to_ascii_lowercase(),
        });
    }

    parsed
}

fn is_hex_digest(value: &str) -> bool {
    value.len() == HASH_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}
