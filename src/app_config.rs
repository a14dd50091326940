//! Application configuration loading for CLI defaults.
//!
//! Reads an optional `key = value` config file (a TOML subset: string,
//! integer, and boolean literals, `#` comments) and merges it underneath
//! CLI flags. Unknown keys are rejected so typos surface at startup.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// File-backed defaults for the sync command.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Base URL the manifest's relative paths are served under.
    pub server_url: Option<String>,
    /// Full URL of the manifest document.
    pub manifest_url: Option<String>,
    /// Local directory to keep in sync.
    pub target_dir: Option<PathBuf>,
    /// Default whole-file concurrency (same range as the CLI flag).
    pub concurrency: Option<u8>,
    /// Default attempts per file.
    pub retries: Option<u8>,
    /// Default concurrent segments per file.
    pub segments: Option<u8>,
    /// Default speed limit in bytes per second.
    pub speed_limit: Option<u64>,
    /// Default per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Age in seconds after which stale progress records are swept.
    pub progress_max_age_secs: Option<u64>,
}

impl FileConfig {
    /// Validates config values against the same ranges the CLI enforces.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }
        if let Some(retries) = self.retries
            && !(1..=10).contains(&retries)
        {
            bail!("Invalid config value for `retries`: {retries}. Expected range: 1..=10");
        }
        if let Some(segments) = self.segments
            && !(1..=64).contains(&segments)
        {
            bail!("Invalid config value for `segments`: {segments}. Expected range: 1..=64");
        }
        if let Some(timeout) = self.timeout_secs
            && !(1..=3600).contains(&timeout)
        {
            bail!("Invalid config value for `timeout_secs`: {timeout}. Expected range: 1..=3600");
        }
        Ok(())
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/patchsync/config.toml`
/// 2. `$HOME/.config/patchsync/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("patchsync")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("patchsync")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from an explicit path, or the default path if present.
///
/// A missing default file is not an error; an explicit path must exist.
pub fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => match resolve_default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config = parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();

        match key {
            "server_url" => {
                cfg.server_url = Some(parse_string_literal(value).with_context(|| {
                    format!("Invalid `server_url` value on line {}", line_index + 1)
                })?);
            }
            "manifest_url" => {
                cfg.manifest_url = Some(parse_string_literal(value).with_context(|| {
                    format!("Invalid `manifest_url` value on line {}", line_index + 1)
                })?);
            }
            "target_dir" => {
                let parsed = parse_string_literal(value).with_context(|| {
                    format!("Invalid `target_dir` value on line {}", line_index + 1)
                })?;
                cfg.target_dir = Some(PathBuf::from(parsed));
            }
            "concurrency" => {
                cfg.concurrency = Some(parse_integer_u8(value).with_context(|| {
                    format!("Invalid `concurrency` value on line {}", line_index + 1)
                })?);
            }
            "retries" => {
                cfg.retries = Some(parse_integer_u8(value).with_context(|| {
                    format!("Invalid `retries` value on line {}", line_index + 1)
                })?);
            }
            "segments" => {
                cfg.segments = Some(parse_integer_u8(value).with_context(|| {
                    format!("Invalid `segments` value on line {}", line_index + 1)
                })?);
            }
            "speed_limit" => {
                cfg.speed_limit = Some(parse_integer_u64(value).with_context(|| {
                    format!("Invalid `speed_limit` value on line {}", line_index + 1)
                })?);
            }
            "timeout_secs" => {
                cfg.timeout_secs = Some(parse_integer_u64(value).with_context(|| {
                    format!("Invalid `timeout_secs` value on line {}", line_index + 1)
                })?);
            }
            "progress_max_age_secs" => {
                cfg.progress_max_age_secs = Some(parse_integer_u64(value).with_context(|| {
                    format!(
                        "Invalid `progress_max_age_secs` value on line {}",
                        line_index + 1
                    )
                })?);
            }
            other => bail!("Unknown config key `{other}` on line {}", line_index + 1),
        }
    }
    Ok(cfg)
}

/// Drops a trailing `#` comment unless it is inside a quoted string.
fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, character) in line.char_indices() {
        match character {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return Ok(trimmed[1..trimmed.len() - 1].to_string());
    }
    bail!("expected a double-quoted string, got `{trimmed}`");
}

fn parse_integer_u8(value: &str) -> Result<u8> {
    value
        .trim()
        .parse::<u8>()
        .with_context(|| format!("expected an integer, got `{value}`"))
}

fn parse_integer_u64(value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("expected an integer, got `{value}`"))
}
