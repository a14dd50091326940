//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Keep a local directory synchronized against a server-published manifest.
///
/// PatchSync compares each manifest entry's content hash against the local
/// tree and downloads only missing or stale files, in parallel byte-range
/// segments with resume support.
#[derive(Parser, Debug)]
#[command(name = "patchsync")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a config file (default: $XDG_CONFIG_HOME/patchsync/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synchronize the target directory against the remote manifest
    Sync(SyncArgs),

    /// Generate a manifest for a local directory tree
    GenManifest(GenManifestArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Base URL the manifest's relative paths are served under
    #[arg(long)]
    pub server_url: Option<String>,

    /// Full URL of the manifest document
    #[arg(long)]
    pub manifest_url: Option<String>,

    /// Local directory to keep in sync
    #[arg(short = 't', long)]
    pub target: Option<PathBuf>,

    /// Maximum concurrent file downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Total attempts per file, including the first (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub retries: Option<u8>,

    /// Maximum concurrent segments per file (1-64)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub segments: Option<u8>,

    /// Download speed limit in bytes per second (0 disables)
    #[arg(long)]
    pub speed_limit: Option<u64>,

    /// Per-request timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Print the status report as JSON instead of a human summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GenManifestArgs {
    /// Directory tree to hash into a manifest
    #[arg(short = 't', long)]
    pub target: PathBuf,

    /// Output manifest path
    #[arg(short = 'o', long, default_value = "patchlist.txt")]
    pub output: PathBuf,

    /// File or directory names to exclude (repeatable)
    #[arg(short = 'e', long = "exclude")]
    pub exclusions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_sync_defaults_parse() {
        let cli = Cli::try_parse_from(["patchsync", "sync"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        let Command::Sync(args) = cli.command else {
            panic!("expected sync subcommand");
        };
        assert!(args.server_url.is_none());
        assert!(args.concurrency.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["patchsync", "-vv", "sync"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "patchsync",
            "sync",
            "--server-url",
            "https://example.com/files/",
            "--manifest-url",
            "https://example.com/patchlist.txt",
            "-t",
            "/tmp/patch",
            "-c",
            "8",
            "-r",
            "5",
            "--segments",
            "6",
            "--speed-limit",
            "1048576",
            "--json",
        ])
        .unwrap();
        let Command::Sync(args) = cli.command else {
            panic!("expected sync subcommand");
        };
        assert_eq!(args.server_url.as_deref(), Some("https://example.com/files/"));
        assert_eq!(args.concurrency, Some(8));
        assert_eq!(args.retries, Some(5));
        assert_eq!(args.segments, Some(6));
        assert_eq!(args.speed_limit, Some(1_048_576));
        assert!(args.json);
    }

    #[test]
    fn test_cli_concurrency_out_of_range_rejected() {
        let result = Cli::try_parse_from(["patchsync", "sync", "-c", "0"]);
        assert!(result.is_err());
        let result = Cli::try_parse_from(["patchsync", "sync", "-c", "101"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_gen_manifest_parses() {
        let cli = Cli::try_parse_from([
            "patchsync",
            "gen-manifest",
            "-t",
            "/srv/release",
            "-o",
            "out.txt",
            "-e",
            ".cache",
            "-e",
            "notes.md",
        ])
        .unwrap();
        let Command::GenManifest(args) = cli.command else {
            panic!("expected gen-manifest subcommand");
        };
        assert_eq!(args.target, PathBuf::from("/srv/release"));
        assert_eq!(args.output, PathBuf::from("out.txt"));
        assert_eq!(args.exclusions, vec![".cache", "notes.md"]);
    }

    #[test]
    fn test_cli_gen_manifest_default_output() {
        let cli = Cli::try_parse_from(["patchsync", "gen-manifest", "-t", "/srv/release"]).unwrap();
        let Command::GenManifest(args) = cli.command else {
            panic!("expected gen-manifest subcommand");
        };
        assert_eq!(args.output, PathBuf::from("patchlist.txt"));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Cli::try_parse_from(["patchsync", "--help"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_missing_subcommand_errors() {
        let result = Cli::try_parse_from(["patchsync"]);
        assert!(result.is_err());
    }
}
