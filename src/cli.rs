//! Command-line interface parsing for bffcache
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! a validated [`StartupConfig`]: the source table to use, which sources to
//! warm, and how often.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheError;
use crate::refresh::RefreshConfig;
use crate::sources::SourcesConfig;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// A numeric option that must be positive was zero
    #[error("Invalid value for --{0}: must be greater than zero")]
    NotPositive(&'static str),

    /// The source table could not be loaded or filtered
    #[error(transparent)]
    Sources(#[from] CacheError),
}

/// bffcache - warm and inspect a stale-while-revalidate source cache
#[derive(Parser, Debug)]
#[command(name = "bffcache")]
#[command(about = "Stale-while-revalidate cache for backend-for-frontend data sources")]
#[command(version)]
pub struct Cli {
    /// JSON source table to use instead of the built-in one
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only warm the given source (repeatable)
    #[arg(long = "only", value_name = "KEY")]
    pub only: Vec<String>,

    /// Number of warming passes to run
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub rounds: u64,

    /// Seconds between warming passes
    #[arg(long, default_value_t = 60, value_name = "SECS")]
    pub interval: u64,

    /// Override the upstream fetch timeout, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the source table and exit
    #[arg(long)]
    pub list: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    pub log_level: String,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Sources to serve and warm
    pub sources: SourcesConfig,
    /// Warming loop settings
    pub refresh: RefreshConfig,
    /// Whether to print the table and exit
    pub list_only: bool,
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with the loaded and filtered source table
    /// * `Err(CliError)` if an option is out of range or the table is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.rounds == 0 {
            return Err(CliError::NotPositive("rounds"));
        }
        if cli.interval == 0 {
            return Err(CliError::NotPositive("interval"));
        }
        if cli.timeout == Some(0) {
            return Err(CliError::NotPositive("timeout"));
        }

        let mut sources = match &cli.config {
            Some(path) => SourcesConfig::load(path)?,
            None => SourcesConfig::default(),
        };
        if let Some(timeout) = cli.timeout {
            sources.fetch_timeout_secs = timeout;
        }
        sources.retain_keys(&cli.only)?;

        Ok(StartupConfig {
            sources,
            refresh: RefreshConfig {
                interval: Duration::from_secs(cli.interval),
                cycles: Some(cli.rounds),
                enabled: true,
            },
            list_only: cli.list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::parse_from(["bffcache"]);
        assert!(cli.config.is_none());
        assert!(cli.only.is_empty());
        assert_eq!(cli.rounds, 1);
        assert_eq!(cli.interval, 60);
        assert!(!cli.list);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_parse_repeated_only() {
        let cli = Cli::parse_from(["bffcache", "--only", "rss", "--only", "sitemap"]);
        assert_eq!(cli.only, vec!["rss", "sitemap"]);
    }

    #[test]
    fn test_startup_config_defaults() {
        let cli = Cli::parse_from(["bffcache"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.sources, SourcesConfig::default());
        assert_eq!(config.refresh.cycles, Some(1));
        assert_eq!(config.refresh.interval, Duration::from_secs(60));
        assert!(!config.list_only);
    }

    #[test]
    fn test_startup_config_timeout_override() {
        let cli = Cli::parse_from(["bffcache", "--timeout", "5", "--only", "gtag"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.sources.fetch_timeout_secs, 5);
        assert_eq!(config.sources.sources.len(), 1);
        assert_eq!(config.sources.sources[0].key, "gtag");
    }

    #[test]
    fn test_startup_config_rejects_zero_rounds() {
        let cli = Cli::parse_from(["bffcache", "--rounds", "0"]);
        let err = StartupConfig::from_cli(&cli).unwrap_err();
        assert!(err.to_string().contains("--rounds"));
    }

    #[test]
    fn test_startup_config_unknown_source() {
        let cli = Cli::parse_from(["bffcache", "--only", "myspace"]);
        let err = StartupConfig::from_cli(&cli).unwrap_err();
        assert!(err.to_string().contains("myspace"));
    }

    #[test]
    fn test_startup_config_from_file() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        write!(
            file,
            r#"{{"sources": [{{ "key": "rss", "age_secs": 3600, "url": "http://localhost/rss.xml" }}]}}"#
        )
        .expect("write config");
        let path = file.path().to_string_lossy().to_string();

        let cli = Cli::parse_from(["bffcache", "--config", path.as_str(), "--list"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert!(config.list_only);
        assert_eq!(config.sources.fetchable().count(), 1);
    }
}
