//! bffcache - warm and inspect a stale-while-revalidate source cache
//!
//! Loads the source table, runs the configured number of warming passes
//! through the cache engine and prints what each source resolved to.

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use bffcache::cache::Cacher;
use bffcache::cli::{Cli, StartupConfig};
use bffcache::http::HttpGetter;
use bffcache::refresh::{RefreshHandle, RefreshMessage};
use bffcache::sources::SourcesConfig;

/// Installs the log subscriber, preferring RUST_LOG over `--log-level`
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Formats whole seconds as the largest exact unit
fn format_secs(secs: u64) -> String {
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Prints the source table
fn print_sources(sources: &SourcesConfig) {
    println!("{:<28} {:>6} {:>6}  url", "key", "age", "retry");
    for source in &sources.sources {
        let key = if source.parameterized {
            format!("{}_<param>", source.key)
        } else {
            source.key.clone()
        };
        println!(
            "{:<28} {:>6} {:>6}  {}",
            key,
            format_secs(source.age_secs),
            source
                .retry_when_secs
                .map(format_secs)
                .unwrap_or_else(|| "-".to_string()),
            source.url.as_deref().unwrap_or("-"),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let startup = match StartupConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if startup.list_only {
        print_sources(&startup.sources);
        return Ok(());
    }

    if startup.sources.fetchable().next().is_none() {
        warn!("no configured source has a url, nothing to warm");
    }

    let cacher = Cacher::new(startup.sources.cacher_config());
    let mut handle = RefreshHandle::spawn(
        cacher.clone(),
        startup.sources,
        HttpGetter::new(),
        startup.refresh,
    );

    while let Some(message) = handle.receiver.recv().await {
        match message {
            RefreshMessage::CycleStarted(cycle) => println!("pass {}", cycle),
            RefreshMessage::Served { key, bytes } => println!("  ok    {:<28} {} bytes", key, bytes),
            RefreshMessage::Failed { key, error } => println!("  fail  {:<28} {}", key, error),
            RefreshMessage::CycleCompleted(_) => {}
        }
    }

    let stats = cacher.stats();
    println!(
        "fresh hits: {}, stale hits: {}, cold fetches: {}, refreshes: {}, failures: {}",
        stats.fresh_hits,
        stats.stale_hits,
        stats.cold_fetches,
        stats.refreshes_started,
        stats.fetch_failures
    );
    for summary in cacher.store().summaries() {
        let fetched = summary
            .fetched_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<28} fetched {} failures {}",
            summary.key, fetched, summary.consecutive_failures
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(3600), "1h");
        assert_eq!(format_secs(24 * 3600), "24h");
        assert_eq!(format_secs(1800), "30m");
        assert_eq!(format_secs(45), "45s");
    }
}
