//! Cache management command

use std::path::Path;

use clap::{Args, Subcommand};
use console::style;

use sentinel_runner::cache::SNAPSHOT_FILE;

use crate::cli::{output, Cli, OutputFormat, Project};

/// Persistent result cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Clear all cached results
    Clean(CacheCleanCommand),
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached results
#[derive(Debug, Args)]
pub struct CacheCleanCommand;

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.action {
            CacheAction::Status(cmd) => cmd.execute(cli),
            CacheAction::Clean(cmd) => cmd.execute(cli),
        }
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let project = Project::load()?;
        let cache_dir = project.cache_dir();

        if !cache_dir.join(SNAPSHOT_FILE).exists() {
            if cli.format == OutputFormat::Json {
                let result = serde_json::json!({
                    "cache_dir": cache_dir.display().to_string(),
                    "entries": 0,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if !cli.quiet {
                output::info(&format!(
                    "No persisted cache at {}",
                    output::path_style().apply_to(cache_dir.display())
                ));
            }
            return Ok(());
        }

        let cache = project.open_cache(project.config.cache.capacity, true)?;
        let stats = cache.stats();

        if cli.format == OutputFormat::Json {
            let mut result = serde_json::to_value(&stats)?;
            result["cache_dir"] = serde_json::Value::String(cache_dir.display().to_string());
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", output::header("Result Cache Status"));
            println!();
            println!(
                "{}",
                output::key_value(
                    "Location",
                    &output::path_style().apply_to(cache_dir.display()).to_string()
                )
            );
            println!(
                "{}",
                output::key_value(
                    "Entries",
                    &format!("{} / {}", stats.total_entries, stats.capacity)
                )
            );
            println!(
                "{}",
                output::key_value(
                    "Valid",
                    &format!(
                        "{} ({} invalidated)",
                        stats.valid_entries, stats.invalid_entries
                    )
                )
            );
            println!(
                "{}",
                output::key_value(
                    "Hit rate",
                    &style(format!("{:.0}%", stats.hit_rate * 100.0))
                        .yellow()
                        .to_string()
                )
            );
            if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
                println!(
                    "{}",
                    output::key_value("Oldest", &output::timestamp(oldest))
                );
                println!(
                    "{}",
                    output::key_value("Newest", &output::timestamp(newest))
                );
            }
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let project = Project::load()?;
        let cache_dir = project.cache_dir();
        let removed = remove_cache_dir(&cache_dir)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "cache_dir": cache_dir.display().to_string(),
                "removed": removed,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            if removed {
                output::success(&format!(
                    "Removed {}",
                    output::path_style().apply_to(cache_dir.display())
                ));
            } else {
                output::success("Cache directory does not exist.");
            }
        }

        Ok(())
    }
}

/// Delete the cache directory without reading the snapshot inside it
fn remove_cache_dir(cache_dir: &Path) -> std::io::Result<bool> {
    if !cache_dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(cache_dir)?;
    tracing::info!(path = %cache_dir.display(), "removed cache directory");
    Ok(true)
}
