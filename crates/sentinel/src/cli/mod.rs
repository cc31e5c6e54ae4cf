//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sentinel_core::config::{load_config_or_default, Config};
use sentinel_runner::ResultCache;

use commands::{CacheCommand, ConfigCommand, RunCommand, StrategiesCommand};

/// Sentinel - cache-aware test runner
#[derive(Debug, Parser)]
#[command(name = "sentinel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tests affected by changed paths
    Run(RunCommand),

    /// Manage the persistent result cache
    Cache(CacheCommand),

    /// List available execution strategies
    Strategies(StrategiesCommand),

    /// Show the effective configuration
    Config(ConfigCommand),
}

impl Cli {
    /// Execute the CLI command and return the process exit code
    pub fn execute(self) -> anyhow::Result<ExitCode> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Cache(ref cmd) => cmd.execute(&self).map(|()| ExitCode::SUCCESS),
            Commands::Strategies(ref cmd) => cmd.execute(&self).map(|()| ExitCode::SUCCESS),
            Commands::Config(ref cmd) => cmd.execute(&self).map(|()| ExitCode::SUCCESS),
        }
    }
}

/// The project the CLI operates on
#[derive(Debug, Clone)]
pub struct Project {
    /// Directory holding the config file, or the working directory without one
    pub root: PathBuf,
    pub config: Config,
    pub config_path: Option<PathBuf>,
}

impl Project {
    /// Locate and load the configuration from the working directory upwards
    pub fn load() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::load_from(&cwd)
    }

    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let (config, config_path) = load_config_or_default(dir)?;
        let root = config_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf());

        Ok(Self {
            root,
            config,
            config_path,
        })
    }

    /// Directory of the persisted cache
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.config.cache.directory)
    }

    /// Build the result cache; persisted when the config asks for it
    pub fn open_cache(&self, capacity: usize, persist: bool) -> anyhow::Result<ResultCache> {
        let cache = if persist {
            ResultCache::open(self.cache_dir(), capacity)?
        } else {
            ResultCache::new(capacity)
        };
        Ok(cache
            .with_root(&self.root)
            .with_project(&self.config.project))
    }
}
