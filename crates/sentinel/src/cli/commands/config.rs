//! Config command - show or create the configuration

use clap::Args;

use sentinel_core::config::{default_config_toml, DEFAULT_CONFIG_TOML};

use crate::cli::{output, Cli, OutputFormat, Project};

/// Show the effective configuration
#[derive(Debug, Args)]
pub struct ConfigCommand {
    /// Write a default sentinel.toml to the working directory
    #[arg(long)]
    pub init: bool,

    /// Overwrite an existing file with --init
    #[arg(long, requires = "init")]
    pub force: bool,
}

impl ConfigCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        if self.init {
            return self.init_config(cli);
        }

        let project = Project::load()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "path": project.config_path.as_ref().map(|p| p.display().to_string()),
                "root": project.root.display().to_string(),
                "config": project.config,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        if !cli.quiet {
            match &project.config_path {
                Some(path) => output::info(&format!(
                    "Loaded {}",
                    output::path_style().apply_to(path.display())
                )),
                None => output::warning("No configuration file found, using defaults"),
            }
            println!();
        }
        print!("{}", toml::to_string_pretty(&project.config)?);
        Ok(())
    }

    fn init_config(&self, cli: &Cli) -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join(DEFAULT_CONFIG_TOML);
        if path.exists() && !self.force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                path.display()
            );
        }

        std::fs::write(&path, default_config_toml())?;
        tracing::info!(path = %path.display(), "wrote default configuration");

        if !cli.quiet {
            output::success(&format!(
                "Created {}",
                output::path_style().apply_to(path.display())
            ));
        }
        Ok(())
    }
}
