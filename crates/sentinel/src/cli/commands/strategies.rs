//! Strategies command - list execution strategies

use clap::Args;
use console::style;

use sentinel_core::types::StrategyKind;

use crate::cli::{output, Cli, OutputFormat, Project};

/// List available execution strategies
#[derive(Debug, Args)]
pub struct StrategiesCommand;

impl StrategiesCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let configured = Project::load()
            .map(|p| p.config.cache.strategy)
            .unwrap_or_default();

        if cli.format == OutputFormat::Json {
            let list: Vec<serde_json::Value> = StrategyKind::all()
                .iter()
                .map(|kind| {
                    serde_json::json!({
                        "name": kind.as_str(),
                        "description": kind.description(),
                        "window_secs": kind.freshness_window().map(|w| w.as_secs()),
                        "configured": *kind == configured,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
            return Ok(());
        }

        if cli.quiet {
            return Ok(());
        }

        println!("{}", output::header("Execution strategies"));
        println!();
        for kind in StrategyKind::all() {
            let marker = if kind == configured {
                style("*").green().bold().to_string()
            } else {
                " ".to_string()
            };
            println!(
                "{} {:<14} {}",
                marker,
                style(kind.as_str()).bold(),
                style(kind.description()).dim()
            );
        }
        Ok(())
    }
}
