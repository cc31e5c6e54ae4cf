//! Run command - test the packages affected by changed paths

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;

use sentinel_core::config::ProjectConfig;
use sentinel_core::types::{ChangeKind, FileChange, StrategyKind, TestResult, TestStatus};
use sentinel_runner::{create_strategy, SchedulerOptions, TestScheduler, TracingReporter};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat, Project};
use crate::exit_codes;

/// Run the tests affected by changed paths
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Changed files; without any the whole project is tested
    pub paths: Vec<PathBuf>,

    /// Execution strategy (defaults to the configured one)
    #[arg(short, long)]
    pub strategy: Option<StrategyKind>,

    /// Maximum number of cached results
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Test command timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Keep results in memory only, even if persistence is configured
    #[arg(long)]
    pub no_persist: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<ExitCode> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<ExitCode> {
        let project = Project::load()?;
        let cwd = std::env::current_dir()?;

        let kind = self.strategy.unwrap_or(project.config.cache.strategy);
        let capacity = self.capacity.unwrap_or(project.config.cache.capacity);
        let persist = project.config.cache.persist && !self.no_persist;
        let cache = Arc::new(project.open_cache(capacity, persist)?);

        let mut options = SchedulerOptions::from_config(&project.root, &project.config);
        if let Some(secs) = self.timeout {
            options.timeout = Some(Duration::from_secs(secs));
        }

        let changes = changes_for(&self.paths, &cwd, &project.config.project);
        tracing::debug!(
            root = %project.root.display(),
            strategy = %kind,
            capacity,
            persist,
            changes = changes.len(),
            "starting run"
        );

        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info(&format!(
                "Strategy: {} ({})",
                style(kind).bold(),
                output::cache_window(kind.freshness_window())
            ));
        }

        let scheduler = TestScheduler::new(options, cache.clone(), Arc::new(TracingReporter));
        let mut strategy = create_strategy(kind);
        let result = scheduler
            .run_tests(&changes, Some(strategy.as_mut()))
            .await?;

        if persist {
            cache.save()?;
        }

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            print_summary(&result, cli.verbose);
        }

        Ok(exit_codes::for_run(result.is_success()))
    }
}

/// Classify changed paths. No paths means a project-wide run.
fn changes_for(paths: &[PathBuf], cwd: &Path, project: &ProjectConfig) -> Vec<FileChange> {
    if paths.is_empty() {
        return vec![FileChange::new(cwd, ChangeKind::Config)];
    }

    paths
        .iter()
        .map(|path| {
            let absolute = if path.is_absolute() {
                path.clone()
            } else {
                cwd.join(path)
            };
            FileChange::classify(absolute, project)
        })
        .collect()
}

fn print_summary(result: &TestResult, verbose: bool) {
    if result.cache_hit {
        output::success(&result.output);
        return;
    }

    println!();
    for suite in &result.suites {
        println!(
            "  {} {} {}",
            output::status_icon(suite.status),
            output::path_style().apply_to(&suite.path),
            style(format!(
                "({}, {})",
                output::counts(suite.passed_count, suite.failed_count, suite.skipped_count),
                output::seconds(suite.duration, 2)
            ))
            .dim()
        );
    }

    if verbose || (result.status == TestStatus::Failed && result.suites.is_empty()) {
        println!();
        println!("{}", output::header("Output"));
        print!("{}", result.output);
    }

    println!();
    let summary = format!(
        "{} in {}",
        output::counts(result.passed_count, result.failed_count, result.skipped_count),
        output::seconds(result.duration, 1)
    );
    match result.status {
        TestStatus::Failed => {
            output::error(&summary);
            if let Some(error) = &result.error {
                println!("{}", output::key_value("error", error));
            }
        }
        TestStatus::Skipped => output::warning(&format!("No tests ran: {}", summary)),
        _ => output::success(&summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_for_classifies_paths() {
        let project = ProjectConfig::default();
        let cwd = Path::new("/work/repo");
        let changes = changes_for(
            &[
                PathBuf::from("pkg/a/x_test.go"),
                PathBuf::from("pkg/a/x.go"),
                PathBuf::from("/work/repo/go.mod"),
            ],
            cwd,
            &project,
        );

        let kinds: Vec<ChangeKind> = changes.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Test, ChangeKind::Source, ChangeKind::Dependency]
        );
        assert_eq!(changes[0].path, PathBuf::from("/work/repo/pkg/a/x_test.go"));
    }

    #[test]
    fn test_no_paths_means_project_wide_run() {
        let changes = changes_for(&[], Path::new("/work/repo"), &ProjectConfig::default());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Config);
    }
}
