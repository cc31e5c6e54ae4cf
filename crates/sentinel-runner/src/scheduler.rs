//! Test scheduler: derive targets, consult the cache, run the test command once

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sentinel_core::config::{Config, ProjectConfig, RunnerConfig};
use sentinel_core::types::{FileChange, TestResult, TestStatus, TestTarget};

use crate::cache::ResultCache;
use crate::events::EventProcessor;
use crate::reporter::{RunEvent, RunReporter};
use crate::strategy::ExecutionStrategy;
use crate::targets::TargetDeriver;

/// Scheduler errors.
///
/// Failing tests are not errors; they come back as a [`TestResult`] with
/// status [`TestStatus::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The test command could not be started
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The test command exceeded its deadline and was killed
    #[error("Test command timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    /// Reading the test command's output failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Options for the test scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Project root; the test command runs here
    pub root_dir: PathBuf,
    /// Project naming rules
    pub project: ProjectConfig,
    /// Test command
    pub runner: RunnerConfig,
    /// Deadline for one test command
    pub timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            root_dir: std::env::current_dir().unwrap_or_default(),
            project: ProjectConfig::default(),
            runner: RunnerConfig::default(),
            timeout: None,
        }
    }
}

impl SchedulerOptions {
    /// Options for a project root and its configuration
    pub fn from_config(root_dir: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            root_dir: root_dir.into(),
            project: config.project.clone(),
            runner: config.runner.clone(),
            timeout: config.runner.timeout(),
        }
    }
}

/// Captured output of one test command
#[derive(Debug)]
struct Execution {
    output: String,
    status: ExitStatus,
}

/// Runs tests for file changes.
///
/// Calls to [`TestScheduler::run_tests`] on one scheduler are serialized, so
/// at most one test command runs per scheduler. The cache has its own lock
/// and may be shared with other schedulers or read concurrently.
pub struct TestScheduler {
    options: SchedulerOptions,
    deriver: TargetDeriver,
    cache: Arc<ResultCache>,
    reporter: Arc<dyn RunReporter>,
    run_lock: Mutex<()>,
}

impl TestScheduler {
    /// Create a new scheduler
    pub fn new(
        options: SchedulerOptions,
        cache: Arc<ResultCache>,
        reporter: Arc<dyn RunReporter>,
    ) -> Self {
        let deriver = TargetDeriver::new(options.root_dir.clone(), options.project.clone());
        Self {
            options,
            deriver,
            cache,
            reporter,
            run_lock: Mutex::new(()),
        }
    }

    /// The shared result cache
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Run the tests affected by `changes`.
    ///
    /// Without a strategy every derived target runs in derivation order.
    /// Dropping the returned future kills a running test command.
    pub async fn run_tests(
        &self,
        changes: &[FileChange],
        strategy: Option<&mut dyn ExecutionStrategy>,
    ) -> Result<TestResult, SchedulerError> {
        let _guard = self.run_lock.lock().await;
        let start = Utc::now();

        let targets = self.deriver.derive(changes);
        self.reporter.report(&RunEvent::TargetsDerived {
            changes: changes.len(),
            targets: targets.len(),
        });

        if targets.is_empty() {
            return Ok(self.satisfied("No test targets identified", start));
        }

        let to_run = match strategy {
            Some(strategy) => self.filter(targets, strategy),
            None => targets,
        };

        if to_run.is_empty() {
            return Ok(self.satisfied("All targets satisfied by cache", start));
        }

        let execution = self.execute(&to_run).await?;
        let result = self.interpret(execution, start);

        for target in &to_run {
            self.cache.put(target, result.clone());
        }

        info!(
            status = %result.status,
            targets = to_run.len(),
            tests = result.test_count,
            "test run complete"
        );
        self.reporter.report(&RunEvent::Completed {
            status: result.status,
            duration: result.duration,
            cache_hit: false,
        });
        Ok(result)
    }

    fn filter(
        &self,
        targets: Vec<TestTarget>,
        strategy: &mut dyn ExecutionStrategy,
    ) -> Vec<TestTarget> {
        let mut to_run = Vec::with_capacity(targets.len());
        for target in targets {
            if strategy.should_run(&target, &self.cache) {
                to_run.push(target);
            } else {
                self.reporter.report(&RunEvent::CacheSatisfied {
                    target: target.to_string(),
                    strategy: strategy.name().to_string(),
                });
            }
        }
        strategy.order(to_run)
    }

    fn satisfied(&self, message: &str, start: DateTime<Utc>) -> TestResult {
        debug!(reason = message, "no test command needed");
        let result = TestResult::cache_satisfied(message, start);
        self.reporter.report(&RunEvent::Completed {
            status: result.status,
            duration: result.duration,
            cache_hit: true,
        });
        result
    }

    /// Arguments passed to the test program for `targets`
    pub fn build_args(&self, targets: &[TestTarget]) -> Vec<String> {
        let runner = &self.options.runner;
        let mut args = vec![runner.verb.clone()];
        if runner.json {
            args.push("-json".to_string());
        }
        if runner.verbose {
            args.push("-v".to_string());
        }
        if runner.failfast {
            args.push("-failfast".to_string());
        }
        if let Some(pattern) = run_pattern(targets) {
            args.push("-run".to_string());
            args.push(pattern);
        }
        args.extend(runner.extra_args.iter().cloned());
        args.extend(targets.iter().map(TestTarget::command_arg));
        args
    }

    async fn execute(&self, targets: &[TestTarget]) -> Result<Execution, SchedulerError> {
        let program = &self.options.runner.program;
        let args = self.build_args(targets);
        self.reporter.report(&RunEvent::Started {
            command: format!("{} {}", program, args.join(" ")),
            targets: targets.len(),
        });

        let mut child = Command::new(program)
            .args(&args)
            .current_dir(&self.options.root_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SchedulerError::Launch {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let reporter = self.reporter.as_ref();

        let collect = async {
            let (out, err) = tokio::join!(
                read_lines(stdout, false, reporter),
                read_lines(stderr, true, reporter)
            );
            let status = child.wait().await?;
            Ok::<_, io::Error>((out?, err?, status))
        };

        let waited = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        };

        let Some(waited) = waited else {
            let timeout = self.options.timeout.unwrap_or_default();
            warn!(timeout_secs = timeout.as_secs_f64(), "test command timed out");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "failed to kill timed out test command");
            }
            return Err(SchedulerError::TimedOut { timeout });
        };

        let (mut output, err, status) = waited?;
        if !err.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&err);
        }

        debug!(exit_code = ?status.code(), bytes = output.len(), "test command exited");
        Ok(Execution { output, status })
    }

    fn interpret(&self, execution: Execution, start: DateTime<Utc>) -> TestResult {
        let Execution { output, status } = execution;
        let exit_code = status.code();
        let mut result = TestResult::new(TestStatus::Passed, String::new());
        result.start_time = start;
        result.exit_code = exit_code;

        let mut processor = EventProcessor::new();
        match processor.process_output(&output) {
            Ok(()) => {
                let stats = processor.stats();
                let suites = processor.suites();
                let failing_suite = suites.iter().find(|s| s.status == TestStatus::Failed);

                result.status = if stats.failed_tests > 0 || failing_suite.is_some() {
                    TestStatus::Failed
                } else if !status.success() {
                    // The command failed without reporting a failing test
                    TestStatus::Failed
                } else if stats.total_tests == 0 {
                    TestStatus::Skipped
                } else {
                    TestStatus::Passed
                };

                result.error = failing_suite.and_then(|s| s.error.clone());
                result.test_count = stats.total_tests;
                result.passed_count = stats.passed_tests;
                result.failed_count = stats.failed_tests;
                result.skipped_count = stats.skipped_tests;
                result.suites = suites;
            }
            Err(e) => {
                warn!(error = %e, "could not parse test events, using exit status");
                self.reporter.report(&RunEvent::ParseFallback {
                    error: e.to_string(),
                });
                result.status = if status.success() {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                };
            }
        }

        if result.status == TestStatus::Failed && result.error.is_none() {
            result.error = Some(match exit_code {
                Some(code) => format!("test command exited with code {}", code),
                None => "test command was terminated by a signal".to_string(),
            });
        }

        result.output = output;
        result.end_time = Utc::now();
        result.duration = result
            .end_time
            .signed_duration_since(start)
            .to_std()
            .unwrap_or_default();
        result
    }
}

/// `-run` pattern when every target narrows to specific functions
fn run_pattern(targets: &[TestTarget]) -> Option<String> {
    if targets.is_empty() || targets.iter().any(|t| t.functions.is_empty()) {
        return None;
    }
    let mut functions: Vec<&str> = targets
        .iter()
        .flat_map(|t| t.functions.iter().map(String::as_str))
        .collect();
    functions.sort_unstable();
    functions.dedup();
    Some(format!("^({})$", functions.join("|")))
}

async fn read_lines<R>(
    reader: Option<R>,
    is_stderr: bool,
    reporter: &dyn RunReporter,
) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return Ok(collected);
    };

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        reporter.report(&RunEvent::Output {
            line: line.clone(),
            is_stderr,
        });
        collected.push_str(&line);
        collected.push('\n');
    }
    Ok(collected)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::strategy::{AggressiveStrategy, NoCacheStrategy};
    use sentinel_core::types::ChangeKind;
    use std::path::Path;
    use tempfile::TempDir;

    /// Scheduler running `sh <script>` so the script never has to be executable
    fn scheduler_with_script(
        temp: &TempDir,
        script: &str,
    ) -> (TestScheduler, Arc<CollectingReporter>) {
        let script_path = temp.path().join("fake-go.sh");
        std::fs::write(&script_path, script).unwrap();

        let options = SchedulerOptions {
            root_dir: temp.path().to_path_buf(),
            runner: RunnerConfig {
                program: "sh".to_string(),
                verb: script_path.to_string_lossy().into_owned(),
                ..Default::default()
            },
            ..Default::default()
        };
        scheduler(options, temp.path())
    }

    fn scheduler(options: SchedulerOptions, root: &Path) -> (TestScheduler, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let cache = Arc::new(ResultCache::new(100).with_root(root));
        let scheduler = TestScheduler::new(options, cache, reporter.clone());
        (scheduler, reporter)
    }

    fn unlaunchable(temp: &TempDir) -> SchedulerOptions {
        SchedulerOptions {
            root_dir: temp.path().to_path_buf(),
            runner: RunnerConfig {
                program: temp.path().join("missing-go").to_string_lossy().into_owned(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn test_change(path: &str) -> FileChange {
        FileChange::new(path, ChangeKind::Test)
    }

    /// Wait until the script has written its pid
    async fn wait_for_file(path: &Path) {
        for _ in 0..250 {
            if std::fs::read_to_string(path).is_ok_and(|s| !s.trim().is_empty()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never appeared", path.display());
    }

    const PASSING: &str = r#"
echo '{"Action":"run","Package":"pkg/a","Test":"TestOne"}'
echo '{"Action":"pass","Package":"pkg/a","Test":"TestOne","Elapsed":0.01}'
echo '{"Action":"pass","Package":"pkg/a","Elapsed":0.02}'
"#;

    const FAILING: &str = r#"
echo '{"Action":"run","Package":"pkg/a","Test":"TestOne"}'
echo '{"Action":"fail","Package":"pkg/a","Test":"TestOne","Elapsed":0.01}'
echo '{"Action":"fail","Package":"pkg/a","Elapsed":0.02}'
exit 1
"#;

    #[tokio::test]
    async fn test_empty_run_is_cache_hit() {
        let temp = TempDir::new().unwrap();
        let (scheduler, reporter) = scheduler(unlaunchable(&temp), temp.path());

        for kind in sentinel_core::StrategyKind::all() {
            let mut strategy = crate::strategy::create_strategy(kind);
            let result = scheduler
                .run_tests(&[], Some(strategy.as_mut()))
                .await
                .unwrap();
            assert!(result.cache_hit);
            assert_eq!(result.status, TestStatus::Passed);
            assert_eq!(result.duration, Duration::ZERO);
        }

        let result = scheduler.run_tests(&[], None).await.unwrap();
        assert!(result.cache_hit);
        assert!(!reporter
            .events()
            .iter()
            .any(|e| matches!(e, RunEvent::Started { .. })));
    }

    #[tokio::test]
    async fn test_cache_satisfied_run_skips_command() {
        let temp = TempDir::new().unwrap();
        let (scheduler, reporter) = scheduler(unlaunchable(&temp), temp.path());
        let target = TestTarget::package("pkg/a", 1, Duration::from_secs(30));
        scheduler
            .cache()
            .put(&target, TestResult::new(TestStatus::Passed, "ok"));

        let mut strategy = AggressiveStrategy;
        let result = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], Some(&mut strategy))
            .await
            .unwrap();

        assert!(result.cache_hit);
        assert_eq!(result.status, TestStatus::Passed);
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, RunEvent::CacheSatisfied { .. })));
    }

    #[tokio::test]
    async fn test_no_strategy_runs_everything() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler_with_script(&temp, PASSING);
        let target = TestTarget::package("pkg/a", 1, Duration::from_secs(30));
        scheduler
            .cache()
            .put(&target, TestResult::new(TestStatus::Passed, "ok"));

        let result = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], None)
            .await
            .unwrap();
        assert!(!result.cache_hit);
        assert_eq!(result.test_count, 1);
    }

    #[tokio::test]
    async fn test_passing_run_populates_cache() {
        let temp = TempDir::new().unwrap();
        let (scheduler, reporter) = scheduler_with_script(&temp, PASSING);

        let mut strategy = NoCacheStrategy;
        let result = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], Some(&mut strategy))
            .await
            .unwrap();

        assert_eq!(result.status, TestStatus::Passed);
        assert!(!result.cache_hit);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.test_count, 1);
        assert_eq!(result.passed_count, 1);
        assert_eq!(result.suites.len(), 1);
        assert!(result.error.is_none());

        let target = TestTarget::package("pkg/a", 1, Duration::from_secs(30));
        let cached = scheduler.cache().get(&target).expect("result cached");
        assert_eq!(cached.result.status, TestStatus::Passed);

        let events = reporter.events();
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::Started { command, targets: 1 } if command.ends_with("-json -failfast ./pkg/a")
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Output { is_stderr: false, .. })));
    }

    #[tokio::test]
    async fn test_failing_run() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler_with_script(&temp, FAILING);

        let result = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], None)
            .await
            .unwrap();

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(
            result.error.as_deref(),
            Some("test failures in package pkg/a")
        );
    }

    #[tokio::test]
    async fn test_malformed_output_falls_back_to_exit_code() {
        let temp = TempDir::new().unwrap();
        let (scheduler, reporter) =
            scheduler_with_script(&temp, "echo 'not json'\necho 'build failed' >&2\nexit 1\n");

        let result = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], None)
            .await
            .unwrap();

        assert_eq!(result.status, TestStatus::Failed);
        assert!(!result.cache_hit);
        assert!(result.output.contains("not json"));
        assert!(result.output.contains("build failed"));
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, RunEvent::ParseFallback { .. })));
    }

    #[tokio::test]
    async fn test_malformed_output_with_success_exit() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler_with_script(&temp, "echo 'ok  pkg/a 0.01s'\n");

        let result = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], None)
            .await
            .unwrap();
        assert_eq!(result.status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_no_tests_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler_with_script(&temp, "exit 0\n");

        let result = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], None)
            .await
            .unwrap();
        assert_eq!(result.status, TestStatus::Skipped);
    }

    #[tokio::test]
    async fn test_launch_failure_is_error() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler(unlaunchable(&temp), temp.path());

        let err = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Launch { .. }));
        assert!(scheduler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, _) = scheduler_with_script(&temp, "sleep 5\n");
        scheduler.options.timeout = Some(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = scheduler
            .run_tests(&[test_change("pkg/a/x_test.go")], None)
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(scheduler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_runs_are_serialized() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("runs.log");
        let script = format!(
            "echo start >> '{log}'\nsleep 0.2\necho end >> '{log}'\n",
            log = log.display()
        );
        let (scheduler, _) = scheduler_with_script(&temp, &script);
        let changes = [test_change("pkg/a/x_test.go")];

        let (first, second) = tokio::join!(
            scheduler.run_tests(&changes, None),
            scheduler.run_tests(&changes, None)
        );
        first.unwrap();
        second.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "start\nend\nstart\nend\n");
    }

    #[tokio::test]
    async fn test_dropping_run_kills_command() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("pid");
        let finished = temp.path().join("finished");
        let script = format!(
            "echo $$ > '{pid}'\nsleep 1\necho done > '{finished}'\n",
            pid = pid_file.display(),
            finished = finished.display()
        );
        let (scheduler, _) = scheduler_with_script(&temp, &script);
        let scheduler = Arc::new(scheduler);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move {
                let changes = vec![test_change("pkg/a/x_test.go")];
                scheduler.run_tests(&changes, None).await
            }
        });

        wait_for_file(&pid_file).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!finished.exists());
        assert!(scheduler.cache().is_empty());

        // The run lock was released with the dropped future
        let result = scheduler.run_tests(&[], None).await.unwrap();
        assert!(result.cache_hit);
    }

    #[tokio::test]
    async fn test_cache_readable_while_run_in_flight() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("pid");
        let script = format!(
            "echo $$ > '{pid}'\nsleep 0.5\n{passing}",
            pid = pid_file.display(),
            passing = PASSING
        );
        let (scheduler, _) = scheduler_with_script(&temp, &script);
        let other = TestTarget::package("pkg/b", 1, Duration::from_secs(30));
        scheduler
            .cache()
            .put(&other, TestResult::new(TestStatus::Passed, "ok"));
        let changes = [test_change("pkg/a/x_test.go")];

        let (result, (during, hit)) = tokio::join!(scheduler.run_tests(&changes, None), async {
            wait_for_file(&pid_file).await;
            let cache = scheduler.cache();
            (cache.stats(), cache.get(&other).is_some())
        });

        assert_eq!(result.unwrap().status, TestStatus::Passed);
        assert_eq!(during.total_entries, 1);
        assert!(hit);
        assert_eq!(scheduler.cache().len(), 2);
    }

    #[test]
    fn test_build_args() {
        let temp = TempDir::new().unwrap();
        let (scheduler, _) = scheduler(SchedulerOptions::default(), temp.path());
        let targets = vec![
            TestTarget::package("pkg/a", 1, Duration::from_secs(30)),
            TestTarget::recursive(3, Duration::from_secs(300)),
        ];

        assert_eq!(
            scheduler.build_args(&targets),
            vec!["test", "-json", "-failfast", "./pkg/a", "./..."]
        );
    }

    #[test]
    fn test_build_args_with_functions() {
        let temp = TempDir::new().unwrap();
        let options = SchedulerOptions {
            runner: RunnerConfig {
                verbose: true,
                failfast: false,
                extra_args: vec!["-count=1".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let (scheduler, _) = scheduler(options, temp.path());
        let targets = vec![TestTarget::package("pkg/a", 1, Duration::from_secs(30))
            .with_functions(vec!["TestTwo".to_string(), "TestOne".to_string()])];

        assert_eq!(
            scheduler.build_args(&targets),
            vec![
                "test",
                "-json",
                "-v",
                "-run",
                "^(TestOne|TestTwo)$",
                "-count=1",
                "./pkg/a"
            ]
        );
    }
}
