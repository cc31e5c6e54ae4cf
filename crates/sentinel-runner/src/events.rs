//! Test event stream processing
//!
//! Folds the newline-delimited JSON events emitted by `go test -json` into
//! per-package [`TestSuite`]s and run-level [`TestRunStats`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use sentinel_core::types::{TestRunStats, TestStatus, TestSuite};

/// Event actions reported by the test tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Run,
    Pause,
    Cont,
    Pass,
    Fail,
    Skip,
    Output,
    Bench,
    /// Any action this processor does not interpret
    #[serde(other)]
    Other,
}

/// One line of the structured event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    #[serde(rename = "Time", alias = "time", default)]
    pub time: Option<DateTime<Utc>>,

    #[serde(rename = "Action", alias = "action")]
    pub action: Action,

    #[serde(rename = "Package", alias = "package", default)]
    pub package: String,

    /// Absent for package-level events
    #[serde(
        rename = "Test",
        alias = "test",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub test: Option<String>,

    /// Seconds
    #[serde(
        rename = "Elapsed",
        alias = "elapsed",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub elapsed: Option<f64>,

    #[serde(
        rename = "Output",
        alias = "output",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output: Option<String>,
}

impl TestEvent {
    /// Parse a single line
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Test name, if this is a test-level event
    pub fn test_name(&self) -> Option<&str> {
        self.test.as_deref().filter(|t| !t.is_empty())
    }

    fn elapsed_duration(&self) -> Duration {
        self.elapsed
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default()
    }
}

/// Event stream parse errors
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    /// A non-empty line was not a valid event
    #[error("Malformed test event on line {line}: {source}")]
    Malformed {
        /// 1-based line number
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Accumulates suites and statistics from an event stream.
///
/// State never carries over between runs: [`EventProcessor::process_output`]
/// resets before folding, and [`EventProcessor::reset`] is available for
/// callers feeding events one at a time.
#[derive(Debug, Clone)]
pub struct EventProcessor {
    suites: BTreeMap<String, TestSuite>,
    stats: TestRunStats,
    output: BTreeMap<String, String>,
    first_test_time: Option<DateTime<Utc>>,
    last_test_time: Option<DateTime<Utc>>,
}

impl Default for EventProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl EventProcessor {
    pub fn new() -> Self {
        Self {
            suites: BTreeMap::new(),
            stats: TestRunStats::new(Utc::now()),
            output: BTreeMap::new(),
            first_test_time: None,
            last_test_time: None,
        }
    }

    /// Discard all state and restart the run clock
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Reset, fold every line of `output`, then finalize.
    ///
    /// Fails on the first malformed non-empty line; the processor state is
    /// then partial and should be discarded.
    pub fn process_output(&mut self, output: &str) -> Result<(), EventParseError> {
        self.reset();

        for (index, line) in output.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event = TestEvent::parse(line).map_err(|source| EventParseError::Malformed {
                line: index + 1,
                source,
            })?;
            self.process_event(&event);
        }

        self.finalize();
        Ok(())
    }

    /// Fold a single event
    pub fn process_event(&mut self, event: &TestEvent) {
        match event.action {
            Action::Run => self.on_run(event),
            Action::Pass | Action::Fail | Action::Skip => match event.test_name() {
                Some(_) => self.on_test_result(event),
                None => self.on_package_result(event),
            },
            Action::Output => self.on_output(event),
            _ => {}
        }
    }

    fn on_run(&mut self, event: &TestEvent) {
        if self.first_test_time.is_none() {
            self.first_test_time = Some(event.time.unwrap_or_else(Utc::now));
        }

        let suite = self
            .suites
            .entry(event.package.clone())
            .or_insert_with(|| TestSuite::new(event.package.clone()));
        if event.test_name().is_some() {
            suite.test_count += 1;
        }
    }

    fn on_test_result(&mut self, event: &TestEvent) {
        self.last_test_time = Some(event.time.unwrap_or_else(Utc::now));

        let Some(suite) = self.suites.get_mut(&event.package) else {
            debug!(package = %event.package, "result for unknown package ignored");
            return;
        };

        suite.duration += event.elapsed_duration();
        match event.action {
            Action::Pass => {
                suite.passed_count += 1;
                self.stats.passed_tests += 1;
            }
            Action::Fail => {
                suite.failed_count += 1;
                self.stats.failed_tests += 1;
                if suite.error.is_none() {
                    suite.error = Some(format!("test failures in package {}", event.package));
                }
            }
            Action::Skip => {
                suite.skipped_count += 1;
                self.stats.skipped_tests += 1;
            }
            _ => return,
        }
        self.stats.total_tests += 1;

        // Failed is sticky: derive_status keeps it once failed_count > 0
        suite.status = suite.derive_status();
    }

    /// Package summaries carry no test counts. Only a failing one matters:
    /// it is how build and setup failures show up.
    fn on_package_result(&mut self, event: &TestEvent) {
        if event.action != Action::Fail {
            return;
        }

        let suite = self
            .suites
            .entry(event.package.clone())
            .or_insert_with(|| TestSuite::new(event.package.clone()));
        suite.package_failed = true;
        suite.status = TestStatus::Failed;
        if suite.error.is_none() {
            suite.error = Some(format!("package {} failed", event.package));
        }
    }

    fn on_output(&mut self, event: &TestEvent) {
        if let Some(text) = &event.output {
            self.output
                .entry(event.package.clone())
                .or_default()
                .push_str(text);
        }
    }

    /// Stamp the end time and recompute every suite's status
    pub fn finalize(&mut self) {
        let end = Utc::now();
        self.stats.end_time = Some(end);
        self.stats.duration = end
            .signed_duration_since(self.stats.start_time)
            .to_std()
            .unwrap_or_default();
        self.stats.total_suites = self.suites.len();

        for suite in self.suites.values_mut() {
            suite.status = suite.derive_status();
        }
    }

    /// Suites sorted by package path
    pub fn suites(&self) -> Vec<TestSuite> {
        self.suites.values().cloned().collect()
    }

    pub fn suite(&self, package: &str) -> Option<&TestSuite> {
        self.suites.get(package)
    }

    pub fn stats(&self) -> &TestRunStats {
        &self.stats
    }

    /// Output accumulated for a package
    pub fn output(&self, package: &str) -> Option<&str> {
        self.output.get(package).map(String::as_str)
    }

    /// When the first test started; the end of the setup phase
    pub fn first_test_time(&self) -> Option<DateTime<Utc>> {
        self.first_test_time
    }

    /// When the last test result arrived
    pub fn last_test_time(&self) -> Option<DateTime<Utc>> {
        self.last_test_time
    }
}
