//! Core types for Sentinel

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProjectConfig;

/// Path that denotes "every package in the project"
pub const RECURSIVE_PATH: &str = "./...";

/// Scope of a test target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A single package directory
    Package,
    /// A single file
    File,
    /// The whole project tree
    Recursive,
}

impl TargetKind {
    /// Returns the string representation of the target kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::File => "file",
            Self::Recursive => "recursive",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of schedulable work derived from file changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTarget {
    /// Package directory, file path, or `./...`
    pub path: String,
    /// Target scope
    pub kind: TargetKind,
    /// Priority band: 1 for test-file changes, 2 for source changes, 3 for project-wide runs
    pub priority: i32,
    /// Hint used only for tie-breaking execution order
    pub estimated_duration: Duration,
    /// Test functions narrowing the target, in caller order
    #[serde(default)]
    pub functions: Vec<String>,
}

impl TestTarget {
    /// Create a package target
    pub fn package(path: impl Into<String>, priority: i32, estimated_duration: Duration) -> Self {
        Self {
            path: path.into(),
            kind: TargetKind::Package,
            priority,
            estimated_duration,
            functions: Vec::new(),
        }
    }

    /// Create a file target
    pub fn file(path: impl Into<String>, priority: i32, estimated_duration: Duration) -> Self {
        Self {
            path: path.into(),
            kind: TargetKind::File,
            priority,
            estimated_duration,
            functions: Vec::new(),
        }
    }

    /// Create the global target covering the whole project
    pub fn recursive(priority: i32, estimated_duration: Duration) -> Self {
        Self {
            path: RECURSIVE_PATH.to_string(),
            kind: TargetKind::Recursive,
            priority,
            estimated_duration,
            functions: Vec::new(),
        }
    }

    /// Narrow the target to specific test functions
    pub fn with_functions(mut self, functions: Vec<String>) -> Self {
        self.functions = functions;
        self
    }

    /// Cache fingerprint: `{kind}:{path}[:{function}]*`.
    ///
    /// Functions are appended in the order given, so callers wanting hits across
    /// calls must pass them in a canonical order.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{}:{}", self.kind, self.path);
        for function in &self.functions {
            key.push(':');
            key.push_str(function);
        }
        key
    }

    /// Locator handed to the test command.
    ///
    /// Relative directories are passed as `./dir` so the test tool treats them as
    /// filesystem paths rather than import paths.
    pub fn command_arg(&self) -> String {
        if self.path.is_empty() || self.path == "." {
            return ".".to_string();
        }
        if self.path.starts_with('.') || Path::new(&self.path).is_absolute() {
            self.path.clone()
        } else {
            format!("./{}", self.path)
        }
    }
}

impl fmt::Display for TestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// Closed set of execution strategies selectable by name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Reuse passing results for up to five minutes
    #[default]
    Aggressive,
    /// Reuse passing results for up to one minute
    Conservative,
    /// Stateful strategy for single-threaded watch loops
    #[serde(alias = "watch")]
    WatchMode,
    /// Never reuse results
    #[serde(alias = "disabled")]
    NoCache,
}

impl StrategyKind {
    /// All strategies, in display order
    pub fn all() -> [Self; 4] {
        [
            Self::Aggressive,
            Self::Conservative,
            Self::WatchMode,
            Self::NoCache,
        ]
    }

    /// Returns the canonical name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::WatchMode => "watch-mode",
            Self::NoCache => "no-cache",
        }
    }

    /// One-line description for listings
    pub fn description(&self) -> &'static str {
        match self {
            Self::Aggressive => "Maximizes cache usage for fastest feedback (5-minute cache window)",
            Self::Conservative => "Balances cache usage with accuracy (1-minute cache window)",
            Self::WatchMode => {
                "Optimized for continuous testing with smart caching (2-minute window)"
            }
            Self::NoCache => "Always runs tests without using cache",
        }
    }

    /// Freshness window within which a passing result is reused, if any
    pub fn freshness_window(&self) -> Option<Duration> {
        match self {
            Self::Aggressive => Some(Duration::from_secs(5 * 60)),
            Self::Conservative => Some(Duration::from_secs(60)),
            Self::WatchMode => Some(Duration::from_secs(2 * 60)),
            Self::NoCache => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "conservative" => Ok(Self::Conservative),
            "watch-mode" | "watch" => Ok(Self::WatchMode),
            "no-cache" | "disabled" => Ok(Self::NoCache),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

/// Kind of file change reported by the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A test file changed
    Test,
    /// A non-test source file changed
    Source,
    /// Any other project file changed
    Config,
    /// A dependency lock file changed
    Dependency,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Test => "test",
            Self::Source => "source",
            Self::Config => "config",
            Self::Dependency => "dependency",
        };
        write!(f, "{}", s)
    }
}

/// A single file change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path of the changed file
    pub path: PathBuf,
    /// What kind of file changed
    pub kind: ChangeKind,
    /// Whether the file was created rather than modified
    pub is_new: bool,
    /// When the change was observed
    pub timestamp: DateTime<Utc>,
}

impl FileChange {
    /// Create a change event stamped with the current time
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_new: false,
            timestamp: Utc::now(),
        }
    }

    /// Build a change event, inferring its kind from the project's naming rules
    pub fn classify(path: impl Into<PathBuf>, project: &ProjectConfig) -> Self {
        let path = path.into();
        let kind = project.classify(&path);
        Self::new(path, kind)
    }
}

/// Status of a test, suite, or whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Still collecting results
    Running,
    /// Everything passed
    Passed,
    /// At least one failure
    Failed,
    /// Nothing ran
    Skipped,
}

impl TestStatus {
    /// Returns the string representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregated results for one package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    /// Package name as reported by the test tool
    pub name: String,
    /// Package path the suite is keyed by
    pub path: String,
    pub test_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Sum of per-test elapsed times
    pub duration: Duration,
    pub status: TestStatus,
    /// First failure recorded for the suite
    pub error: Option<String>,
    /// The package itself failed (build or setup failure) without a failing test
    #[serde(default)]
    pub package_failed: bool,
}

impl TestSuite {
    /// Create an empty running suite for a package
    pub fn new(package: impl Into<String>) -> Self {
        let package = package.into();
        Self {
            name: package.clone(),
            path: package,
            test_count: 0,
            passed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            duration: Duration::ZERO,
            status: TestStatus::Running,
            error: None,
            package_failed: false,
        }
    }

    /// Status derived from the counters. Failed dominates; Passed and Skipped
    /// require every test to have that outcome; anything else is still Running.
    pub fn derive_status(&self) -> TestStatus {
        if self.failed_count > 0 || self.package_failed {
            TestStatus::Failed
        } else if self.passed_count == self.test_count {
            TestStatus::Passed
        } else if self.skipped_count == self.test_count {
            TestStatus::Skipped
        } else {
            TestStatus::Running
        }
    }
}

/// Run-level aggregate across all suites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunStats {
    pub total_suites: usize,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    /// Wall-clock duration from start to end
    pub duration: Duration,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TestRunStats {
    /// Create empty statistics starting at `start_time`
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            total_suites: 0,
            total_tests: 0,
            passed_tests: 0,
            failed_tests: 0,
            skipped_tests: 0,
            duration: Duration::ZERO,
            start_time,
            end_time: None,
        }
    }
}

/// Outcome of a scheduling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub status: TestStatus,
    /// Raw combined output of the test command (or a short message)
    pub output: String,
    pub duration: Duration,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub test_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// True when no subprocess ran because the cache satisfied every target
    pub cache_hit: bool,
    /// Exit code of the test command, if one ran
    pub exit_code: Option<i32>,
    /// Per-package breakdown, sorted by package path
    #[serde(default)]
    pub suites: Vec<TestSuite>,
    pub error: Option<String>,
}

impl TestResult {
    /// A passing result that required no execution
    pub fn cache_satisfied(message: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            status: TestStatus::Passed,
            output: message.into(),
            duration: Duration::ZERO,
            start_time,
            end_time: start_time,
            test_count: 0,
            passed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            cache_hit: true,
            exit_code: None,
            suites: Vec::new(),
            error: None,
        }
    }

    /// Create a result with the given status and output and no counts
    pub fn new(status: TestStatus, output: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status,
            output: output.into(),
            duration: Duration::ZERO,
            start_time: now,
            end_time: now,
            test_count: 0,
            passed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            cache_hit: false,
            exit_code: None,
            suites: Vec::new(),
            error: None,
        }
    }

    /// Whether the result represents a successful run
    pub fn is_success(&self) -> bool {
        matches!(self.status, TestStatus::Passed | TestStatus::Skipped)
    }
}
