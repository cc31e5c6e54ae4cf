//! Configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_DIR};
use crate::types::{ChangeKind, StrategyKind};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project layout and naming rules
    pub project: ProjectConfig,

    /// Test command configuration
    pub runner: RunnerConfig,

    /// Result cache configuration
    pub cache: CacheConfig,
}

/// Project naming rules used for change classification and dependency discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Extension of source files, including the dot
    pub source_extension: String,

    /// Suffix identifying test files (e.g. `_test.go`)
    pub test_suffix: String,

    /// Project-wide lock files every cached result depends on
    pub lock_files: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            source_extension: ".go".to_string(),
            test_suffix: "_test.go".to_string(),
            lock_files: vec!["go.mod".to_string(), "go.sum".to_string()],
        }
    }
}

impl ProjectConfig {
    /// Whether a path names a test file
    pub fn is_test_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&self.test_suffix))
    }

    /// Whether a path names a (test or non-test) source file
    pub fn is_source_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&self.source_extension))
    }

    /// Whether a path names one of the project lock files
    pub fn is_lock_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.lock_files.iter().any(|l| l == n))
    }

    /// Infer the change kind of a path
    pub fn classify(&self, path: &Path) -> ChangeKind {
        if self.is_test_file(path) {
            ChangeKind::Test
        } else if self.is_source_file(path) {
            ChangeKind::Source
        } else if self.is_lock_file(path) {
            ChangeKind::Dependency
        } else {
            ChangeKind::Config
        }
    }
}

/// Test command configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Program to execute
    pub program: String,

    /// First argument (the test verb)
    pub verb: String,

    /// Request structured JSON events
    pub json: bool,

    /// Request verbose output
    pub verbose: bool,

    /// Stop on first failure
    pub failfast: bool,

    /// Extra arguments placed before the target paths
    pub extra_args: Vec<String>,

    /// Deadline for one test command, in seconds
    pub timeout_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            verb: "test".to_string(),
            json: true,
            verbose: false,
            failfast: true,
            extra_args: Vec::new(),
            timeout_secs: None,
        }
    }
}

impl RunnerConfig {
    /// Deadline as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Result cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached results
    pub capacity: usize,

    /// Strategy deciding which targets may reuse cached results
    pub strategy: StrategyKind,

    /// Persist the cache between invocations
    pub persist: bool,

    /// Directory for the persisted cache, relative to the project root
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            strategy: StrategyKind::default(),
            persist: false,
            directory: PathBuf::from(DEFAULT_CACHE_DIR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[cache]\nstrategy = \"watch\"\n").unwrap();
        assert_eq!(config.cache.strategy, StrategyKind::WatchMode);
        assert_eq!(config.cache.capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.runner.program, "go");
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result: Result<Config, _> = toml::from_str("[cache]\nstrategy = \"fastest\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_project_classification() {
        let project = ProjectConfig::default();
        assert!(project.is_test_file(Path::new("a/b_test.go")));
        assert!(!project.is_test_file(Path::new("a/b.go")));
        assert!(project.is_lock_file(Path::new("go.mod")));
        assert_eq!(project.classify(Path::new("README.md")), ChangeKind::Config);
    }

    #[test]
    fn test_runner_timeout() {
        let runner = RunnerConfig {
            timeout_secs: Some(30),
            ..Default::default()
        };
        assert_eq!(runner.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(RunnerConfig::default().timeout(), None);
    }
}
