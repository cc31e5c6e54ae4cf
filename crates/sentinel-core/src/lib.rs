//! Sentinel Core - shared types for the cache-aware test runner
//!
//! This crate provides the data model exchanged between the watcher, the
//! scheduler and the renderer, along with error handling and configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, Result};
pub use types::{
    ChangeKind, FileChange, StrategyKind, TargetKind, TestResult, TestRunStats, TestStatus,
    TestSuite, TestTarget,
};
