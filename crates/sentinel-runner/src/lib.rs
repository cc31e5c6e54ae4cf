//! Sentinel Runner - cache-aware test scheduling
//!
//! This crate decides which tests a set of file changes affects, reuses
//! cached results where a strategy allows it, runs the rest through a single
//! test command and folds its JSON event stream into a result.

pub mod cache;
pub mod events;
pub mod reporter;
pub mod scheduler;
pub mod strategy;
pub mod targets;

pub use cache::{CacheError, CacheStats, CachedResult, ResultCache};
pub use events::{Action, EventParseError, EventProcessor, TestEvent};
pub use reporter::{CollectingReporter, RunEvent, RunReporter, TracingReporter};
pub use scheduler::{SchedulerError, SchedulerOptions, TestScheduler};
pub use strategy::{
    create_strategy, AggressiveStrategy, ConservativeStrategy, ExecutionStrategy,
    NoCacheStrategy, WatchModeStrategy,
};
pub use targets::{Coverage, TargetDeriver};
