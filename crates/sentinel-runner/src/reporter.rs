//! Run progress reporting

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sentinel_core::types::TestStatus;

/// Events emitted while a run is scheduled and executed
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Changes were mapped to targets
    TargetsDerived { changes: usize, targets: usize },
    /// A target's cached result stands in for running it
    CacheSatisfied { target: String, strategy: String },
    /// The test command is starting
    Started { command: String, targets: usize },
    /// The test command produced a line of output
    Output { line: String, is_stderr: bool },
    /// The output could not be parsed as an event stream
    ParseFallback { error: String },
    /// The run finished
    Completed {
        status: TestStatus,
        duration: Duration,
        cache_hit: bool,
    },
}

/// Trait for reporting run progress
pub trait RunReporter: Send + Sync {
    /// Handle a run event
    fn report(&self, event: &RunEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn report(&self, event: &RunEvent) {
        match event {
            RunEvent::TargetsDerived { changes, targets } => {
                tracing::info!(changes, targets, "derived test targets");
            }
            RunEvent::CacheSatisfied { target, strategy } => {
                tracing::info!("{} satisfied by cache ({})", target, strategy);
            }
            RunEvent::Started { command, targets } => {
                tracing::info!(targets, "running {}", command);
            }
            RunEvent::Output { line, is_stderr } => {
                if *is_stderr {
                    tracing::warn!("{}", line);
                } else {
                    tracing::trace!("{}", line);
                }
            }
            RunEvent::ParseFallback { error } => {
                tracing::warn!("falling back to exit status: {}", error);
            }
            RunEvent::Completed {
                status,
                duration,
                cache_hit,
            } => {
                if *cache_hit {
                    tracing::info!("run {} (cached)", status);
                } else {
                    tracing::info!("run {} in {:.1}s", status, duration.as_secs_f64());
                }
            }
        }
    }
}

/// Reporter that collects events for later inspection
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RunReporter for CollectingReporter {
    fn report(&self, event: &RunEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
