//! Execution strategies
//!
//! A strategy decides, per target, whether a cached result may stand in for
//! running it, and in which order the surviving targets are handed to the
//! test command.

use std::cmp::{Ordering, Reverse};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use sentinel_core::types::{StrategyKind, TargetKind, TestStatus, TestTarget};

use crate::cache::{CachedResult, ResultCache};

/// Policy consulted by the scheduler before executing targets
pub trait ExecutionStrategy: Send {
    /// `true` means execute the target; `false` means its cached result may be reused
    fn should_run(&mut self, target: &TestTarget, cache: &ResultCache) -> bool;

    /// Reorder targets. Never adds or removes elements.
    fn order(&self, targets: Vec<TestTarget>) -> Vec<TestTarget>;

    /// Strategy name, used for reporting
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Which strategy this is
    fn kind(&self) -> StrategyKind;
}

/// Build the strategy for a kind
pub fn create_strategy(kind: StrategyKind) -> Box<dyn ExecutionStrategy> {
    match kind {
        StrategyKind::Aggressive => Box::new(AggressiveStrategy),
        StrategyKind::Conservative => Box::new(ConservativeStrategy),
        StrategyKind::WatchMode => Box::new(WatchModeStrategy::new()),
        StrategyKind::NoCache => Box::new(NoCacheStrategy),
    }
}

/// A passing result younger than `window`. Entries dated in the future count as fresh.
fn is_fresh_pass(cached: &CachedResult<sentinel_core::TestResult>, window: Duration) -> bool {
    if cached.result.status != TestStatus::Passed {
        return false;
    }
    Utc::now()
        .signed_duration_since(cached.cache_time)
        .to_std()
        .map_or(true, |age| age < window)
}

fn reuse_if_fresh(target: &TestTarget, cache: &ResultCache, kind: StrategyKind) -> bool {
    let Some(window) = kind.freshness_window() else {
        return true;
    };
    match cache.get(target) {
        Some(cached) if is_fresh_pass(&cached, window) => {
            debug!(target = %target, strategy = %kind, "reusing cached result");
            false
        }
        _ => true,
    }
}

fn by_priority_desc(a: &TestTarget, b: &TestTarget) -> Ordering {
    b.priority.cmp(&a.priority)
}

fn by_duration_asc(a: &TestTarget, b: &TestTarget) -> Ordering {
    a.estimated_duration.cmp(&b.estimated_duration)
}

/// Reuses passing results for five minutes; runs fast tests first within a priority
#[derive(Debug, Clone, Copy, Default)]
pub struct AggressiveStrategy;

impl ExecutionStrategy for AggressiveStrategy {
    fn should_run(&mut self, target: &TestTarget, cache: &ResultCache) -> bool {
        reuse_if_fresh(target, cache, self.kind())
    }

    fn order(&self, mut targets: Vec<TestTarget>) -> Vec<TestTarget> {
        targets.sort_by(|a, b| by_priority_desc(a, b).then_with(|| by_duration_asc(a, b)));
        targets
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Aggressive
    }
}

/// Reuses passing results for one minute; packages before recursive runs
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeStrategy;

impl ConservativeStrategy {
    fn kind_rank(kind: TargetKind) -> u8 {
        match kind {
            TargetKind::Package => 0,
            TargetKind::File => 1,
            TargetKind::Recursive => 2,
        }
    }
}

impl ExecutionStrategy for ConservativeStrategy {
    fn should_run(&mut self, target: &TestTarget, cache: &ResultCache) -> bool {
        reuse_if_fresh(target, cache, self.kind())
    }

    fn order(&self, mut targets: Vec<TestTarget>) -> Vec<TestTarget> {
        targets.sort_by(|a, b| {
            by_priority_desc(a, b)
                .then_with(|| Self::kind_rank(a.kind).cmp(&Self::kind_rank(b.kind)))
                .then_with(|| by_duration_asc(a, b))
        });
        targets
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Conservative
    }
}

/// Strategy for continuous watch loops.
///
/// Besides the two-minute freshness window, a cached result is also reused
/// when it was stored after this strategy last decided to run something.
/// Every decision to run stamps the current time.
///
/// This makes the strategy stateful: the answer for a target depends on the
/// calls made before it. An instance must be confined to a single scheduling
/// loop. It is not synchronized, and `should_run` takes `&mut self` so the
/// borrow checker rejects sharing one instance across concurrent runs.
#[derive(Debug, Clone)]
pub struct WatchModeStrategy {
    last_execution_time: DateTime<Utc>,
}

impl WatchModeStrategy {
    /// Create a strategy whose last execution is now
    pub fn new() -> Self {
        Self {
            last_execution_time: Utc::now(),
        }
    }

    /// When this strategy last decided to run a target
    pub fn last_execution_time(&self) -> DateTime<Utc> {
        self.last_execution_time
    }
}

impl Default for WatchModeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStrategy for WatchModeStrategy {
    fn should_run(&mut self, target: &TestTarget, cache: &ResultCache) -> bool {
        if let Some(cached) = cache.get(target) {
            let window = self
                .kind()
                .freshness_window()
                .unwrap_or(Duration::from_secs(2 * 60));
            if is_fresh_pass(&cached, window) {
                debug!(target = %target, "reusing fresh cached result");
                return false;
            }
            if cached.cache_time > self.last_execution_time {
                debug!(target = %target, "nothing ran since result was cached");
                return false;
            }
        }

        self.last_execution_time = Utc::now();
        true
    }

    fn order(&self, mut targets: Vec<TestTarget>) -> Vec<TestTarget> {
        targets.sort_by_key(|t| (Reverse(t.priority == 1), t.estimated_duration));
        targets
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::WatchMode
    }
}

/// Always runs; orders by priority only
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCacheStrategy;

impl ExecutionStrategy for NoCacheStrategy {
    fn should_run(&mut self, _target: &TestTarget, _cache: &ResultCache) -> bool {
        true
    }

    fn order(&self, mut targets: Vec<TestTarget>) -> Vec<TestTarget> {
        targets.sort_by(by_priority_desc);
        targets
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::NoCache
    }
}
