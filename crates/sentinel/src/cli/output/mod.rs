//! Terminal output helpers

use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use console::{style, Style, StyledObject};

use sentinel_core::types::TestStatus;

fn mark<D: Display>(icon: StyledObject<&str>, message: D) -> String {
    format!("{} {}", icon, message)
}

/// Print a success message
pub fn success(message: &str) {
    println!("{}", mark(style("✓").green().bold(), message));
}

/// Print an error message to stderr
pub fn error(message: &str) {
    eprintln!("{}", mark(style("✗").red().bold(), message));
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{}", mark(style("!").yellow().bold(), message));
}

/// Print an info message
pub fn info(message: &str) {
    println!("{}", mark(style("→").blue(), message));
}

pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Indented `key: value` line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Icon for a test status
pub fn status_icon(status: TestStatus) -> String {
    let icon = match status {
        TestStatus::Passed => style("✓").green().bold(),
        TestStatus::Failed => style("✗").red().bold(),
        TestStatus::Skipped => style("-").yellow(),
        TestStatus::Running => style("…").dim(),
    };
    icon.to_string()
}

/// `3 passed, 1 failed, 0 skipped`
pub fn counts(passed: usize, failed: usize, skipped: usize) -> String {
    format!("{} passed, {} failed, {} skipped", passed, failed, skipped)
}

/// Seconds with the given precision, e.g. `1.25s`
pub fn seconds(duration: Duration, precision: usize) -> String {
    format!("{:.*}s", precision, duration.as_secs_f64())
}

pub fn timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// How long a strategy trusts a passing result
pub fn cache_window(window: Option<Duration>) -> String {
    match window {
        Some(window) => format!("{}s cache window", window.as_secs()),
        None => "no cache".to_string(),
    }
}
