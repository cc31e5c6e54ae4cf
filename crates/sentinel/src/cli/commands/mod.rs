//! CLI commands

mod cache;
mod config;
mod run;
mod strategies;

pub use cache::CacheCommand;
pub use config::ConfigCommand;
pub use run::RunCommand;
pub use strategies::StrategiesCommand;
