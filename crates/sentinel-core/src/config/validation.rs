//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_project(config)?;
    validate_runner(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_project(config: &Config) -> Result<()> {
    let project = &config.project;

    if !project.source_extension.starts_with('.') {
        return Err(ConfigError::InvalidValue {
            field: "project.source_extension".to_string(),
            message: "must start with '.'".to_string(),
        }
        .into());
    }

    if !project.test_suffix.ends_with(&project.source_extension) {
        return Err(ConfigError::InvalidValue {
            field: "project.test_suffix".to_string(),
            message: format!("must end with {}", project.source_extension),
        }
        .into());
    }

    if project.lock_files.iter().any(|f| f.trim().is_empty()) {
        return Err(ConfigError::InvalidValue {
            field: "project.lock_files".to_string(),
            message: "lock file names cannot be empty".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_runner(config: &Config) -> Result<()> {
    if config.runner.program.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "runner.program".to_string(),
            message: "program cannot be empty".to_string(),
        }
        .into());
    }

    if config.runner.verb.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "runner.verb".to_string(),
            message: "verb cannot be empty".to_string(),
        }
        .into());
    }

    if config.runner.timeout_secs == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "runner.timeout_secs".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_empty_program_rejected() {
        let mut config = Config::default();
        config.runner.program = "  ".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("runner.program"));
    }

    #[test]
    fn test_extension_without_dot_rejected() {
        let mut config = Config::default();
        config.project.source_extension = "go".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_mismatched_test_suffix_rejected() {
        let mut config = Config::default();
        config.project.test_suffix = "_spec.rb".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("project.test_suffix"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.runner.timeout_secs = Some(0);
        assert!(validate_config(&config).is_err());
    }
}
