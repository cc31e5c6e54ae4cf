//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    validate_config(&config)?;
    debug!(path = %path.display(), "config loaded and validated");
    Ok(config)
}

/// Find configuration file in directory or parent directories.
///
/// The first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration or use defaults.
///
/// A config file that exists but fails to parse or validate is still an error;
/// only a missing file falls back to defaults.
pub fn load_config_or_default(dir: &Path) -> Result<(Config, Option<PathBuf>)> {
    match find_config(dir) {
        Some(path) => {
            let config = load_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            debug!(dir = %dir.display(), "no config found, using defaults");
            Ok((Config::default(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrategyKind;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("sentinel.toml");
        std::fs::write(&config_path, "[cache]\ncapacity = 10").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_toml_over_yaml() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("sentinel.toml");
        let yaml_path = temp.path().join("sentinel.yaml");
        std::fs::write(&toml_path, "[cache]\ncapacity = 10").unwrap();
        std::fs::write(&yaml_path, "cache:\n  capacity: 20").unwrap();

        let found = find_config(temp.path()).unwrap();
        assert_eq!(found, toml_path);
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(".sentinel.toml");
        std::fs::write(&config_path, "[cache]\ncapacity = 10").unwrap();
        let nested = temp.path().join("pkg").join("a");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config(&nested).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_load_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("sentinel.toml");
        std::fs::write(
            &config_path,
            "[runner]\nprogram = \"gotestsum\"\n\n[cache]\nstrategy = \"conservative\"\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.runner.program, "gotestsum");
        assert_eq!(config.cache.strategy, StrategyKind::Conservative);
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("sentinel.yaml");
        std::fs::write(
            &config_path,
            "cache:\n  capacity: 50\n  strategy: no-cache\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.cache.strategy, StrategyKind::NoCache);
    }

    #[test]
    fn test_load_invalid_config_fails() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("sentinel.toml");
        std::fs::write(&config_path, "[runner]\nprogram = \"\"\n").unwrap();

        assert!(load_config(&config_path).is_err());
        assert!(load_config_or_default(temp.path()).is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let temp = TempDir::new().unwrap();
        let (config, path) = load_config_or_default(temp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.runner.verb, "test");
    }
}
