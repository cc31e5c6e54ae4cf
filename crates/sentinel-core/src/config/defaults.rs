//! Default configuration values

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "sentinel.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "sentinel.yaml";

/// Default number of cached results kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default cache directory, relative to the project root
pub const DEFAULT_CACHE_DIR: &str = ".sentinel/cache";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".sentinel.toml",
        ".sentinel.yaml",
    ]
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Sentinel Configuration

[project]
source_extension = ".go"
test_suffix = "_test.go"
lock_files = ["go.mod", "go.sum"]

[runner]
program = "go"
verb = "test"
json = true
verbose = false
failfast = true
extra_args = []

[cache]
capacity = 1000
strategy = "aggressive"
persist = false
directory = ".sentinel/cache"
"#;
