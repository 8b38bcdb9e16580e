use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::cli::{Cli, OutputFormat, VerbosityLevel};
use crate::format::{FormatDescriptor, FormatRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "xml-report-pipeline.toml";
/// Directory below the user configuration directory
pub const APP_CONFIG_DIR: &str = "xml-report-pipeline";

pub const ENV_LOG_LEVEL: &str = "XML_REPORT_PIPELINE_LOG_LEVEL";
pub const ENV_CACHE: &str = "XML_REPORT_PIPELINE_CACHE";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Trait for abstracting environment variable access
#[cfg_attr(test, mockall::automock)]
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error in {path}: {source}")]
    TomlParsing {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
    pub formats: Vec<FormatDescriptor>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` level; `RUST_LOG` still wins when set
    pub level: String,
}

/// Compiled artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of compiled schemas (and, separately, style-sheets) kept
    pub max_entries: u64,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub verbosity: VerbosityLevel,
    /// Parallel validation threads; defaults to the number of CPUs
    pub threads: Option<usize>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Config {
    /// Registry of the configured report formats
    pub fn registry(&self) -> Result<FormatRegistry> {
        Ok(FormatRegistry::from_descriptors(self.formats.iter().cloned())?)
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli)
    }

    pub fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let config = match &cli.config {
            Some(path) => Self::load_from_file(path)?,
            None => Self::find_config_file()?.unwrap_or_default(),
        };

        let config = Self::apply_environment_overrides_with(env, config)?;
        let config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load a TOML configuration file
    ///
    /// Relative schema and style-sheet paths are resolved against the file's directory.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::TomlParsing {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self::resolve_relative_paths(config, base))
    }

    fn resolve_relative_paths(mut config: Config, base: &Path) -> Config {
        config.formats = config
            .formats
            .into_iter()
            .map(|format| format.resolve_paths(base))
            .collect();
        config
    }

    /// Find configuration file in standard locations
    pub fn find_config_file() -> Result<Option<Config>> {
        for path in Self::candidate_paths() {
            if path.is_file() {
                return Ok(Some(Self::load_from_file(&path)?));
            }
        }
        Ok(None)
    }

    /// Locations searched when no `--config` is given, in order
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_CONFIG_DIR).join("config.toml"));
        }
        paths
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(level) = env.get(ENV_LOG_LEVEL) {
            config.logging.level = level.trim().to_lowercase();
        }

        if let Some(cache) = env.get(ENV_CACHE) {
            config.cache.enabled = match cache.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid {} value: {}",
                        ENV_CACHE, cache
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.threads.is_some() {
            config.output.threads = cli.threads;
        }
        if cli.cache {
            config.cache.enabled = true;
        }
        if cli.verbose || cli.quiet {
            config.output.verbosity = cli.verbosity();
        }
        if cli.verbose {
            config.logging.level = "debug".to_string();
        }
        config.output.format = cli.output_format;
        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown log level '{}' (expected one of {})",
                config.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if config.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Cache max_entries must be greater than 0".to_string(),
            ));
        }

        if let Some(threads) = config.output.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        let mut keys = HashSet::new();
        for format in &config.formats {
            let key = format.key.trim();
            if key.is_empty() {
                return Err(ConfigError::Validation(
                    "Report format key must not be empty".to_string(),
                ));
            }
            if !keys.insert(key) {
                return Err(ConfigError::Validation(format!(
                    "Report format '{}' is defined more than once",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.output.threads.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["xml-report-pipeline"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn empty_env() -> MockEnvProvider {
        let mut env = MockEnvProvider::new();
        env.expect_get().returning(|_| None);
        env
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "warn");
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(config.output.format, OutputFormat::Human);
        assert!(config.formats.is_empty());
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_toml_config_resolves_paths() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("pipeline.toml");
        fs::write(
            &config_path,
            r#"
[logging]
level = "info"

[cache]
enabled = true
max_entries = 16

[[formats]]
key = "junit"
description = "JUnit XML"
version = "2.0"
schemas = ["schemas/junit.xsd", "/abs/common.xsd"]
stylesheet = "xsl/junit.xsl"

[[formats]]
key = "raw"
"#,
        )
        .unwrap();

        let config = ConfigManager::load_from_file(&config_path).unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 16);
        assert_eq!(config.formats.len(), 2);

        let junit = &config.formats[0];
        assert_eq!(junit.version, "2.0");
        assert_eq!(
            junit.schemas,
            vec![
                temp_dir.path().join("schemas/junit.xsd"),
                PathBuf::from("/abs/common.xsd")
            ]
        );
        assert_eq!(
            junit.stylesheet,
            Some(temp_dir.path().join("xsl/junit.xsl"))
        );

        let registry = config.registry().unwrap();
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["junit", "raw"]);
    }

    #[test]
    fn test_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "[cache\nenabled = ").unwrap();

        let err = ConfigManager::load_from_file(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParsing { .. }));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let err = ConfigManager::load_from_file(Path::new("/nonexistent/pipeline.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::new();
        env.expect_get()
            .with(eq(ENV_LOG_LEVEL))
            .returning(|_| Some("DEBUG".to_string()));
        env.expect_get()
            .with(eq(ENV_CACHE))
            .returning(|_| Some("yes".to_string()));

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_invalid_environment_values() {
        let mut env = MockEnvProvider::new();
        env.expect_get().with(eq(ENV_LOG_LEVEL)).returning(|_| None);
        env.expect_get()
            .with(eq(ENV_CACHE))
            .returning(|_| Some("maybe".to_string()));

        let err = ConfigManager::apply_environment_overrides_with(&env, Config::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Environment(_)));
    }

    #[test]
    fn test_merge_with_cli() {
        let cli = cli(&["-v", "--threads", "3", "--cache", "--output", "json", "formats"]);
        let config = ConfigManager::merge_with_cli(Config::default(), &cli);

        assert_eq!(config.output.threads, Some(3));
        assert!(config.cache.enabled);
        assert_eq!(config.output.verbosity, VerbosityLevel::Verbose);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(ConfigManager::get_thread_count(&config), 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.output.threads = Some(0);
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.formats = vec![FormatDescriptor::new("junit"), FormatDescriptor::new("junit")];
        match ConfigManager::validate_config(&config) {
            Err(ConfigError::Validation(message)) => assert!(message.contains("junit")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_config_with_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("pipeline.toml");
        fs::write(&config_path, "[logging]\nlevel = \"error\"\n").unwrap();

        let cli = cli(&["--config", config_path.to_str().unwrap(), "formats"]);
        let config = ConfigManager::load_config_with(&empty_env(), &cli).unwrap();
        assert_eq!(config.logging.level, "error");
        assert!(!config.cache.enabled);
    }
}
