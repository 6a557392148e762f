//! Configuration parser for loading hotswap settings.
//!
//! Settings come from an optional YAML file, then from `HALLDYLL_*`
//! environment variables, which take precedence over the file.

use crate::error::{ConfigError, HotswapError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::HotswapConfig;

/// Environment variable overriding the hotswap mode.
pub const ENV_MODE: &str = "HALLDYLL_HOTSWAP_MODE";
/// Environment variable overriding the service minimum healthy percent.
pub const ENV_ECS_MIN_HEALTHY_PERCENT: &str = "HALLDYLL_ECS_MIN_HEALTHY_PERCENT";
/// Environment variable overriding the service maximum percent.
pub const ENV_ECS_MAX_HEALTHY_PERCENT: &str = "HALLDYLL_ECS_MAX_HEALTHY_PERCENT";

/// Configuration parser for loading hotswap settings.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<HotswapConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HotswapError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HotswapError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string. An empty document yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<HotswapConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(HotswapConfig::default());
        }

        let config: HotswapConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            HotswapError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration, mode: {}", config.mode);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Without a path the defaults are used as the base.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// override holds an invalid value.
    pub fn load_with_env(&self, path: Option<&Path>) -> Result<HotswapConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => HotswapConfig::default(),
        };

        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

        Ok(config)
    }

    /// Applies overrides read through `lookup` to the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if a value cannot be parsed.
    pub fn apply_env_overrides<F>(config: &mut HotswapConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_MODE) {
            debug!("Overriding mode from environment");
            config.mode = mode
                .parse()
                .map_err(|_| invalid_env_var(ENV_MODE, &mode))?;
        }

        if let Some(value) = lookup(ENV_ECS_MIN_HEALTHY_PERCENT) {
            debug!("Overriding ecs.minimum_healthy_percent from environment");
            config.ecs.minimum_healthy_percent = Some(parse_percent(ENV_ECS_MIN_HEALTHY_PERCENT, &value)?);
        }

        if let Some(value) = lookup(ENV_ECS_MAX_HEALTHY_PERCENT) {
            debug!("Overriding ecs.maximum_healthy_percent from environment");
            config.ecs.maximum_healthy_percent = Some(parse_percent(ENV_ECS_MAX_HEALTHY_PERCENT, &value)?);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                HotswapError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn invalid_env_var(name: &str, value: &str) -> HotswapError {
    HotswapError::Config(ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_percent(name: &str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| invalid_env_var(name, value))
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["halldyll.hotswap.yaml", "halldyll.hotswap.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(HotswapError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
