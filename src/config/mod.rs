//! Configuration module for the hotswap system.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `halldyll.hotswap.yaml`
//! - Environment variable overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_ECS_MAX_HEALTHY_PERCENT, ENV_ECS_MIN_HEALTHY_PERCENT,
    ENV_MODE, find_config_file,
};
pub use spec::{EcsHotswapProperties, HotswapConfig, WaitSettings};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
