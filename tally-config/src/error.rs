// tally-config: Error types

use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error types
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("config file error: {0}")]
    Io(String),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("missing config section: [{0}]")]
    MissingSection(String),

    #[error("missing config option: [{section}] {option}")]
    MissingOption { section: String, option: String },

    #[error("invalid config value: {0}")]
    Invalid(String),
}
