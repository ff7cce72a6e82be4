// tally-config: TOML-based configuration for the accumulator service

pub mod error;
pub mod load;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use load::{load_config, parse_override, Override};
pub use schema::{
    BackupSection, Config, DebugSection, IntervalSection, LoggingSection, SiteSpec,
    StorageSection, TypeSpec,
};
