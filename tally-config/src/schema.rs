// tally-config: Configuration schema and validation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Top-level service configuration.
///
/// Every section has a default so partial files deserialize; `validate`
/// decides what is actually mandatory for a given run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupSection,
    #[serde(default)]
    pub interval: IntervalSection,
    /// Site name to `"<offset-hours> [<storage-table>]"`.
    #[serde(default)]
    pub site: BTreeMap<String, String>,
    /// Arbitrary entry name to `"<prefix-chars> <model-id> [<pattern-id>]"`.
    #[serde(default, rename = "type")]
    pub types: BTreeMap<String, String>,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub debug: DebugSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSection {
    /// Flush period in seconds.
    #[serde(default = "default_backup_interval")]
    pub interval: u64,
    /// Local snapshot path template with a `{site}` placeholder.
    #[serde(default)]
    pub local_cache_format: String,
    /// Local history path template with `{site}` and `{slot}` placeholders.
    #[serde(default)]
    pub local_history_format: String,
}

fn default_backup_interval() -> u64 {
    300
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            interval: default_backup_interval(),
            local_cache_format: String::new(),
            local_history_format: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalSection {
    /// Interval granularity: `"day"` or `"hour"`.
    #[serde(default = "default_interval_module")]
    pub module: String,
}

fn default_interval_module() -> String {
    "day".to_string()
}

impl Default for IntervalSection {
    fn default() -> Self {
        Self {
            module: default_interval_module(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory of the local column store.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "tally-data".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugSection {
    /// Allow SIGUSR1 to force a cache rotation.
    #[serde(default)]
    pub force_cache_rotation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Tracing filter directive, e.g. `"info"` or `"tally_core=debug"`.
    #[serde(default = "default_logging_filter")]
    pub filter: String,
}

fn default_logging_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_logging_filter(),
        }
    }
}

/// Parsed `[site]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    pub name: String,
    pub offset_hours: i32,
    pub table: Option<String>,
}

/// Parsed `[type]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    pub prefixes: Vec<char>,
    pub model: String,
    pub pattern: Option<String>,
}

impl Config {
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check everything the service needs at startup.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.backup.interval == 0 {
            return Err(ConfigError::Invalid("backup interval must be non-zero".into()));
        }
        if self.backup.local_cache_format.is_empty() {
            return Err(missing("backup", "local_cache_format"));
        }
        if !self.backup.local_cache_format.contains("{site}") {
            return Err(ConfigError::Invalid(
                "local_cache_format must contain a {site} placeholder".into(),
            ));
        }
        if self.backup.local_history_format.is_empty() {
            return Err(missing("backup", "local_history_format"));
        }
        for placeholder in ["{site}", "{slot}"] {
            if !self.backup.local_history_format.contains(placeholder) {
                return Err(ConfigError::Invalid(format!(
                    "local_history_format must contain a {placeholder} placeholder"
                )));
            }
        }

        if !matches!(self.interval.module.as_str(), "day" | "hour") {
            return Err(ConfigError::Invalid(format!(
                "unknown interval module: {}",
                self.interval.module
            )));
        }

        if self.site.is_empty() {
            return Err(ConfigError::MissingSection("site".into()));
        }
        self.sites()?;
        self.type_specs()?;
        Ok(())
    }

    /// Parse all `[site]` entries.
    pub fn sites(&self) -> ConfigResult<Vec<SiteSpec>> {
        self.site
            .iter()
            .map(|(name, value)| parse_site_spec(name, value))
            .collect()
    }

    pub fn site_spec(&self, name: &str) -> ConfigResult<SiteSpec> {
        let value = self
            .site
            .get(name)
            .ok_or_else(|| missing("site", name))?;
        parse_site_spec(name, value)
    }

    /// Parse all `[type]` entries.
    pub fn type_specs(&self) -> ConfigResult<Vec<TypeSpec>> {
        self.types
            .values()
            .map(|value| parse_type_spec(value))
            .collect()
    }
}

fn missing(section: &str, option: &str) -> ConfigError {
    ConfigError::MissingOption {
        section: section.to_string(),
        option: option.to_string(),
    }
}

fn parse_site_spec(name: &str, value: &str) -> ConfigResult<SiteSpec> {
    let mut tokens = value.split_whitespace();

    let offset = tokens
        .next()
        .ok_or_else(|| ConfigError::Invalid(format!("empty site entry: {name}")))?;
    let offset_hours = offset
        .parse::<i32>()
        .map_err(|_| ConfigError::Invalid(format!("bad offset for site {name}: {offset}")))?;

    let table = tokens.next().map(str::to_string);
    if tokens.next().is_some() {
        return Err(ConfigError::Invalid(format!("bad site entry: {name} = {value}")));
    }

    Ok(SiteSpec {
        name: name.to_string(),
        offset_hours,
        table,
    })
}

fn parse_type_spec(value: &str) -> ConfigResult<TypeSpec> {
    let tokens: Vec<&str> = value.split_whitespace().collect();

    if !(tokens.len() == 2 || tokens.len() == 3) {
        return Err(ConfigError::Invalid(format!("bad type entry: {value}")));
    }

    Ok(TypeSpec {
        prefixes: tokens[0].chars().collect(),
        model: tokens[1].to_string(),
        pattern: tokens.get(2).map(|s| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [backup]
        interval = 60
        local_cache_format = "/var/lib/tally/{site}.snapshot"
        local_history_format = "/var/lib/tally/{site}-{slot}.history"

        [interval]
        module = "day"

        [site]
        main = "0"
        east = "3 east_table"

        [type]
        counters = "cp counters days-months"
    "#;

    #[test]
    fn parses_and_validates_sample() {
        let config = Config::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.backup.interval, 60);
        assert_eq!(config.interval.module, "day");

        let east = config.site_spec("east").unwrap();
        assert_eq!(east.offset_hours, 3);
        assert_eq!(east.table.as_deref(), Some("east_table"));

        let specs = config.type_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].prefixes, vec!['c', 'p']);
        assert_eq!(specs[0].model, "counters");
        assert_eq!(specs[0].pattern.as_deref(), Some("days-months"));
    }

    #[test]
    fn missing_site_section_is_fatal() {
        let text = SAMPLE.replace("[site]", "[site_disabled]");
        let config = Config::from_toml(&text).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSection(section)) if section == "site"
        ));
    }

    #[test]
    fn rejects_bad_type_entry() {
        assert!(parse_type_spec("c").is_err());
        assert!(parse_type_spec("c counters days-months extra").is_err());
    }

    #[test]
    fn rejects_bad_offset() {
        assert!(parse_site_spec("main", "east_table 0").is_err());
    }

    #[test]
    fn rejects_format_without_placeholder() {
        let text = SAMPLE.replace("{site}.snapshot", "static.snapshot");
        let config = Config::from_toml(&text).unwrap();
        assert!(config.validate().is_err());
    }
}
