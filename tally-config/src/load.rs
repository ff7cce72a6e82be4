// tally-config: Config file loading and command-line overrides

use std::fs;
use std::path::Path;

use toml::Table;
use toml::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::Config;

/// A single `SECTION.KEY=VALUE` override.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub section: String,
    pub option: String,
    pub value: Value,
}

/// Parse a `section.key=value` argument.
pub fn parse_override(arg: &str) -> ConfigResult<Override> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| ConfigError::Invalid(format!("bad override (want section.key=value): {arg}")))?;
    let (section, option) = key
        .split_once('.')
        .ok_or_else(|| ConfigError::Invalid(format!("bad override key (want section.key): {key}")))?;

    Ok(Override {
        section: section.trim().to_string(),
        option: option.trim().to_string(),
        value: coerce(value.trim()),
    })
}

/// Load configuration from the given files, in order, later files and
/// overrides winning.
pub fn load_config<P: AsRef<Path>>(files: &[P], overrides: &[Override]) -> ConfigResult<Config> {
    let mut merged = Table::new();

    for file in files {
        let path = file.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let table: Table = toml::from_str(&text)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        merge_tables(&mut merged, table);
    }

    for item in overrides {
        let section = merged
            .entry(item.section.clone())
            .or_insert_with(|| Value::Table(Table::new()));
        match section {
            Value::Table(table) => {
                table.insert(item.option.clone(), item.value.clone());
            }
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "override target is not a section: {}",
                    item.section
                )))
            }
        }
    }

    merged
        .try_into()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

fn merge_tables(dst: &mut Table, src: Table) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// Interpret an override value as the narrowest TOML type it fits.
fn coerce(text: &str) -> Value {
    if let Ok(n) = text.parse::<i64>() {
        return Value::Integer(n);
    }
    if let Ok(x) = text.parse::<f64>() {
        return Value::Float(x);
    }
    match text {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn later_file_and_override_win() {
        let mut base = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            base,
            "[backup]\ninterval = 60\nlocal_cache_format = \"/tmp/{{site}}.snapshot\""
        )
        .unwrap();

        let mut extra = tempfile::NamedTempFile::new().unwrap();
        writeln!(extra, "[backup]\ninterval = 120").unwrap();

        let overrides = [parse_override("interval.module=hour").unwrap()];
        let config = load_config(&[base.path(), extra.path()], &overrides).unwrap();

        assert_eq!(config.backup.interval, 120);
        assert_eq!(config.backup.local_cache_format, "/tmp/{site}.snapshot");
        assert_eq!(config.interval.module, "hour");
    }

    #[test]
    fn override_values_are_typed() {
        assert_eq!(
            parse_override("backup.interval=30").unwrap().value,
            Value::Integer(30)
        );
        assert_eq!(
            parse_override("debug.force_cache_rotation=true").unwrap().value,
            Value::Boolean(true)
        );
        assert_eq!(
            parse_override("site.main=0 east").unwrap().value,
            Value::String("0 east".to_string())
        );
    }

    #[test]
    fn rejects_malformed_override() {
        assert!(parse_override("no-equals").is_err());
        assert!(parse_override("nokey=1").is_err());
    }
}
