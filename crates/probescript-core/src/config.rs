//! Engine configuration reader.
//!
//! The engine hands plugins a statically typed view of a TOML document:
//! every getter names the type it wants and returns `None` when the key is
//! missing or holds something else. Keys are dotted paths into nested
//! tables, e.g. `plugins.Tracer.threshold`.
//!
//! Getters are tolerant of textual values, so `"0"` reads as the boolean
//! `false` and as the integer `0`. Callers that probe several types decide
//! between those readings by the order in which they ask.

use crate::error::ConfigError;
use crate::logging::LogConfig;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use toml::Value;

/// Key listing the Lua module search directories.
pub const MODULE_PATHS_KEY: &str = "interpreter.module_paths";
/// Key listing the plugins the host creates at startup.
pub const ENGINE_PLUGINS_KEY: &str = "engine.plugins";
/// Key naming the engine's output directory.
pub const OUTPUT_DIRECTORY_KEY: &str = "engine.output_directory";
/// Global log level key, also the default plugin threshold.
pub const LOG_LEVEL_KEY: &str = "logging.level";

/// Read-only configuration shared by the engine, the interpreter and every
/// plugin host.
#[derive(Debug, Default)]
pub struct ConfigFile {
    root: toml::Table,
    silent: AtomicBool,
}

impl ConfigFile {
    /// An empty configuration; every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let root: toml::Table = text.parse()?;
        Ok(Self {
            root,
            silent: AtomicBool::new(false),
        })
    }

    /// Load a configuration file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn is_silent(&self) -> bool {
        self.silent.load(Ordering::Relaxed)
    }

    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::Relaxed);
    }

    /// Suppress type-mismatch warnings until the returned guard drops, then
    /// restore whatever setting was in force before.
    pub fn silenced(&self) -> SilentGuard<'_> {
        let previous = self.silent.swap(true, Ordering::Relaxed);
        SilentGuard {
            config: self,
            previous,
        }
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let mut current = self.root.get(segments.next()?)?;
        for segment in segments {
            current = current.as_table()?.get(segment)?;
        }
        Some(current)
    }

    fn mismatch(&self, key: &str, expected: &str, found: &Value) {
        if !self.is_silent() {
            tracing::warn!(
                key,
                expected,
                found = found.type_str(),
                "config value has an unexpected type"
            );
        }
    }

    fn typed<T>(&self, key: &str, expected: &str, convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
        let value = self.lookup(key)?;
        let converted = convert(value);
        if converted.is_none() {
            self.mismatch(key, expected, value);
        }
        converted
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.typed(key, "bool", value_as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.typed(key, "integer", value_as_int)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.typed(key, "float", value_as_double)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.typed(key, "string", |v| v.as_str().map(str::to_string))
    }

    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.typed(key, "string list", |v| {
            v.as_array()?
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect()
        })
    }

    pub fn get_integer_list(&self, key: &str) -> Option<Vec<i64>> {
        self.typed(key, "integer list", |v| {
            v.as_array()?.iter().map(Value::as_integer).collect()
        })
    }

    /// Keys of the table at `key`, or of the root table when `key` is empty.
    pub fn list_keys(&self, key: &str) -> Option<Vec<String>> {
        let table = if key.is_empty() {
            &self.root
        } else {
            self.lookup(key)?.as_table()?
        };
        Some(table.keys().cloned().collect())
    }

    /// Lua module directories, in declared order.
    pub fn module_paths(&self) -> Vec<String> {
        self.get_string_list(MODULE_PATHS_KEY).unwrap_or_default()
    }

    /// Plugins the host should create at startup, in declared order.
    pub fn engine_plugins(&self) -> Vec<String> {
        self.get_string_list(ENGINE_PLUGINS_KEY).unwrap_or_default()
    }

    /// The `[logging]` table, or defaults when it is absent.
    pub fn log_config(&self) -> Result<LogConfig, ConfigError> {
        match self.root.get("logging") {
            None => Ok(LogConfig::default()),
            Some(value) => value
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| ConfigError::InvalidValue {
                    key: "logging".to_string(),
                    message: err.to_string(),
                }),
        }
    }
}

/// Restores the previous silent setting of a [`ConfigFile`] on drop.
#[must_use = "silent mode ends when the guard is dropped"]
pub struct SilentGuard<'a> {
    config: &'a ConfigFile,
    previous: bool,
}

impl Drop for SilentGuard<'_> {
    fn drop(&mut self) {
        self.config.silent.store(self.previous, Ordering::Relaxed);
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_double(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Integer(i) => Some(*i as f64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[interpreter]
module_paths = ["/opt/plugins", "./local"]

[engine]
plugins = ["Tracer", "ForkLimiter"]

[plugins.Tracer]
lua_class = "tracer.Tracer"
enabled = true
threshold = 7
ratio = 0.5
zero = "0"
pi = "3.14"
names = ["a", "b"]
ports = [80, 443]
mixed = [1, "two"]
"#;

    fn sample() -> ConfigFile {
        ConfigFile::parse(SAMPLE).unwrap()
    }

    #[test]
    fn dotted_keys_reach_nested_tables() {
        let cfg = sample();
        assert_eq!(
            cfg.get_string("plugins.Tracer.lua_class").as_deref(),
            Some("tracer.Tracer")
        );
        assert_eq!(cfg.get_int("plugins.Tracer.threshold"), Some(7));
        assert_eq!(cfg.get_bool("plugins.Tracer.enabled"), Some(true));
    }

    #[test]
    fn missing_keys_return_none() {
        let cfg = sample();
        assert_eq!(cfg.get_int("plugins.Tracer.nope"), None);
        assert_eq!(cfg.get_int("plugins.Nope.threshold"), None);
        assert_eq!(cfg.get_int(""), None);
    }

    #[test]
    fn textual_values_are_tolerated() {
        let cfg = sample();
        assert_eq!(cfg.get_bool("plugins.Tracer.zero"), Some(false));
        assert_eq!(cfg.get_int("plugins.Tracer.zero"), Some(0));
        assert_eq!(cfg.get_bool("plugins.Tracer.pi"), None);
        assert_eq!(cfg.get_int("plugins.Tracer.pi"), None);
        assert_eq!(cfg.get_double("plugins.Tracer.pi"), Some(3.14));
    }

    #[test]
    fn integers_read_as_doubles_but_not_as_bools() {
        let cfg = sample();
        assert_eq!(cfg.get_double("plugins.Tracer.threshold"), Some(7.0));
        assert_eq!(cfg.get_bool("plugins.Tracer.threshold"), None);
        assert_eq!(cfg.get_int("plugins.Tracer.ratio"), None);
    }

    #[test]
    fn lists_convert_all_or_nothing() {
        let cfg = sample();
        assert_eq!(
            cfg.get_string_list("plugins.Tracer.names"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(cfg.get_integer_list("plugins.Tracer.ports"), Some(vec![80, 443]));
        assert_eq!(cfg.get_integer_list("plugins.Tracer.mixed"), None);
        assert_eq!(cfg.get_string_list("plugins.Tracer.mixed"), None);
    }

    #[test]
    fn list_keys_of_table_and_root() {
        let cfg = sample();
        let keys = cfg.list_keys("plugins").unwrap();
        assert_eq!(keys, vec!["Tracer".to_string()]);
        let root = cfg.list_keys("").unwrap();
        assert!(root.contains(&"engine".to_string()));
        assert_eq!(cfg.list_keys("plugins.Tracer.threshold"), None);
        assert_eq!(cfg.list_keys("absent"), None);
    }

    #[test]
    fn silent_guard_restores_previous_setting() {
        let cfg = sample();
        assert!(!cfg.is_silent());
        {
            let _guard = cfg.silenced();
            assert!(cfg.is_silent());
        }
        assert!(!cfg.is_silent());

        cfg.set_silent(true);
        {
            let _guard = cfg.silenced();
            assert!(cfg.is_silent());
        }
        assert!(cfg.is_silent());
    }

    #[test]
    fn well_known_keys() {
        let cfg = sample();
        assert_eq!(cfg.module_paths(), vec!["/opt/plugins", "./local"]);
        assert_eq!(cfg.engine_plugins(), vec!["Tracer", "ForkLimiter"]);
        assert!(ConfigFile::empty().module_paths().is_empty());
    }

    #[test]
    fn log_config_defaults_when_absent() {
        let cfg = sample();
        let log = cfg.log_config().unwrap();
        assert_eq!(log.level, "info");
    }

    #[test]
    fn log_config_reads_logging_table() {
        let cfg = ConfigFile::parse("[logging]\nlevel = \"debug\"\nformat = \"json\"\n").unwrap();
        let log = cfg.log_config().unwrap();
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, crate::logging::LogFormat::Json);
    }

    #[test]
    fn parse_errors_surface() {
        assert!(matches!(
            ConfigFile::parse("[unterminated"),
            Err(ConfigError::Parse(_))
        ));
    }
}
