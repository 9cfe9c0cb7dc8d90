//! The per-plugin host object.
//!
//! Every Lua plugin instance carries a [`PluginHost`] in its `host` field.
//! The host starts out unconfigured when the class constructor runs; the
//! interpreter configures it exactly once after instantiation. From then on
//! it gives the script its identity, its configuration section and leveled
//! logging.

use crate::bridge::handles::LuaState;
use crate::bridge::value::{ConfigValue, probe_config_value};
use crate::config::{ConfigFile, LOG_LEVEL_KEY};
use crate::engine::{LogLevel, PluginInfo};
use crate::error::{Error, Result};
use mlua::{AnyUserData, MetaMethod, UserData, UserDataFields, UserDataMethods};
use std::sync::{Arc, OnceLock};

/// A plugin's view of its `[plugins.<config_key>]` section.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    config: Arc<ConfigFile>,
    prefix: String,
}

impl PluginConfig {
    pub fn new(config: Arc<ConfigFile>, config_key: &str) -> Self {
        Self {
            config,
            prefix: format!("plugins.{config_key}."),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Dynamically typed lookup; see [`probe_config_value`].
    pub fn get(&self, name: &str) -> Option<ConfigValue> {
        probe_config_value(&self.config, &self.key(name))
    }

    /// Keys of the sub-table `name`, or `None` when it is not a table.
    pub fn keys(&self, name: &str) -> Option<Vec<String>> {
        self.config.list_keys(&self.key(name))
    }
}

impl UserData for PluginConfig {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("keys", |lua, this, name: String| {
            this.keys(&name)
                .map(|keys| luahelper::to_lua_sequence(lua, keys))
                .transpose()
        });
        methods.add_meta_method(MetaMethod::Index, |_, this, name: String| Ok(this.get(&name)));
    }
}

#[derive(Debug)]
struct Configured {
    info: PluginInfo,
    config: PluginConfig,
    threshold: LogLevel,
}

#[derive(Debug, Default)]
pub struct PluginHost {
    configured: OnceLock<Configured>,
}

/// Threshold from `plugins.<key>.log_level`, then `logging.level`, then info.
fn resolve_threshold(config: &ConfigFile, config_key: &str) -> LogLevel {
    let plugin_key = format!("plugins.{config_key}.log_level");
    let Some(level) = config
        .get_string(&plugin_key)
        .or_else(|| config.get_string(LOG_LEVEL_KEY))
    else {
        return LogLevel::default();
    };
    level.parse().unwrap_or_else(|err: String| {
        tracing::warn!(plugin = config_key, "{err}; using info");
        LogLevel::default()
    })
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-time setup. A second call fails and leaves the first
    /// configuration in place.
    pub fn configure(&self, info: PluginInfo, config: Arc<ConfigFile>) -> Result<()> {
        let name = info.name.clone();
        let threshold = resolve_threshold(&config, &info.config_key);
        let plugin_config = PluginConfig::new(config, &info.config_key);
        self.configured
            .set(Configured {
                info,
                config: plugin_config,
                threshold,
            })
            .map_err(|_| Error::AlreadyConfigured(name))
    }

    pub fn is_configured(&self) -> bool {
        self.configured.get().is_some()
    }

    pub fn name(&self) -> Option<String> {
        self.info().map(|info| info.name.clone())
    }

    pub fn info(&self) -> Option<&PluginInfo> {
        self.configured.get().map(|c| &c.info)
    }

    pub fn config(&self) -> Option<&PluginConfig> {
        self.configured.get().map(|c| &c.config)
    }

    pub fn threshold(&self) -> Option<LogLevel> {
        self.configured.get().map(|c| c.threshold)
    }

    /// Whether a message at `level` would be written.
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.threshold().is_some_and(|threshold| level >= threshold)
    }

    /// Write `message` if `level` passes the threshold. Unconfigured hosts
    /// drop everything.
    pub fn log(&self, level: LogLevel, message: &str, state_id: Option<u64>) {
        let Some(configured) = self.configured.get() else {
            return;
        };
        if level < configured.threshold {
            return;
        }
        let plugin = configured.info.name.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(plugin, state_id, "{message}"),
            LogLevel::Debug => tracing::debug!(plugin, state_id, "{message}"),
            LogLevel::Info => tracing::info!(plugin, state_id, "{message}"),
            LogLevel::Warn => tracing::warn!(plugin, state_id, "{message}"),
            LogLevel::Error => tracing::error!(plugin, state_id, "{message}"),
        }
    }
}

fn state_id(state: Option<AnyUserData>) -> mlua::Result<Option<u64>> {
    state
        .map(|ud| ud.borrow::<LuaState>().map(|s| s.0.id()))
        .transpose()
}

impl UserData for PluginHost {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("configured", |_, this| Ok(this.is_configured()));
        fields.add_field_method_get("plugin_info", |lua, this| {
            let Some(info) = this.info() else {
                return Ok(None);
            };
            let table = lua.create_table()?;
            table.set("name", info.name.as_str())?;
            table.set("description", info.description.as_str())?;
            table.set("config_key", info.config_key.as_str())?;
            table.set(
                "dependencies",
                luahelper::to_lua_sequence(lua, info.dependencies.iter().map(String::as_str))?,
            )?;
            Ok(Some(table))
        });
        fields.add_field_method_get("config", |_, this| Ok(this.config().cloned()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        for (name, level) in [
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
        ] {
            methods.add_method(name, move |_, this, (message, state): (String, Option<AnyUserData>)| {
                this.log(level, &message, state_id(state)?);
                Ok(())
            });
        }
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(match this.name() {
                Some(name) => format!("PluginHost({name})"),
                None => "PluginHost(unconfigured)".to_string(),
            })
        });
    }
}
