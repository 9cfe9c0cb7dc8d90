//! Lua plugins: host objects, registry and fork-safe state.

pub mod host;
pub mod registry;
pub mod state;

pub use host::{PluginConfig, PluginHost};
pub use registry::{PluginCreator, PluginRegistration, PluginRegistry};
pub use state::{DeepCopy, LuaPluginState};

use crate::bridge::fatal::FatalHandler;
use crate::engine::{Plugin, PluginInfo};
use crate::error::Result;
use mlua::{Lua, Table, Value as LuaValue};
use std::sync::Arc;

/// Attribute of a plugin instance holding its template state.
pub const STATE_ATTRIBUTE: &str = "_state";

/// Loaded plugin instances, keyed by class name.
///
/// Backed by a Lua table so scripts can reach each other through
/// `probe.plugins.get_plugin`.
#[derive(Clone)]
pub struct PluginInstances {
    table: Table,
}

impl PluginInstances {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    pub(crate) fn table(&self) -> &Table {
        &self.table
    }

    pub fn insert(&self, name: &str, instance: &Table) -> mlua::Result<()> {
        self.table.raw_set(name, instance.clone())
    }

    pub fn contains(&self, name: &str) -> mlua::Result<bool> {
        self.table.contains_key(name)
    }

    pub fn get(&self, name: &str) -> mlua::Result<Option<Table>> {
        self.table.raw_get(name)
    }

    /// The instance's `_state`, or nil when the plugin or the attribute is
    /// missing.
    pub fn state_of(&self, name: &str) -> mlua::Result<LuaValue> {
        match self.get(name)? {
            Some(instance) => instance.get(STATE_ATTRIBUTE),
            None => Ok(LuaValue::Nil),
        }
    }
}

/// What native callbacks invoked from Lua need to reach the plugin layer.
/// Stored as interpreter app data.
#[derive(Clone)]
pub struct ScriptContext {
    pub instances: PluginInstances,
    pub copier: Arc<DeepCopy>,
    pub fatal: Arc<dyn FatalHandler>,
}

impl ScriptContext {
    pub fn from_lua(lua: &Lua) -> mlua::Result<Self> {
        lua.app_data_ref::<Self>()
            .map(|ctx| ctx.clone())
            .ok_or_else(|| mlua::Error::runtime("probe plugin support is not installed"))
    }
}

/// A plugin implemented by a Lua class instance.
pub struct LuaPlugin {
    info: PluginInfo,
    instance: Table,
}

impl LuaPlugin {
    pub fn new(info: PluginInfo, instance: Table) -> Self {
        Self { info, instance }
    }

    pub fn instance(&self) -> &Table {
        &self.instance
    }
}

impl Plugin for LuaPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    /// Run the instance's `initialize` method, if it has one.
    fn initialize(&self) -> Result<()> {
        match self.instance.get::<LuaValue>("initialize")? {
            LuaValue::Function(hook) => {
                hook.call::<()>(self.instance.clone())?;
            }
            LuaValue::Nil => {
                tracing::debug!(plugin = %self.info.name, "plugin has no initialize hook");
            }
            other => {
                tracing::debug!(
                    plugin = %self.info.name,
                    found = other.type_name(),
                    "initialize is not a function; skipping"
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LuaPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaPlugin")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
