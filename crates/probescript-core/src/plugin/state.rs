//! Per-execution-state plugin data for Lua plugins.
//!
//! A Lua plugin keeps its per-path data in a Lua value. The value stored on
//! the first state that asks for it is the instance's `_state` template
//! itself; every fork thereafter deep-copies through `probe.copy.deepcopy`,
//! so a child never observes writes made by its parent after the fork.

use super::ScriptContext;
use crate::bridge::fatal::{FatalHandler, describe_lua_error};
use crate::engine::PluginState;
use mlua::{Function, Table, Value as LuaValue};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Handle on the `probe.copy` module's `deepcopy`.
///
/// The function is looked up on first use, so a script that replaces
/// `deepcopy` before any fork gets its own copier.
pub struct DeepCopy {
    module: Table,
    func: Mutex<Option<Function>>,
}

impl DeepCopy {
    pub fn new(module: Table) -> Self {
        Self {
            module,
            func: Mutex::new(None),
        }
    }

    fn resolve(&self) -> mlua::Result<Function> {
        let mut func = self.func.lock();
        if let Some(f) = func.as_ref() {
            return Ok(f.clone());
        }
        let f: Function = self.module.get("deepcopy")?;
        *func = Some(f.clone());
        Ok(f)
    }

    pub fn copy(&self, value: &LuaValue) -> mlua::Result<LuaValue> {
        match value {
            LuaValue::Nil | LuaValue::Boolean(_) | LuaValue::Integer(_) | LuaValue::Number(_) => {
                Ok(value.clone())
            }
            _ => self.resolve()?.call(value.clone()),
        }
    }
}

pub struct LuaPluginState {
    value: LuaValue,
    copier: Arc<DeepCopy>,
    fatal: Arc<dyn FatalHandler>,
}

impl LuaPluginState {
    pub fn new(value: LuaValue, copier: Arc<DeepCopy>, fatal: Arc<dyn FatalHandler>) -> Self {
        Self {
            value,
            copier,
            fatal,
        }
    }

    pub fn value(&self) -> &LuaValue {
        &self.value
    }

    /// State for a state that has none yet: the plugin's `_state` template,
    /// or nil when the plugin defines none.
    pub fn factory(ctx: &ScriptContext, plugin: &str) -> Arc<dyn PluginState> {
        let value = match ctx.instances.state_of(plugin) {
            Ok(value) => value,
            Err(err) => ctx
                .fatal
                .foreign_error(&format!("{plugin}._state"), &describe_lua_error(&err)),
        };
        Arc::new(Self::new(value, Arc::clone(&ctx.copier), Arc::clone(&ctx.fatal)))
    }
}

impl PluginState for LuaPluginState {
    fn clone_state(&self) -> Arc<dyn PluginState> {
        let value = match self.copier.copy(&self.value) {
            Ok(value) => value,
            Err(err) => self
                .fatal
                .foreign_error("deepcopy", &describe_lua_error(&err)),
        };
        Arc::new(Self::new(value, Arc::clone(&self.copier), Arc::clone(&self.fatal)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for LuaPluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaPluginState")
            .field("type", &self.value.type_name())
            .finish_non_exhaustive()
    }
}
