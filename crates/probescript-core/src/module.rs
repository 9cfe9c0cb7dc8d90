//! The `probe` module family seen by scripts.
//!
//! ```text
//! probe.core          engine singletons and enum tables (SpecialInstruction,
//!                     SymbolicAddressReason, AddressType)
//! probe.core.signals  one on_<event> object per core event
//! probe.plugins       Plugin base class, get_plugin
//! probe.copy          deepcopy
//! ```
//!
//! Every module is registered in `package.loaded`, so `require "probe.core"`
//! and the global `probe` table give the same objects.

use crate::bridge::fatal::FatalHandler;
use crate::bridge::signal::export_signals;
use crate::engine::{AddressType, Engine, SpecialInstruction, SymbolicAddressReason};
use crate::plugin::host::PluginHost;
use crate::plugin::{DeepCopy, PluginInstances, ScriptContext};
use mlua::{Lua, Table, Value as LuaValue};
use std::sync::Arc;

const COPY_MODULE: &str = include_str!("lua/copy.lua");
const PLUGIN_PRELUDE: &str = include_str!("lua/plugin.lua");

/// Build and register the `probe` modules, and store the resulting
/// [`ScriptContext`] as app data of `lua`.
pub fn install(
    lua: &Lua,
    engine: &Engine,
    fatal: &Arc<dyn FatalHandler>,
) -> mlua::Result<ScriptContext> {
    let loaded: Table = lua.globals().get::<Table>("package")?.get("loaded")?;

    let copy: Table = lua.load(COPY_MODULE).set_name("=probe.copy").eval()?;
    let signals = export_signals(lua, engine.events(), fatal)?;
    let core = core_module(lua, engine)?;
    core.set("signals", signals.clone())?;
    let plugins = plugins_module(lua)?;

    let probe = lua.create_table()?;
    probe.set("core", core.clone())?;
    probe.set("plugins", plugins.clone())?;
    probe.set("copy", copy.clone())?;

    loaded.set("probe", probe.clone())?;
    loaded.set("probe.core", core)?;
    loaded.set("probe.core.signals", signals)?;
    loaded.set("probe.plugins", plugins)?;
    loaded.set("probe.copy", copy.clone())?;
    lua.globals().set("probe", probe)?;

    let ctx = ScriptContext {
        instances: PluginInstances::new(lua.create_table()?),
        copier: Arc::new(DeepCopy::new(copy)),
        fatal: Arc::clone(fatal),
    };
    lua.set_app_data(ctx.clone());
    tracing::debug!("probe modules installed");
    Ok(ctx)
}

fn core_module(lua: &Lua, engine: &Engine) -> mlua::Result<Table> {
    let core = lua.create_table()?;

    let engine_table = lua.create_table()?;
    let output_directory = engine.output_directory().to_path_buf();
    engine_table.set(
        "output_directory",
        output_directory.to_string_lossy().into_owned(),
    )?;
    engine_table.set(
        "output_file",
        lua.create_function(move |_, name: String| {
            Ok(output_directory.join(name).to_string_lossy().into_owned())
        })?,
    )?;
    core.set("engine", engine_table)?;

    let special = lua.create_table()?;
    for op in SpecialInstruction::ALL {
        special.set(op.name(), op as i64)?;
    }
    core.set("SpecialInstruction", special)?;

    let reasons = lua.create_table()?;
    for reason in SymbolicAddressReason::ALL {
        reasons.set(reason.name(), reason as i64)?;
    }
    core.set("SymbolicAddressReason", reasons)?;

    let address_types = lua.create_table()?;
    for kind in AddressType::ALL {
        address_types.set(kind.name(), kind as i64)?;
    }
    core.set("AddressType", address_types)?;

    Ok(core)
}

fn plugins_module(lua: &Lua) -> mlua::Result<Table> {
    let new_host = lua.create_function(|_, ()| Ok(PluginHost::new()))?;
    let get_plugin = lua.create_function(|lua, name: String| {
        let ctx = ScriptContext::from_lua(lua)?;
        Ok(ctx.instances.get(&name)?.map_or(LuaValue::Nil, LuaValue::Table))
    })?;
    let plugin_class: Table = lua
        .load(PLUGIN_PRELUDE)
        .set_name("=probe.plugins")
        .call((new_host, get_plugin.clone()))?;

    let plugins = lua.create_table()?;
    plugins.set("Plugin", plugin_class)?;
    plugins.set("get_plugin", get_plugin)?;
    Ok(plugins)
}
