//! Userdata handles for engine objects.
//!
//! Every handle shares the engine's `Arc`; a script writing `state.pc`
//! writes the engine's register, not a copy.
//!
//! Addresses are 64-bit and cross into Lua as integers with the same bit
//! pattern, so the upper half of the address space shows up negative.
//! Getters, setters and callback arguments all use that representation, so
//! an address read in one place compares equal to the same address read in
//! another.

use crate::engine::{AddressType, ExprRef, StateRef, TbRef};
use crate::plugin::host::PluginHost;
use crate::plugin::state::LuaPluginState;
use crate::plugin::ScriptContext;
use mlua::{
    AnyUserData, Lua, MetaMethod, UserData, UserDataFields, UserDataMethods, Value as LuaValue,
};
use std::sync::Arc;

/// Lua representation of a guest address.
pub(crate) fn address_to_lua(address: u64) -> i64 {
    address as i64
}

pub(crate) fn address_from_lua(address: i64) -> u64 {
    address as u64
}

pub struct LuaState(pub StateRef);

impl LuaState {
    /// The plugin's state in this execution state, created on first access.
    fn plugin_state(&self, lua: &Lua, plugin: &LuaValue) -> mlua::Result<LuaValue> {
        let name = plugin_name(plugin)?;
        let ctx = ScriptContext::from_lua(lua)?;
        let state = self
            .0
            .plugin_state(&name, || LuaPluginState::factory(&ctx, &name));
        state
            .as_any()
            .downcast_ref::<LuaPluginState>()
            .map(|s| s.value().clone())
            .ok_or_else(|| {
                mlua::Error::runtime(format!("state of plugin '{name}' is not a Lua value"))
            })
    }
}

/// Accept either a plugin name or a plugin instance.
fn plugin_name(plugin: &LuaValue) -> mlua::Result<String> {
    match plugin {
        LuaValue::String(s) => Ok(s.to_str()?.to_string()),
        LuaValue::Table(instance) => {
            let host: AnyUserData = instance.get("host")?;
            host.borrow::<PluginHost>()?
                .name()
                .ok_or_else(|| mlua::Error::runtime("plugin instance is not configured yet"))
        }
        other => Err(mlua::Error::runtime(format!(
            "expected a plugin name or instance, got {}",
            other.type_name()
        ))),
    }
}

impl UserData for LuaState {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, this| Ok(this.0.id()));
        fields.add_field_method_get("pc", |_, this| Ok(address_to_lua(this.0.pc())));
        fields.add_field_method_set("pc", |_, this, pc: i64| {
            this.0.set_pc(address_from_lua(pc));
            Ok(())
        });
        fields.add_field_method_get("sp", |_, this| Ok(address_to_lua(this.0.sp())));
        fields.add_field_method_set("sp", |_, this, sp: i64| {
            this.0.set_sp(address_from_lua(sp));
            Ok(())
        });
        fields.add_field_method_get("forking_enabled", |_, this| Ok(this.0.forking_enabled()));
        fields.add_field_method_set("forking_enabled", |_, this, enabled: bool| {
            this.0.set_forking_enabled(enabled);
            Ok(())
        });
        fields.add_field_method_get("pinned", |_, this| Ok(this.0.is_pinned()));
        fields.add_field_method_set("pinned", |_, this, pinned: bool| {
            this.0.set_pinned(pinned);
            Ok(())
        });
        fields.add_field_method_get("zombie", |_, this| Ok(this.0.is_zombie()));
        fields.add_field_method_get("regs", |_, this| Ok(LuaRegisters(Arc::clone(&this.0))));
        fields.add_field_method_get("memory", |_, this| Ok(LuaMemory(Arc::clone(&this.0))));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("plugin_state", |lua, this, plugin: LuaValue| {
            this.plugin_state(lua, &plugin)
        });
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData| {
            Ok(other
                .borrow::<Self>()
                .is_ok_and(|other| Arc::ptr_eq(&this.0, &other.0)))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("ExecutionState({})", this.0.id()))
        });
    }
}

/// Register file of one execution state.
pub struct LuaRegisters(pub StateRef);

impl UserData for LuaRegisters {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("pc", |_, this| Ok(address_to_lua(this.0.pc())));
        fields.add_field_method_set("pc", |_, this, pc: i64| {
            this.0.set_pc(address_from_lua(pc));
            Ok(())
        });
        fields.add_field_method_get("sp", |_, this| Ok(address_to_lua(this.0.sp())));
        fields.add_field_method_set("sp", |_, this, sp: i64| {
            this.0.set_sp(address_from_lua(sp));
            Ok(())
        });
        fields.add_field_method_get("bp", |_, this| Ok(address_to_lua(this.0.bp())));
        fields.add_field_method_set("bp", |_, this, bp: i64| {
            this.0.set_bp(address_from_lua(bp));
            Ok(())
        });
        fields.add_field_method_get("flags", |_, this| {
            Ok(address_to_lua(this.0.registers().flags))
        });
        fields.add_field_method_get("page_dir", |_, this| {
            Ok(address_to_lua(this.0.registers().page_dir))
        });
    }
}

fn address_type(kind: Option<i64>) -> mlua::Result<AddressType> {
    match kind {
        None => Ok(AddressType::Virtual),
        Some(code) => AddressType::from_code(code)
            .ok_or_else(|| mlua::Error::runtime(format!("unknown address type {code}"))),
    }
}

/// Guest memory of one execution state. Lookups of unmapped memory give
/// `nil`, writes to it give `false`.
pub struct LuaMemory(pub StateRef);

impl UserData for LuaMemory {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("is_mapped", |_, this, address: i64| {
            Ok(this.0.memory().is_mapped(address_from_lua(address)))
        });
        methods.add_method("get_physical_address", |_, this, address: i64| {
            Ok(this
                .0
                .memory()
                .get_physical_address(address_from_lua(address))
                .map(address_to_lua))
        });
        methods.add_method(
            "read",
            |lua, this, (address, len, kind): (i64, usize, Option<i64>)| {
                let bytes = this
                    .0
                    .memory()
                    .read(address_from_lua(address), len, address_type(kind)?);
                bytes.map(|bytes| lua.create_string(bytes)).transpose()
            },
        );
        methods.add_method(
            "write",
            |_, this, (address, data, kind): (i64, mlua::String, Option<i64>)| {
                let kind = address_type(kind)?;
                let bytes = data.as_bytes();
                Ok(this.0.memory().write(address_from_lua(address), &bytes, kind))
            },
        );
        methods.add_method(
            "read_int",
            |_, this, (address, size, kind): (i64, usize, Option<i64>)| {
                let value = this
                    .0
                    .memory()
                    .read_int(address_from_lua(address), size, address_type(kind)?);
                Ok(value.map(address_to_lua))
            },
        );
        methods.add_method(
            "write_int",
            |_, this, (address, value, size, kind): (i64, i64, usize, Option<i64>)| {
                let kind = address_type(kind)?;
                Ok(this.0.memory().write_int(
                    address_from_lua(address),
                    address_from_lua(value),
                    size,
                    kind,
                ))
            },
        );
        methods.add_method(
            "read_dirty_mask",
            |_, this, (address, kind): (i64, Option<i64>)| {
                let kind = address_type(kind)?;
                Ok(this.0.memory().read_dirty_mask(address_from_lua(address), kind))
            },
        );
        methods.add_method(
            "write_dirty_mask",
            |_, this, (address, mask, kind): (i64, u8, Option<i64>)| {
                let kind = address_type(kind)?;
                Ok(this
                    .0
                    .memory()
                    .write_dirty_mask(address_from_lua(address), mask, kind))
            },
        );
    }
}

pub struct LuaBlock(pub TbRef);

impl UserData for LuaBlock {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("pc", |_, this| Ok(address_to_lua(this.0.pc())));
        fields.add_field_method_get("last_pc", |_, this| Ok(address_to_lua(this.0.last_pc())));
        fields.add_field_method_get("size", |_, this| Ok(this.0.size()));
        fields.add_field_method_get("icount", |_, this| Ok(this.0.icount()));
        fields.add_field_method_get("flags", |_, this| Ok(address_to_lua(this.0.flags())));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("instructions", |lua, this, ()| {
            luahelper::to_lua_sequence(
                lua,
                this.0.instruction_pcs().iter().copied().map(address_to_lua),
            )
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("TranslationBlock({:#x})", this.0.pc()))
        });
    }
}

/// Opaque symbolic expression.
pub struct LuaExpr(pub ExprRef);

impl UserData for LuaExpr {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("width", |_, this| Ok(this.0.width()));
        fields.add_field_method_get("is_constant", |_, this| Ok(this.0.is_constant()));
        fields.add_field_method_get("value", |_, this| {
            Ok(this.0.as_constant().map(address_to_lua))
        });
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
    }
}
