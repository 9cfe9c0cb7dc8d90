//! Configuration values seen from Lua.

use crate::config::ConfigFile;
use mlua::{IntoLua, Lua, Value as LuaValue};

/// A configuration value whose type was decided by probing.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    StringList(Vec<String>),
    IntegerList(Vec<i64>),
}

impl IntoLua for ConfigValue {
    fn into_lua(self, lua: &Lua) -> mlua::Result<LuaValue> {
        match self {
            Self::Bool(b) => Ok(LuaValue::Boolean(b)),
            Self::Integer(i) => Ok(LuaValue::Integer(i)),
            Self::Float(f) => Ok(LuaValue::Number(f)),
            Self::String(s) => s.into_lua(lua),
            Self::StringList(items) => luahelper::to_lua_sequence(lua, items).map(LuaValue::Table),
            Self::IntegerList(items) => {
                luahelper::to_lua_sequence(lua, items).map(LuaValue::Table)
            }
        }
    }
}

/// Read `key` as whichever type matches first, in the fixed order bool,
/// integer, float, string, string list, integer list.
///
/// The order is what disambiguates textual values: `"0"` reads as `false`,
/// `"3.14"` as a float. Mismatch warnings are suppressed for the duration of
/// the probe.
pub fn probe_config_value(config: &ConfigFile, key: &str) -> Option<ConfigValue> {
    let _silent = config.silenced();
    config
        .get_bool(key)
        .map(ConfigValue::Bool)
        .or_else(|| config.get_int(key).map(ConfigValue::Integer))
        .or_else(|| config.get_double(key).map(ConfigValue::Float))
        .or_else(|| config.get_string(key).map(ConfigValue::String))
        .or_else(|| config.get_string_list(key).map(ConfigValue::StringList))
        .or_else(|| config.get_integer_list(key).map(ConfigValue::IntegerList))
}
