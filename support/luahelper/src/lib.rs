//! Small helpers for moving values across the Rust/Lua boundary.
//!
//! Conversions here are all-or-nothing: a sequence either converts
//! completely, in order, or the whole call fails with the error of the
//! first element that did not convert.

use mlua::{FromLua, IntoLua, Lua, Table, Value as LuaValue};

/// Description used when a Lua error carries no usable text.
pub const UNFETCHABLE_ERROR: &str = "Unfetchable Lua error";

/// Convert an ordered Rust sequence into a 1-indexed Lua table.
pub fn to_lua_sequence<T, I>(lua: &Lua, items: I) -> mlua::Result<Table>
where
    T: IntoLua,
    I: IntoIterator<Item = T>,
{
    lua.create_sequence_from(items)
}

/// Convert a Lua sequence table into a `Vec<T>`.
///
/// `nil` is not accepted; callers that treat a missing list as empty
/// should check for it first.
pub fn from_lua_sequence<T: FromLua>(value: LuaValue) -> mlua::Result<Vec<T>> {
    match value {
        LuaValue::Table(table) => table
            .sequence_values::<T>()
            .enumerate()
            .map(|(idx, item)| {
                item.map_err(|err| {
                    mlua::Error::runtime(format!(
                        "sequence element {} did not convert: {}",
                        idx + 1,
                        err
                    ))
                })
            })
            .collect(),
        other => Err(mlua::Error::runtime(format!(
            "expected a sequence table, got {}",
            other.type_name()
        ))),
    }
}

/// Convert an optional Lua sequence, mapping `nil` to an empty `Vec`.
pub fn from_optional_lua_sequence<T: FromLua>(value: LuaValue) -> mlua::Result<Vec<T>> {
    if value.is_nil() {
        return Ok(Vec::new());
    }
    from_lua_sequence(value)
}

/// Render a Lua error as `"<Kind>: <message>"`.
///
/// Callback errors are unwrapped to their root cause so the description
/// names what the script actually raised rather than the Rust frame that
/// observed it.
pub fn describe_lua_error(err: &mlua::Error) -> String {
    let (kind, message) = match err {
        mlua::Error::RuntimeError(msg) => ("RuntimeError", msg.clone()),
        mlua::Error::SyntaxError { message, .. } => ("SyntaxError", message.clone()),
        mlua::Error::MemoryError(msg) => ("MemoryError", msg.clone()),
        mlua::Error::CallbackError { cause, .. } => return describe_lua_error(cause),
        mlua::Error::WithContext { context, cause } => {
            return format!("{}: {context}", describe_lua_error(cause));
        }
        mlua::Error::ExternalError(inner) => ("ExternalError", inner.to_string()),
        other => ("LuaError", other.to_string()),
    };

    let message = message.trim();
    if message.is_empty() {
        UNFETCHABLE_ERROR.to_string()
    } else {
        format!("{kind}: {message}")
    }
}
