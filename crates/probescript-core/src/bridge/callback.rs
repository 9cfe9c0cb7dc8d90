//! Calling Lua functions from native signals.
//!
//! A [`CallbackAdapter`] turns one Lua function into a native slot with a
//! fixed argument tuple. Arguments are converted element by element through
//! [`Marshal`]; engine objects travel as userdata sharing the native `Arc`,
//! never as copies. The Lua return value is converted back through
//! [`CallbackResult`].

use super::execution_signal::LuaExecutionSignal;
use super::fatal::{FatalHandler, describe_lua_error};
use super::handles::{LuaBlock, LuaExpr, LuaState, address_to_lua};
use crate::engine::{
    Connection, Decision, EventResult, ExecutionSignal, ExprRef, Signal, SpecialInstruction,
    StateRef, SymbolicAddressReason, TbRef,
};
use mlua::{AnyUserData, Function, IntoLuaMulti, Lua, MultiValue, Value as LuaValue};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

/// Conversion state for one call into Lua.
pub struct MarshalContext<'a> {
    pub lua: &'a Lua,
    context: &'a str,
    fatal: &'a Arc<dyn FatalHandler>,
    scoped: &'a Mutex<Option<AnyUserData>>,
}

impl MarshalContext<'_> {
    /// The adapter's execution-scoped wrapper, retargeted at `target`.
    ///
    /// The wrapper is created on first use and reused afterwards, so a
    /// script sees the same object on every dispatch while its target
    /// follows the engine.
    fn scoped_wrapper(&self, target: &Arc<ExecutionSignal>) -> mlua::Result<AnyUserData> {
        let wrapper = {
            let mut slot = self.scoped.lock();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let created = self.lua.create_userdata(LuaExecutionSignal::new(
                        format!("{}.execution_signal", self.context),
                        Arc::clone(self.fatal),
                    ))?;
                    *slot = Some(created.clone());
                    created
                }
            }
        };
        wrapper.borrow::<LuaExecutionSignal>()?.update_target(target);
        Ok(wrapper)
    }
}

/// A native value that can be handed to a Lua callback.
pub trait Marshal {
    fn marshal(self, ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue>;
}

macro_rules! marshal_as_integer {
    ($($t:ty),*) => {
        $(
            impl Marshal for $t {
                fn marshal(self, _ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
                    Ok(LuaValue::Integer(i64::from(self)))
                }
            }
        )*
    };
}

marshal_as_integer!(u8, u32, i32, i64);

// Same representation as the address fields of the handles.
impl Marshal for u64 {
    fn marshal(self, _ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        Ok(LuaValue::Integer(address_to_lua(self)))
    }
}

impl Marshal for bool {
    fn marshal(self, _ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        Ok(LuaValue::Boolean(self))
    }
}

impl Marshal for String {
    fn marshal(self, ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        ctx.lua.create_string(&self).map(LuaValue::String)
    }
}

impl Marshal for StateRef {
    fn marshal(self, ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        ctx.lua.create_userdata(LuaState(self)).map(LuaValue::UserData)
    }
}

impl Marshal for TbRef {
    fn marshal(self, ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        ctx.lua.create_userdata(LuaBlock(self)).map(LuaValue::UserData)
    }
}

impl Marshal for ExprRef {
    fn marshal(self, ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        ctx.lua.create_userdata(LuaExpr(self)).map(LuaValue::UserData)
    }
}

impl Marshal for Arc<ExecutionSignal> {
    fn marshal(self, ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        ctx.scoped_wrapper(&self).map(LuaValue::UserData)
    }
}

impl Marshal for SpecialInstruction {
    fn marshal(self, _ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        Ok(LuaValue::Integer(self as i64))
    }
}

impl Marshal for SymbolicAddressReason {
    fn marshal(self, _ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        Ok(LuaValue::Integer(self as i64))
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn marshal(self, ctx: &MarshalContext<'_>) -> mlua::Result<LuaValue> {
        let items = self
            .into_iter()
            .map(|item| item.marshal(ctx))
            .collect::<mlua::Result<Vec<_>>>()?;
        luahelper::to_lua_sequence(ctx.lua, items).map(LuaValue::Table)
    }
}

/// A native argument tuple, converted in order.
pub trait MarshalArgs {
    fn marshal_args(self, ctx: &MarshalContext<'_>) -> mlua::Result<MultiValue>;
}

macro_rules! impl_marshal_args {
    ($($name:ident),*) => {
        impl<$($name: Marshal),*> MarshalArgs for ($($name,)*) {
            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn marshal_args(self, ctx: &MarshalContext<'_>) -> mlua::Result<MultiValue> {
                let ($($name,)*) = self;
                let mut values: Vec<LuaValue> = Vec::new();
                $( values.push($name.marshal(ctx)?); )*
                Ok(MultiValue::from_iter(values))
            }
        }
    };
}

impl_marshal_args!();
impl_marshal_args!(A1);
impl_marshal_args!(A1, A2);
impl_marshal_args!(A1, A2, A3);
impl_marshal_args!(A1, A2, A3, A4);
impl_marshal_args!(A1, A2, A3, A4, A5);
impl_marshal_args!(A1, A2, A3, A4, A5, A6);
impl_marshal_args!(A1, A2, A3, A4, A5, A6, A7);
impl_marshal_args!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Argument tuple bound to the adapter that is calling out, so conversion
/// happens with the interpreter mlua hands us at call time.
struct CallArgs<'a, A, R> {
    args: A,
    adapter: &'a CallbackAdapter<A, R>,
}

impl<A: MarshalArgs, R> IntoLuaMulti for CallArgs<'_, A, R> {
    fn into_lua_multi(self, lua: &Lua) -> mlua::Result<MultiValue> {
        let ctx = MarshalContext {
            lua,
            context: &self.adapter.context,
            fatal: &self.adapter.fatal,
            scoped: &self.adapter.scoped,
        };
        self.args.marshal_args(&ctx)
    }
}

/// What a slot hands back to the engine, read from the Lua return value.
pub trait CallbackResult: EventResult {
    /// `Err` carries a description for the fatal handler.
    fn from_lua_return(value: LuaValue) -> Result<Self, String>;
}

impl CallbackResult for () {
    fn from_lua_return(_value: LuaValue) -> Result<Self, String> {
        Ok(())
    }
}

impl CallbackResult for Decision {
    fn from_lua_return(value: LuaValue) -> Result<Self, String> {
        match value {
            LuaValue::Boolean(answer) => Ok(Self(answer)),
            other => Err(format!(
                "TypeError: decision callback returned {} instead of a boolean",
                other.type_name()
            )),
        }
    }
}

/// One Lua function behind a native call operator.
pub struct CallbackAdapter<A, R = ()> {
    context: String,
    fatal: Arc<dyn FatalHandler>,
    callback: Mutex<Option<Function>>,
    scoped: Mutex<Option<AnyUserData>>,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A: MarshalArgs, R: CallbackResult> CallbackAdapter<A, R> {
    /// An adapter with no callback. `context` names it in fatal errors.
    pub fn new(context: impl Into<String>, fatal: Arc<dyn FatalHandler>) -> Self {
        Self {
            context: context.into(),
            fatal,
            callback: Mutex::new(None),
            scoped: Mutex::new(None),
            _signature: PhantomData,
        }
    }

    /// Store `callback`, replacing any previous one.
    pub fn assign_callback(&self, callback: Function) {
        *self.callback.lock() = Some(callback);
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Invoke the callback with `args`.
    ///
    /// A Lua error, or a return value `R` cannot be read from, goes to the
    /// fatal handler. Without a callback this returns `R::default()`.
    pub fn call(&self, args: A) -> R {
        let callback = self.callback.lock().clone();
        let Some(callback) = callback else {
            tracing::debug!(context = %self.context, "callback adapter invoked without a callback");
            return R::default();
        };

        let returned = match callback.call::<LuaValue>(CallArgs {
            args,
            adapter: self,
        }) {
            Ok(value) => value,
            Err(err) => self
                .fatal
                .foreign_error(&self.context, &describe_lua_error(&err)),
        };

        match R::from_lua_return(returned) {
            Ok(result) => result,
            Err(description) => self.fatal.foreign_error(&self.context, &description),
        }
    }
}

/// Connect `callback` to `signal` through a fresh adapter.
pub(crate) fn connect_callback<A, R>(
    signal: &Signal<A, R>,
    context: impl Into<String>,
    fatal: Arc<dyn FatalHandler>,
    callback: Function,
) -> Connection
where
    A: MarshalArgs + 'static,
    R: CallbackResult + 'static,
{
    let adapter = CallbackAdapter::new(context, fatal);
    adapter.assign_callback(callback);
    let adapter = Arc::new(adapter);
    signal.connect(move |args| adapter.call(args))
}
