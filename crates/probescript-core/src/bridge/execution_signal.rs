//! Lua wrapper for per-occurrence execution signals.
//!
//! Translation events hand plugins a fresh [`ExecutionSignal`] for every
//! block or instruction being translated. A script reacting to such an event
//! receives one long-lived [`LuaExecutionSignal`] whose target is moved to
//! the live signal right before the script runs, so `connect` inside the
//! callback attaches to the code being translated now.

use super::callback::connect_callback;
use super::fatal::FatalHandler;
use crate::engine::{Connection, ExecutionSignal};
use crate::error::{Error, Result};
use mlua::{Function, UserData, UserDataFields, UserDataMethods};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct Binding {
    target: Weak<ExecutionSignal>,
    connection: Connection,
}

impl Binding {
    fn is_live(&self) -> bool {
        self.target.strong_count() > 0 && self.connection.is_connected()
    }
}

#[derive(Default)]
struct Scoped {
    target: Weak<ExecutionSignal>,
    /// Oldest first. Bindings on code that is gone are pruned on connect.
    bindings: Vec<Binding>,
}

pub struct LuaExecutionSignal {
    context: String,
    fatal: Arc<dyn FatalHandler>,
    inner: Mutex<Scoped>,
}

impl LuaExecutionSignal {
    /// A wrapper with no target yet.
    pub fn new(context: impl Into<String>, fatal: Arc<dyn FatalHandler>) -> Self {
        Self {
            context: context.into(),
            fatal,
            inner: Mutex::new(Scoped::default()),
        }
    }

    /// Point the wrapper at `target`. Existing connections are untouched.
    pub fn update_target(&self, target: &Arc<ExecutionSignal>) {
        self.inner.lock().target = Arc::downgrade(target);
    }

    /// Whether the current target is still alive.
    pub fn has_target(&self) -> bool {
        self.inner.lock().target.strong_count() > 0
    }

    pub fn is_target(&self, signal: &Arc<ExecutionSignal>) -> bool {
        std::ptr::eq(self.inner.lock().target.as_ptr(), Arc::as_ptr(signal))
    }

    /// Attach `callback` to the current target.
    ///
    /// A previous binding on the same target is replaced. Bindings made on
    /// earlier targets stay connected: they instrument code that was
    /// translated before and live as long as that code, or until this
    /// wrapper is dropped.
    pub fn connect(&self, callback: Function) -> Result<()> {
        let mut inner = self.inner.lock();
        let target = inner
            .target
            .upgrade()
            .ok_or_else(|| Error::SignalUnavailable(self.context.clone()))?;

        let current = Arc::downgrade(&target);
        inner.bindings.retain(|binding| {
            if Weak::ptr_eq(&binding.target, &current) {
                binding.connection.disconnect();
                return false;
            }
            binding.is_live()
        });

        let connection =
            connect_callback(&*target, self.context.clone(), Arc::clone(&self.fatal), callback);
        inner.bindings.push(Binding {
            target: current,
            connection,
        });
        Ok(())
    }

    /// Release the most recent binding. Harmless when there is none.
    pub fn disconnect(&self) {
        if let Some(binding) = self.inner.lock().bindings.pop() {
            binding.connection.disconnect();
        }
    }

    /// Whether any binding made through this wrapper is still attached.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().bindings.iter().any(Binding::is_live)
    }

    /// Number of bindings still attached to live code.
    pub fn binding_count(&self) -> usize {
        self.inner
            .lock()
            .bindings
            .iter()
            .filter(|binding| binding.is_live())
            .count()
    }
}

impl Drop for LuaExecutionSignal {
    fn drop(&mut self) {
        for binding in self.inner.get_mut().bindings.drain(..) {
            binding.connection.disconnect();
        }
    }
}

impl UserData for LuaExecutionSignal {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("is_connected", |_, this| Ok(this.is_connected()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("connect", |_, this, callback: Function| {
            this.connect(callback).map_err(mlua::Error::from)
        });
        methods.add_method("disconnect", |_, this, ()| {
            this.disconnect();
            Ok(())
        });
    }
}
