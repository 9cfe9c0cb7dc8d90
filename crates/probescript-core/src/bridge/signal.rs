//! Lua objects for the engine's core signals.
//!
//! Each core event is published to scripts as `probe.core.signals.on_<event>`,
//! a [`LuaSignal`] holding at most one Lua callback. Connecting again
//! replaces the callback; it never stacks.

use super::callback::{CallbackResult, MarshalArgs, connect_callback};
use super::fatal::FatalHandler;
use crate::engine::events::with_core_events;
use crate::engine::{
    Connection, CoreEvents, Decision, ExecutionSignal, ExprRef, Signal, SpecialInstruction,
    StateRef, SymbolicAddressReason, TbRef,
};
use crate::error::{Error, Result};
use mlua::{Function, Lua, MetaMethod, Table, UserData, UserDataFields, UserDataMethods};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub struct LuaSignal<A, R = ()> {
    name: &'static str,
    target: Weak<Signal<A, R>>,
    fatal: Arc<dyn FatalHandler>,
    connection: Mutex<Option<Connection>>,
}

impl<A, R> LuaSignal<A, R>
where
    A: MarshalArgs + Clone + 'static,
    R: CallbackResult + 'static,
{
    pub fn new(name: &'static str, target: Weak<Signal<A, R>>, fatal: Arc<dyn FatalHandler>) -> Self {
        Self {
            name,
            target,
            fatal,
            connection: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bind `callback`, disconnecting any previous binding first.
    pub fn connect(&self, callback: Function) -> Result<()> {
        let target = self
            .target
            .upgrade()
            .ok_or_else(|| Error::SignalUnavailable(self.name.to_string()))?;

        let mut connection = self.connection.lock();
        if let Some(previous) = connection.take() {
            previous.disconnect();
        }
        *connection = Some(connect_callback(
            &*target,
            self.name,
            Arc::clone(&self.fatal),
            callback,
        ));
        tracing::debug!(event = self.name, "Lua callback connected");
        Ok(())
    }

    /// Release the binding. Harmless when there is none.
    pub fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.disconnect();
            tracing::debug!(event = self.name, "Lua callback disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(Connection::is_connected)
    }
}

impl<A, R> Drop for LuaSignal<A, R> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.disconnect();
        }
    }
}

impl<A, R> UserData for LuaSignal<A, R>
where
    A: MarshalArgs + Clone + 'static,
    R: CallbackResult + 'static,
{
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("name", |_, this| Ok(this.name));
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
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("Signal(on_{})", this.name))
        });
    }
}

macro_rules! define_lua_signals {
    ($( $(#[$meta:meta])* $name:ident ( $($arg:ty),* ) -> $ret:ty ; )*) => {
        /// Build the `probe.core.signals` table: one `on_<event>` object per
        /// core event.
        pub fn export_signals(
            lua: &Lua,
            events: &CoreEvents,
            fatal: &Arc<dyn FatalHandler>,
        ) -> mlua::Result<Table> {
            let signals = lua.create_table()?;
            $(
                signals.set(
                    concat!("on_", stringify!($name)),
                    LuaSignal::<($($arg,)*), $ret>::new(
                        stringify!($name),
                        Arc::downgrade(&events.$name),
                        Arc::clone(fatal),
                    ),
                )?;
            )*
            Ok(signals)
        }
    };
}

with_core_events!(define_lua_signals);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::fatal::PanicOnForeignError;
    use crate::config::ConfigFile;
    use crate::engine::{Engine, ExecutionState, Expr, TranslationBlock};

    struct Fixture {
        lua: Lua,
        engine: Engine,
    }

    fn fixture() -> Fixture {
        let lua = Lua::new();
        let engine = Engine::new(Arc::new(ConfigFile::empty()));
        let fatal: Arc<dyn FatalHandler> = Arc::new(PanicOnForeignError);
        let signals = export_signals(&lua, engine.events(), &fatal).unwrap();
        lua.globals().set("signals", signals).unwrap();
        lua.load("hits = {}").exec().unwrap();
        Fixture { lua, engine }
    }

    fn hits(lua: &Lua) -> Vec<String> {
        luahelper::from_lua_sequence(lua.globals().get("hits").unwrap()).unwrap()
    }

    fn state() -> StateRef {
        Arc::new(ExecutionState::new(4))
    }

    // ── Binding replacement ────────────────────────────────────

    #[test]
    fn second_connect_replaces_first() {
        let f = fixture();
        f.lua
            .load(
                r"
                signals.on_state_kill:connect(function(s) table.insert(hits, 'first') end)
                signals.on_state_kill:connect(function(s) table.insert(hits, 'second') end)
                ",
            )
            .exec()
            .unwrap();
        assert_eq!(f.engine.events().state_kill.slot_count(), 1);
        f.engine.events().state_kill.emit((state(),));
        assert_eq!(hits(&f.lua), vec!["second"]);
    }

    // ── Disconnection ──────────────────────────────────────────

    #[test]
    fn disconnect_twice_or_unbound_is_a_no_op() {
        let f = fixture();
        f.lua
            .load(
                r"
                signals.on_timer:disconnect()
                assert(not signals.on_timer.is_connected)
                signals.on_timer:connect(function() table.insert(hits, 'tick') end)
                assert(signals.on_timer.is_connected)
                signals.on_timer:disconnect()
                signals.on_timer:disconnect()
                assert(not signals.on_timer.is_connected)
                ",
            )
            .exec()
            .unwrap();
        f.engine.events().timer.emit(());
        assert!(hits(&f.lua).is_empty());
    }

    #[test]
    fn disconnect_from_inside_the_callback() {
        let f = fixture();
        f.lua
            .load(
                r"
                signals.on_timer:connect(function()
                    table.insert(hits, 'once')
                    signals.on_timer:disconnect()
                end)
                ",
            )
            .exec()
            .unwrap();
        f.engine.events().timer.emit(());
        f.engine.events().timer.emit(());
        assert_eq!(hits(&f.lua), vec!["once"]);
    }

    #[test]
    fn reconnect_during_dispatch_takes_effect_next_time() {
        let f = fixture();
        f.lua
            .load(
                r"
                signals.on_timer:connect(function()
                    table.insert(hits, 'old')
                    signals.on_timer:connect(function() table.insert(hits, 'new') end)
                end)
                ",
            )
            .exec()
            .unwrap();
        f.engine.events().timer.emit(());
        f.engine.events().timer.emit(());
        assert_eq!(hits(&f.lua), vec!["old", "new"]);
    }

    // ── Decisions through the signal table ─────────────────────

    #[test]
    fn decision_events_return_script_answers() {
        let f = fixture();
        f.lua
            .load("signals.on_symbolic_address:connect(function(s, addr, concrete, reason) return concrete > 0x1000 end)")
            .exec()
            .unwrap();
        let events = f.engine.events();
        let low = events.symbolic_address.emit((
            state(),
            Expr::symbol("a", 64),
            0x10,
            SymbolicAddressReason::Memory,
        ));
        let high = events.symbolic_address.emit((
            state(),
            Expr::symbol("a", 64),
            0x2000,
            SymbolicAddressReason::Pc,
        ));
        assert_eq!(low, vec![Decision::NO]);
        assert_eq!(high, vec![Decision::YES]);
    }

    #[test]
    #[should_panic(expected = "Lua error in state_fork_decide")]
    fn raising_decision_callback_is_fatal() {
        let f = fixture();
        f.lua
            .load("signals.on_state_fork_decide:connect(function(s) error('boom') end)")
            .exec()
            .unwrap();
        f.engine.events().state_fork_decide.emit((state(),));
    }

    // ── Lifetime ───────────────────────────────────────────────

    #[test]
    fn connect_after_engine_is_gone_raises() {
        let lua = Lua::new();
        let fatal: Arc<dyn FatalHandler> = Arc::new(PanicOnForeignError);
        {
            let events = CoreEvents::new();
            let signals = export_signals(&lua, &events, &fatal).unwrap();
            lua.globals().set("signals", signals).unwrap();
        }
        let err = lua
            .load("signals.on_timer:connect(function() end)")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("signal 'timer' is not available"), "{err}");
    }

    #[test]
    fn every_event_is_exported() {
        let f = fixture();
        let signals: Table = f.lua.globals().get("signals").unwrap();
        for event in crate::engine::CORE_EVENTS {
            let key = format!("on_{}", event.name);
            assert!(signals.contains_key(key.as_str()).unwrap(), "{key} missing");
        }
    }

    #[test]
    fn execution_signal_argument_targets_the_live_signal() {
        let f = fixture();
        f.lua
            .load(
                r"
                signals.on_translate_instruction_start:connect(function(sig, state, tb, pc)
                    if pc == tb.pc then
                        sig:connect(function(s, at) table.insert(hits, string.format('exec %x', at)) end)
                    end
                end)
                ",
            )
            .exec()
            .unwrap();

        let engine = &f.engine;
        let state = engine.create_state();
        let a = Arc::new(TranslationBlock::new(0x1000, &[2, 2], 0));
        let b = Arc::new(TranslationBlock::new(0x2000, &[4], 0));
        engine.translate_block(&state, &a);
        engine.translate_block(&state, &b);
        engine.execute_block(&state, &b);
        engine.execute_block(&state, &a);
        assert_eq!(hits(&f.lua), vec!["exec 2000", "exec 1000"]);
    }

    #[test]
    fn scoped_wrapper_is_retargeted_each_dispatch() {
        let f = fixture();
        f.lua
            .load(
                r"
                signals.on_translate_block_start:connect(function(sig, state, tb, pc)
                    sig:connect(function(s, at) table.insert(hits, 'block ' .. at) end)
                end)
                ",
            )
            .exec()
            .unwrap();
        let events = f.engine.events();
        let x: Arc<ExecutionSignal> = Arc::new(Signal::new());
        let y: Arc<ExecutionSignal> = Arc::new(Signal::new());
        let tb = Arc::new(TranslationBlock::new(0x10, &[1], 0));

        events.translate_block_start.emit((Arc::clone(&y), state(), Arc::clone(&tb), 1));
        events.translate_block_start.emit((Arc::clone(&x), state(), Arc::clone(&tb), 2));
        assert_eq!(x.slot_count(), 1);
        assert_eq!(y.slot_count(), 1);
        x.emit((state(), 2));
        assert_eq!(hits(&f.lua), vec!["block 2"]);
    }
}
