//! Instrumentation through execution-scoped signals.
//!
//! Coverage focus:
//! - a callback connecting to the signal it was handed attaches to the
//!   instruction being translated right now, not an earlier one
//! - instrumentation from earlier translations keeps firing
//! - per-state plugin data updated from execution callbacks
//! - decision events (`symbolic_address`) answered by a plugin

mod common;

use common::Harness;
use probescript_core::engine::{Decision, Expr, SymbolicAddressReason, TranslationBlock};
use std::sync::Arc;

const COVERAGE: &str = r#"
local Plugin = probe.plugins.Plugin
local signals = probe.core.signals

local Coverage = Plugin:extend { description = "instruction coverage" }

function Coverage:init()
    self._state = { executed = {} }
    self.translated = {}
end

function Coverage:initialize()
    local plugin = self
    signals.on_translate_instruction_start:connect(function(sig, state, tb, pc)
        table.insert(plugin.translated, pc)
        if pc % 2 == 0 then
            sig:connect(function(s, at)
                table.insert(s:plugin_state(plugin).executed, at)
            end)
        end
    end)
    signals.on_symbolic_address:connect(function(state, address, concrete, reason)
        return reason == probe.core.SymbolicAddressReason.PC
    end)
end

return { Coverage = Coverage }
"#;

fn harness() -> Harness {
    let h = Harness::new(&[("coverage.lua", COVERAGE)], "");
    h.start("coverage.Coverage", "coverage");
    h
}

fn executed(h: &Harness, state: &probescript_core::engine::StateRef) -> Vec<u64> {
    h.interp
        .lua()
        .globals()
        .set("s", probescript_core::bridge::LuaState(Arc::clone(state)))
        .unwrap();
    let list: mlua::Value = h.eval("return s:plugin_state('Coverage').executed");
    luahelper::from_lua_sequence(list).unwrap()
}

#[test]
fn callbacks_attach_to_the_instruction_being_translated() {
    let h = harness();
    let state = h.engine.create_state();
    // instructions at 0x100, 0x101, 0x103, 0x104
    let tb = Arc::new(TranslationBlock::new(0x100, &[1, 2, 1, 2], 0));
    h.engine.translate_block(&state, &tb);
    h.engine.execute_block(&state, &tb);

    assert_eq!(executed(&h, &state), vec![0x100, 0x104]);
    let translated: Vec<u64> =
        luahelper::from_lua_sequence(h.eval("return probe.plugins.get_plugin('Coverage').translated"))
            .unwrap();
    assert_eq!(translated, vec![0x100, 0x101, 0x103, 0x104]);
}

#[test]
fn earlier_translations_keep_their_instrumentation() {
    let h = harness();
    let state = h.engine.create_state();
    let first = Arc::new(TranslationBlock::new(0x200, &[2], 0));
    let second = Arc::new(TranslationBlock::new(0x300, &[4], 0));
    h.engine.translate_block(&state, &first);
    h.engine.translate_block(&state, &second);

    h.engine.execute_block(&state, &second);
    h.engine.execute_block(&state, &first);
    h.engine.execute_block(&state, &second);
    assert_eq!(executed(&h, &state), vec![0x300, 0x200, 0x300]);
}

#[test]
fn each_state_records_its_own_executions() {
    let h = harness();
    let a = h.engine.create_state();
    let tb = Arc::new(TranslationBlock::new(0x400, &[2, 2], 0));
    h.engine.translate_block(&a, &tb);
    h.engine.execute_block(&a, &tb);

    let b = h.engine.fork_state(&a, Expr::symbol("c", 1)).unwrap();
    h.engine.execute_block(&b, &tb);

    assert_eq!(executed(&h, &a), vec![0x400, 0x402]);
    assert_eq!(executed(&h, &b), vec![0x400, 0x402, 0x400, 0x402]);
}

#[test]
fn symbolic_address_decision_comes_from_lua() {
    let h = harness();
    let state = h.engine.create_state();
    let events = h.engine.events();
    let on_pc = events.symbolic_address.emit((
        Arc::clone(&state),
        Expr::symbol("addr", 64),
        0x1000,
        SymbolicAddressReason::Pc,
    ));
    let on_memory = events.symbolic_address.emit((
        state,
        Expr::symbol("addr", 64),
        0x1000,
        SymbolicAddressReason::Memory,
    ));
    assert_eq!(on_pc, vec![Decision::YES]);
    assert_eq!(on_memory, vec![Decision::NO]);
}

#[test]
fn instrumentation_is_released_with_the_interpreter() {
    let h = harness();
    let engine = Arc::clone(&h.engine);
    let state = engine.create_state();
    let tb = Arc::new(TranslationBlock::new(0x500, &[2, 2], 0));
    engine.translate_block(&state, &tb);
    assert!(tb.instrumentation().iter().any(|(_, signal)| !signal.is_empty()));

    drop(h);
    engine.execute_block(&state, &tb);
    assert!(tb.instrumentation().iter().all(|(_, signal)| signal.is_empty()));
    assert!(engine.events().translate_instruction_start.is_empty());
}
