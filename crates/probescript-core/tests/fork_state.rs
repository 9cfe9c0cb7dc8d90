//! Plugin state across engine forks.
//!
//! Coverage focus:
//! - `_state` template handed to the first state that asks
//! - deep copies on fork: parent and child never share mutable data
//! - `state_fork_decide` answers from Lua vetoing or allowing forks
//! - `state_fork` arguments as seen by the script

mod common;

use common::Harness;
use probescript_core::engine::Expr;

const COUNTER: &str = r#"
local Plugin = probe.plugins.Plugin
local signals = probe.core.signals

local Counter = Plugin:extend { description = "per-path counters" }

function Counter:init()
    self._state = { visits = 0, trail = {} }
end

function Counter:initialize()
    local plugin = self
    signals.on_state_fork_decide:connect(function(state)
        return state:plugin_state(plugin).visits < 3
    end)
    signals.on_state_fork:connect(function(origin, states, conditions)
        plugin.last_fork = {
            origin = origin.id,
            count = #states,
            child = states[2].id,
            negated = tostring(conditions[1]),
        }
    end)
end

function Counter:visit(state, tag)
    local s = state:plugin_state(self)
    s.visits = s.visits + 1
    table.insert(s.trail, tag)
end

return { Counter = Counter }
"#;

fn harness() -> Harness {
    let h = Harness::new(&[("counter.lua", COUNTER)], "");
    h.start("counter.Counter", "counter");
    h
}

fn visit(h: &Harness, state: &probescript_core::engine::StateRef, tag: &str) {
    let lua = h.interp.lua();
    let counter: mlua::Table = lua.load("return probe.plugins.get_plugin('Counter')").eval().unwrap();
    let visit: mlua::Function = counter.get("visit").unwrap();
    visit
        .call::<()>((counter, probescript_core::bridge::LuaState(state.clone()), tag))
        .unwrap();
}

fn visits(h: &Harness, state: &probescript_core::engine::StateRef) -> (i64, Vec<String>) {
    let lua = h.interp.lua();
    lua.globals()
        .set("s", probescript_core::bridge::LuaState(state.clone()))
        .unwrap();
    let (count, trail): (i64, mlua::Value) = lua
        .load("local st = s:plugin_state('Counter'); return st.visits, st.trail")
        .eval()
        .unwrap();
    (count, luahelper::from_lua_sequence(trail).unwrap())
}

#[test]
fn first_state_uses_the_template() {
    let h = harness();
    let state = h.engine.create_state();
    visit(&h, &state, "a");
    let template_visits: i64 = h.eval("return probe.plugins.get_plugin('Counter')._state.visits");
    assert_eq!(template_visits, 1);
}

#[test]
fn forked_states_diverge() {
    let h = harness();
    let parent = h.engine.create_state();
    visit(&h, &parent, "before");

    let child = h
        .engine
        .fork_state(&parent, Expr::symbol("c", 1))
        .expect("fork allowed");
    visit(&h, &parent, "parent-only");
    visit(&h, &child, "child-only");
    visit(&h, &child, "child-again");

    assert_eq!(visits(&h, &parent), (2, vec!["before".into(), "parent-only".into()]));
    assert_eq!(
        visits(&h, &child),
        (3, vec!["before".into(), "child-only".into(), "child-again".into()])
    );
}

#[test]
fn lua_decision_vetoes_forks() {
    let h = harness();
    let state = h.engine.create_state();
    for tag in ["a", "b", "c"] {
        visit(&h, &state, tag);
    }
    assert!(h.engine.fork_state(&state, Expr::symbol("c", 1)).is_none());
}

#[test]
fn fork_event_reports_both_states() {
    let h = harness();
    let parent = h.engine.create_state();
    let child = h.engine.fork_state(&parent, Expr::symbol("flag", 8)).unwrap();
    let (origin, count, child_id, negated): (u64, i64, u64, String) = h.eval(
        "local f = probe.plugins.get_plugin('Counter').last_fork
         return f.origin, f.count, f.child, f.negated",
    );
    assert_eq!(origin, parent.id());
    assert_eq!(count, 2);
    assert_eq!(child_id, child.id());
    assert_eq!(negated, "(w8 (Not (w8 flag)))");
}

#[test]
fn disabled_forking_skips_the_decision() {
    let h = harness();
    let state = h.engine.create_state();
    state.set_forking_enabled(false);
    assert!(h.engine.fork_state(&state, Expr::symbol("c", 1)).is_none());
    assert!(!state.has_plugin_state("Counter"));
}
