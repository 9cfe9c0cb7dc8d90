//! Reference model of the analysis engine.
//!
//! The bridge only needs the engine's event table, execution states and
//! translation blocks. This module carries just enough of each to drive the
//! bridge end to end: it translates and "executes" blocks by firing the
//! signals plugins attached during translation, and forks states after
//! consulting `state_fork_decide`.

pub mod events;
pub mod expr;
pub mod memory;
pub mod plugin;
pub mod signal;
pub mod state;

pub use events::{CORE_EVENTS, CoreEvents, EventInfo};
pub use expr::{Expr, ExprRef};
pub use memory::{AddressType, Memory, PAGE_SIZE};
pub use plugin::{CorePlugin, LogLevel, Plugin, PluginInfo};
pub use signal::{Connection, Decision, EventResult, Signal};
pub use state::{
    ExecutionSignal, ExecutionState, PluginState, Registers, SpecialInstruction, StateRef,
    SymbolicAddressReason, TbRef, TranslationBlock,
};

use crate::config::{ConfigFile, OUTPUT_DIRECTORY_KEY};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_OUTPUT_DIRECTORY: &str = "probe-out";

#[derive(Debug)]
pub struct Engine {
    config: Arc<ConfigFile>,
    events: Arc<CoreEvents>,
    output_directory: PathBuf,
    next_state_id: AtomicU64,
}

impl Engine {
    pub fn new(config: Arc<ConfigFile>) -> Self {
        let output_directory = config
            .get_string(OUTPUT_DIRECTORY_KEY)
            .map_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIRECTORY), PathBuf::from);
        Self {
            config,
            events: Arc::new(CoreEvents::new()),
            output_directory,
            next_state_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Arc<ConfigFile> {
        &self.config
    }

    pub fn events(&self) -> &Arc<CoreEvents> {
        &self.events
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.output_directory.join(name)
    }

    fn allocate_state_id(&self) -> u64 {
        self.next_state_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a fresh state and announce it through `initialization_complete`.
    pub fn create_state(&self) -> StateRef {
        let state = Arc::new(ExecutionState::new(self.allocate_state_id()));
        self.events
            .initialization_complete
            .emit((Arc::clone(&state),));
        state
    }

    /// Fork `state` on `condition`.
    ///
    /// Returns the new state, or `None` when forking is disabled for the
    /// state or any `state_fork_decide` slot said no. The original state
    /// continues under the negated condition.
    pub fn fork_state(&self, state: &StateRef, condition: ExprRef) -> Option<StateRef> {
        if !state.forking_enabled() {
            tracing::debug!(state_id = state.id(), "forking disabled for state");
            return None;
        }

        let answers = self.events.state_fork_decide.emit((Arc::clone(state),));
        if !Decision::unanimous(&answers) {
            tracing::debug!(state_id = state.id(), "fork vetoed by a plugin");
            return None;
        }

        let child = Arc::new(state.fork(self.allocate_state_id()));
        tracing::debug!(state_id = state.id(), child_id = child.id(), "state forked");

        let negated = Expr::symbol(format!("(Not {condition})"), condition.width());
        self.events.state_fork.emit((
            Arc::clone(state),
            vec![Arc::clone(state), Arc::clone(&child)],
            vec![negated, condition],
        ));
        Some(child)
    }

    /// Translate `tb`, giving plugins the chance to instrument each
    /// instruction through the execution signals passed with the
    /// translation events.
    pub fn translate_block(&self, state: &StateRef, tb: &TbRef) {
        let block_signal = Arc::new(ExecutionSignal::new());
        self.events.translate_block_start.emit((
            Arc::clone(&block_signal),
            Arc::clone(state),
            Arc::clone(tb),
            tb.pc(),
        ));
        tb.instrument(tb.pc(), block_signal);

        for &pc in tb.instruction_pcs() {
            let signal = Arc::new(ExecutionSignal::new());
            self.events.translate_instruction_start.emit((
                Arc::clone(&signal),
                Arc::clone(state),
                Arc::clone(tb),
                pc,
            ));
            tb.instrument(pc, signal);
        }

        let end_signal = Arc::new(ExecutionSignal::new());
        self.events.translate_block_end.emit((
            Arc::clone(&end_signal),
            Arc::clone(state),
            Arc::clone(tb),
            tb.last_pc(),
            false,
            0,
        ));
        tb.instrument(tb.last_pc(), end_signal);

        self.events
            .translate_block_complete
            .emit((Arc::clone(state), Arc::clone(tb), tb.last_pc()));
    }

    /// Run `tb` on `state`: fire, in order, every signal attached during
    /// translation.
    pub fn execute_block(&self, state: &StateRef, tb: &TbRef) {
        for (pc, signal) in tb.instrumentation() {
            state.set_pc(pc);
            signal.emit((Arc::clone(state), pc));
        }
    }

    pub fn kill_state(&self, state: &StateRef) {
        state.set_zombie(true);
        self.events.state_kill.emit((Arc::clone(state),));
    }

    pub fn shutdown(&self) {
        self.events.engine_shutdown.emit(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn engine() -> Engine {
        Engine::new(Arc::new(ConfigFile::empty()))
    }

    #[test]
    fn output_directory_defaults_and_overrides() {
        assert_eq!(engine().output_directory(), Path::new(DEFAULT_OUTPUT_DIRECTORY));
        let cfg = ConfigFile::parse("[engine]\noutput_directory = \"/tmp/run1\"\n").unwrap();
        let engine = Engine::new(Arc::new(cfg));
        assert_eq!(engine.output_file("trace.log"), PathBuf::from("/tmp/run1/trace.log"));
    }

    #[test]
    fn state_ids_are_unique() {
        let engine = engine();
        let a = engine.create_state();
        let b = engine.create_state();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn fork_respects_veto() {
        let engine = engine();
        let state = engine.create_state();
        let _veto = engine.events().state_fork_decide.connect(|_| Decision::NO);
        assert!(engine.fork_state(&state, Expr::symbol("c", 1)).is_none());
    }

    #[test]
    fn fork_respects_disabled_forking() {
        let engine = engine();
        let state = engine.create_state();
        state.set_forking_enabled(false);
        assert!(engine.fork_state(&state, Expr::symbol("c", 1)).is_none());
    }

    #[test]
    fn fork_announces_both_states() {
        let engine = engine();
        let state = engine.create_state();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _conn = engine.events().state_fork.connect(move |(_, states, conds)| {
            s.lock().push((states.iter().map(|st| st.id()).collect::<Vec<_>>(), conds.len()));
        });

        let child = engine.fork_state(&state, Expr::symbol("c", 1)).unwrap();
        assert_eq!(*seen.lock(), vec![(vec![state.id(), child.id()], 2)]);
    }

    #[test]
    fn translated_instrumentation_fires_on_execution() {
        let engine = engine();
        let state = engine.create_state();
        let tb = Arc::new(TranslationBlock::new(0x1000, &[4, 4], 0));
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = Arc::clone(&hits);
        let _conn = engine.events().translate_instruction_start.connect(
            move |(signal, _state, _tb, pc)| {
                if pc == 0x1004 {
                    let h = Arc::clone(&h);
                    drop(signal.connect(move |(_, pc)| h.lock().push(pc)));
                }
            },
        );

        engine.translate_block(&state, &tb);
        assert!(hits.lock().is_empty());
        engine.execute_block(&state, &tb);
        engine.execute_block(&state, &tb);
        assert_eq!(*hits.lock(), vec![0x1004, 0x1004]);
        assert_eq!(state.pc(), tb.last_pc());
    }
}
