//! The core event table.
//!
//! Every event the engine raises is listed once, in [`with_core_events`].
//! The same table generates the native [`CoreEvents`] struct here and the
//! Lua signal objects in `bridge::signal`, so the two can never disagree on
//! an event's argument list.

use super::expr::ExprRef;
use super::signal::{Decision, EventResult, Signal};
use super::state::{ExecutionSignal, SpecialInstruction, StateRef, SymbolicAddressReason, TbRef};
use serde::Serialize;
use std::sync::Arc;

/// Invoke `$callback!` with the full core event table.
///
/// Each entry reads `name(ArgType, ...) -> ResultType;`. Type names are
/// resolved where the callback expands, so callers import the engine types
/// used here.
macro_rules! with_core_events {
    ($callback:ident) => {
        $callback! {
            /// The engine is shutting down.
            engine_shutdown() -> ();
            /// A block is about to be translated.
            translate_block_start(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64
            ) -> ();
            /// The last instruction of a block was translated: signal, state, block, pc, static target, target pc.
            translate_block_end(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64,
                bool,
                u64
            ) -> ();
            /// A block finished translating; the pc is its last instruction.
            translate_block_complete(StateRef, TbRef, u64) -> ();
            translate_instruction_start(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64
            ) -> ();
            translate_instruction_end(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64
            ) -> ();
            translate_special_instruction_end(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64,
                SpecialInstruction
            ) -> ();
            /// Registers read and written by an instruction, as bit masks.
            translate_register_access_end(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64,
                u64,
                u64,
                bool
            ) -> ();
            translate_jump_start(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64,
                i32
            ) -> ();
            /// Indirect control transfer: signal, state, block, pc, rm, op size, offset.
            translate_icti_start(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64,
                i32,
                i32,
                i64
            ) -> ();
            translate_lea_rip_relative(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64,
                u64
            ) -> ();
            translate_soft_interrupt_start(
                Arc<ExecutionSignal>,
                StateRef,
                TbRef,
                u64,
                u32
            ) -> ();
            /// Exception vector and pc.
            exception(StateRef, u32, u64) -> ();
            custom_instruction(StateRef, u64) -> ();
            /// Address, value, is-write.
            before_symbolic_data_memory_access(
                StateRef,
                ExprRef,
                ExprRef,
                bool
            ) -> ();
            /// Address, host address, value, access flags.
            after_symbolic_data_memory_access(
                StateRef,
                ExprRef,
                ExprRef,
                ExprRef,
                u32
            ) -> ();
            /// Symbolic address, its concrete value and why it matters.
            /// Slots answer whether to concretize.
            symbolic_address(
                StateRef,
                ExprRef,
                u64,
                SymbolicAddressReason
            ) -> Decision;
            /// Virtual address, value, size in bytes, access flags.
            concrete_data_memory_access(StateRef, u64, u64, u8, u32) -> ();
            port_access(
                StateRef,
                ExprRef,
                ExprRef,
                bool
            ) -> ();
            symbolic_variable_creation(
                StateRef,
                String,
                Vec<ExprRef>
            ) -> ();
            timer() -> ();
            /// Original state, resulting states and the condition of each.
            state_fork(
                StateRef,
                Vec<StateRef>,
                Vec<ExprRef>
            ) -> ();
            /// Destination, source.
            state_merge(StateRef, StateRef) -> ();
            /// Current, next.
            state_switch(StateRef, StateRef) -> ();
            state_kill(StateRef) -> ();
            /// Slots answer whether the engine process may fork.
            process_fork_decide() -> Decision;
            /// Slots answer whether the state may fork.
            state_fork_decide(StateRef) -> Decision;
            /// Before fork, is child, parent process index.
            process_fork(bool, bool, u32) -> ();
            process_fork_complete(bool) -> ();
            tlb_miss(StateRef, u64, bool) -> ();
            page_fault(StateRef, u64, bool) -> ();
            /// Previous and current privilege level.
            privilege_change(StateRef, u32, u32) -> ();
            /// Previous and current page directory.
            page_directory_change(StateRef, u64, u64) -> ();
            initialization_complete(StateRef) -> ();
            /// Current state, added states, removed states.
            update_states(
                StateRef,
                Vec<StateRef>,
                Vec<StateRef>
            ) -> ();
            /// Pc and is-call. Slots answer whether to instrument the site.
            call_return_translate(StateRef, u64, bool) -> Decision;
        }
    };
}

pub(crate) use with_core_events;

/// Static description of one core event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventInfo {
    pub name: &'static str,
    pub args: &'static str,
    pub decision: bool,
}

macro_rules! define_core_events {
    ($( $(#[$meta:meta])* $name:ident ( $($arg:ty),* ) -> $ret:ty ; )*) => {
        /// One signal per core event.
        pub struct CoreEvents {
            $( $(#[$meta])* pub $name: Arc<Signal<($($arg,)*), $ret>>, )*
        }

        impl Default for CoreEvents {
            fn default() -> Self {
                Self { $( $name: Arc::new(Signal::new()), )* }
            }
        }

        impl CoreEvents {
            /// Total connected slots across every event.
            pub fn slot_count(&self) -> usize {
                0 $( + self.$name.slot_count() )*
            }
        }

        /// The core event table, in declaration order.
        pub const CORE_EVENTS: &[EventInfo] = &[
            $(
                EventInfo {
                    name: stringify!($name),
                    args: stringify!($($arg),*),
                    decision: <$ret as EventResult>::IS_DECISION,
                },
            )*
        ];
    };
}

with_core_events!(define_core_events);

impl CoreEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for CoreEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreEvents")
            .field("slots", &self.slot_count())
            .finish_non_exhaustive()
    }
}

pub fn event_info(name: &str) -> Option<&'static EventInfo> {
    CORE_EVENTS.iter().find(|e| e.name == name)
}
