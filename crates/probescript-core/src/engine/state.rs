//! Execution states and translation blocks.

use super::memory::Memory;
use super::signal::Signal;
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Plugin-owned auxiliary data attached to one execution state.
///
/// When a state forks, every attached value is asked for an independent
/// copy, so parent and child never share mutable plugin data.
pub trait PluginState: Send + Sync + 'static {
    fn clone_state(&self) -> Arc<dyn PluginState>;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub pc: u64,
    pub sp: u64,
    pub bp: u64,
    pub flags: u64,
    /// Root of the guest page tables.
    pub page_dir: u64,
}

/// One path through the program under analysis.
pub struct ExecutionState {
    id: u64,
    registers: Mutex<Registers>,
    memory: Mutex<Memory>,
    forking_enabled: AtomicBool,
    pinned: AtomicBool,
    zombie: AtomicBool,
    plugin_states: Mutex<HashMap<String, Arc<dyn PluginState>>>,
}

pub type StateRef = Arc<ExecutionState>;

impl std::fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionState")
            .field("id", &self.id)
            .field("registers", &*self.registers.lock())
            .field("forking_enabled", &self.forking_enabled())
            .field("pinned", &self.is_pinned())
            .field("zombie", &self.is_zombie())
            .finish_non_exhaustive()
    }
}

impl ExecutionState {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            registers: Mutex::new(Registers::default()),
            memory: Mutex::new(Memory::new()),
            forking_enabled: AtomicBool::new(true),
            pinned: AtomicBool::new(false),
            zombie: AtomicBool::new(false),
            plugin_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registers(&self) -> Registers {
        *self.registers.lock()
    }

    pub fn pc(&self) -> u64 {
        self.registers.lock().pc
    }

    pub fn set_pc(&self, pc: u64) {
        self.registers.lock().pc = pc;
    }

    pub fn sp(&self) -> u64 {
        self.registers.lock().sp
    }

    pub fn set_sp(&self, sp: u64) {
        self.registers.lock().sp = sp;
    }

    pub fn bp(&self) -> u64 {
        self.registers.lock().bp
    }

    pub fn set_bp(&self, bp: u64) {
        self.registers.lock().bp = bp;
    }

    /// Update every register at once.
    pub fn update_registers(&self, update: impl FnOnce(&mut Registers)) {
        update(&mut self.registers.lock());
    }

    /// The state's guest memory. Do not hold the guard across a signal
    /// emission.
    pub fn memory(&self) -> MutexGuard<'_, Memory> {
        self.memory.lock()
    }

    pub fn forking_enabled(&self) -> bool {
        self.forking_enabled.load(Ordering::Relaxed)
    }

    pub fn set_forking_enabled(&self, enabled: bool) {
        self.forking_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Relaxed)
    }

    pub fn set_pinned(&self, pinned: bool) {
        self.pinned.store(pinned, Ordering::Relaxed);
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::Relaxed)
    }

    pub fn set_zombie(&self, zombie: bool) {
        self.zombie.store(zombie, Ordering::Relaxed);
    }

    /// Plugin state for `plugin`, created with `factory` on first access.
    ///
    /// The factory runs without the state's lock held, so it may call back
    /// into this state.
    pub fn plugin_state<F>(&self, plugin: &str, factory: F) -> Arc<dyn PluginState>
    where
        F: FnOnce() -> Arc<dyn PluginState>,
    {
        if let Some(existing) = self.plugin_states.lock().get(plugin) {
            return Arc::clone(existing);
        }
        let created = factory();
        Arc::clone(
            self.plugin_states
                .lock()
                .entry(plugin.to_string())
                .or_insert(created),
        )
    }

    pub fn set_plugin_state(&self, plugin: &str, state: Arc<dyn PluginState>) {
        self.plugin_states.lock().insert(plugin.to_string(), state);
    }

    pub fn has_plugin_state(&self, plugin: &str) -> bool {
        self.plugin_states.lock().contains_key(plugin)
    }

    /// Duplicate this state under `new_id`, cloning every plugin state.
    pub fn fork(&self, new_id: u64) -> Self {
        let snapshot: Vec<(String, Arc<dyn PluginState>)> = self
            .plugin_states
            .lock()
            .iter()
            .map(|(name, state)| (name.clone(), Arc::clone(state)))
            .collect();
        let cloned = snapshot
            .into_iter()
            .map(|(name, state)| (name, state.clone_state()))
            .collect();

        Self {
            id: new_id,
            registers: Mutex::new(self.registers()),
            memory: Mutex::new(self.memory.lock().clone()),
            forking_enabled: AtomicBool::new(self.forking_enabled()),
            pinned: AtomicBool::new(false),
            zombie: AtomicBool::new(false),
            plugin_states: Mutex::new(cloned),
        }
    }
}

/// Signal attached to translated code, fired each time that code runs.
pub type ExecutionSignal = Signal<(StateRef, u64)>;

/// A block of translated guest code.
pub struct TranslationBlock {
    pc: u64,
    instructions: Vec<u64>,
    size: u64,
    flags: u64,
    instrumentation: Mutex<Vec<(u64, Arc<ExecutionSignal>)>>,
}

pub type TbRef = Arc<TranslationBlock>;

impl std::fmt::Debug for TranslationBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationBlock")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("size", &self.size)
            .field("icount", &self.icount())
            .finish_non_exhaustive()
    }
}

impl TranslationBlock {
    /// A block starting at `pc` made of instructions of the given sizes.
    pub fn new(pc: u64, instruction_sizes: &[u64], flags: u64) -> Self {
        let mut next = pc;
        let instructions = instruction_sizes
            .iter()
            .map(|size| {
                let at = next;
                next = next.wrapping_add(*size);
                at
            })
            .collect();
        Self {
            pc,
            instructions,
            size: next.wrapping_sub(pc),
            flags,
            instrumentation: Mutex::new(Vec::new()),
        }
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn icount(&self) -> usize {
        self.instructions.len()
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    pub fn instruction_pcs(&self) -> &[u64] {
        &self.instructions
    }

    pub fn last_pc(&self) -> u64 {
        self.instructions.last().copied().unwrap_or(self.pc)
    }

    /// Keep `signal` with the block so it fires when the code at `pc` runs.
    pub fn instrument(&self, pc: u64, signal: Arc<ExecutionSignal>) {
        self.instrumentation.lock().push((pc, signal));
    }

    pub fn instrumentation(&self) -> Vec<(u64, Arc<ExecutionSignal>)> {
        self.instrumentation.lock().clone()
    }
}

/// Instructions the translator reports through
/// `translate_special_instruction_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialInstruction {
    Rdtsc,
    Sysenter,
    Syscall,
    Pushim,
}

impl SpecialInstruction {
    pub const ALL: [Self; 4] = [Self::Rdtsc, Self::Sysenter, Self::Syscall, Self::Pushim];

    pub fn name(self) -> &'static str {
        match self {
            Self::Rdtsc => "RDTSC",
            Self::Sysenter => "SYSENTER",
            Self::Syscall => "SYSCALL",
            Self::Pushim => "PUSHIM",
        }
    }
}

/// Why the engine is asking whether to concretize a symbolic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolicAddressReason {
    Memory,
    Pc,
}

impl SymbolicAddressReason {
    pub const ALL: [Self; 2] = [Self::Memory, Self::Pc];

    pub fn name(self) -> &'static str {
        match self {
            Self::Memory => "MEMORY",
            Self::Pc => "PC",
        }
    }
}
