//! Multicast event dispatch.
//!
//! A [`Signal`] holds any number of slots and calls each of them, in
//! connection order, when the engine emits it. Slots are removed lazily:
//! [`Connection::disconnect`] only clears a shared flag, and dispatch checks
//! that flag immediately before every call. That makes disconnection from
//! inside a running slot safe, including a slot disconnecting itself or a
//! sibling that has not run yet.
//!
//! Emission works on a snapshot of the slot list taken before the first slot
//! runs. A slot connected while an emission is in flight therefore first runs
//! on the next emission.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type SlotFn<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

struct Slot<A, R> {
    active: Arc<AtomicBool>,
    callback: SlotFn<A, R>,
}

impl<A, R> Clone for Slot<A, R> {
    fn clone(&self) -> Self {
        Self {
            active: Arc::clone(&self.active),
            callback: Arc::clone(&self.callback),
        }
    }
}

/// A typed event-dispatch object with argument tuple `A` and per-slot result `R`.
pub struct Signal<A, R = ()> {
    slots: RwLock<Vec<Slot<A, R>>>,
}

impl<A, R> Default for Signal<A, R> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }
}

impl<A, R> fmt::Debug for Signal<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slot_count())
            .finish()
    }
}

impl<A, R> Signal<A, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a slot. The returned handle is the only way to detach it.
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let mut slots = self.slots.write();
        slots.retain(|s| s.active.load(Ordering::Acquire));
        slots.push(Slot {
            active: Arc::clone(&active),
            callback: Arc::new(slot),
        });
        Connection { active }
    }

    /// Number of connected slots.
    pub fn slot_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|s| s.active.load(Ordering::Acquire))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_count() == 0
    }
}

impl<A: Clone, R> Signal<A, R> {
    /// Call every connected slot with a clone of `args` and collect the results.
    pub fn emit(&self, args: A) -> Vec<R> {
        let snapshot: Vec<Slot<A, R>> = self.slots.read().clone();
        let mut results = Vec::with_capacity(snapshot.len());
        for slot in snapshot {
            if slot.active.load(Ordering::Acquire) {
                results.push((slot.callback)(args.clone()));
            }
        }
        results
    }
}

/// Handle for one connected slot.
///
/// Dropping the handle leaves the slot connected.
#[derive(Debug)]
pub struct Connection {
    active: Arc<AtomicBool>,
}

impl Connection {
    /// Detach the slot. Calling this more than once is harmless.
    pub fn disconnect(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Per-slot result of an event.
pub trait EventResult: Default {
    /// Whether slots answer a yes/no question for the engine.
    const IS_DECISION: bool = false;
}

impl EventResult for () {}

/// Answer of a decision slot, e.g. whether a state may fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision(pub bool);

impl Decision {
    pub const YES: Self = Self(true);
    pub const NO: Self = Self(false);

    pub fn is_yes(self) -> bool {
        self.0
    }

    /// True when no slot answered `NO`. An event nobody listens to is
    /// unanimous.
    pub fn unanimous(answers: &[Self]) -> bool {
        answers.iter().all(|d| d.0)
    }
}

impl From<bool> for Decision {
    fn from(value: bool) -> Self {
        Self(value)
    }
}

impl EventResult for Decision {
    const IS_DECISION: bool = true;
}
