//! Handles and pool entries for the history manager.
//!
//! Actors and environments are referred to by generation-counted handles.
//! Releasing a handle bumps its slot's generation, so entries still holding
//! the old handle are recognised as stale at the next cull.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::history::layer::UndoLayer;

/// A slot index plus the generation it was issued under.
pub trait Handle: Copy + Eq {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(self) -> u32;
    fn generation(self) -> u32;
}

/// Participant on whose behalf edits run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId {
    index: u32,
    generation: u32,
}

impl Handle for ActorId {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn index(self) -> u32 {
        self.index
    }

    fn generation(self) -> u32 {
        self.generation
    }
}

/// A live environment instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentId {
    index: u32,
    generation: u32,
}

impl Handle for EnvironmentId {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn index(self) -> u32 {
        self.index
    }

    fn generation(self) -> u32 {
        self.generation
    }
}

/// Issues and retires handles of one kind.
#[derive(Debug)]
pub struct HandleRegistry<H> {
    generations: Vec<u32>,
    live: Vec<bool>,
    free: Vec<u32>,
    _marker: PhantomData<H>,
}

impl<H: Handle> Default for HandleRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handle> HandleRegistry<H> {
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            live: Vec::new(),
            free: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn allocate(&mut self) -> H {
        if let Some(index) = self.free.pop() {
            self.live[index as usize] = true;
            return H::from_parts(index, self.generations[index as usize]);
        }
        let index = self.generations.len() as u32;
        self.generations.push(0);
        self.live.push(true);
        H::from_parts(index, 0)
    }

    /// Retire `handle`. Returns false if it was already stale.
    pub fn release(&mut self, handle: H) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        let slot = handle.index() as usize;
        self.live[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push(handle.index());
        true
    }

    pub fn is_live(&self, handle: H) -> bool {
        let slot = handle.index() as usize;
        self.live.get(slot).copied().unwrap_or(false) && self.generations[slot] == handle.generation()
    }

    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|l| **l).count()
    }
}

/// Identifier letting a retried request find the entry it already filed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generated ids start here, leaving the lower half to callers.
    pub const GENERATED_BASE: u64 = 1 << 63;
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{:x}", self.0)
    }
}

/// One undoable edit filed in a pool.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    /// Creation order shared by both pools
    pub stamp: u64,
    pub environment: EnvironmentId,
    pub actor: ActorId,
    pub layer: UndoLayer,
    pub transaction: TransactionId,
    /// Set while a reversal of this entry is in flight
    pub undo_commenced: bool,
}

impl PoolEntry {
    pub fn new(
        environment: EnvironmentId,
        actor: ActorId,
        layer: UndoLayer,
        transaction: TransactionId,
    ) -> Self {
        Self {
            stamp: layer.stamp(),
            environment,
            actor,
            layer,
            transaction,
            undo_commenced: false,
        }
    }

    pub fn belongs_to(&self, actor: ActorId, environment: EnvironmentId) -> bool {
        self.actor == actor && self.environment == environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_handles_go_stale() {
        let mut registry: HandleRegistry<ActorId> = HandleRegistry::new();
        let a = registry.allocate();
        let b = registry.allocate();
        assert!(registry.is_live(a));
        assert!(registry.release(a));
        assert!(!registry.release(a));
        assert!(!registry.is_live(a));

        // The slot is reused under a new generation
        let c = registry.allocate();
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert!(registry.is_live(c));
        assert!(!registry.is_live(a));
        assert!(registry.is_live(b));
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn test_unknown_handle_is_not_live() {
        let registry: HandleRegistry<EnvironmentId> = HandleRegistry::default();
        assert!(!registry.is_live(EnvironmentId::from_parts(3, 0)));
    }

    #[test]
    fn test_transaction_display() {
        assert_eq!(TransactionId(255).to_string(), "tx-ff");
    }
}
