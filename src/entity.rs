//! Entity handles, locations, and allocation.
//!
//! An [`Entity`] is a copyable handle made of a `u32` index and a `u32`
//! generation (always ≥ 1). Recycled indices bump the generation, so a handle
//! value is never issued twice within one world. Where an entity's data lives
//! is tracked separately as an [`EntityLocation`]; a `table_id` of 0 (the
//! sentinel table) means the entity is not resident: freshly spawned and not
//! yet flushed, or despawned.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::storage::TableId;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A handle to an entity.
///
/// Serializes as the two-field record `{index, generation}` used by debug
/// and test tooling; this format is not on any hot path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: NonZeroU32,
}

impl Entity {
    /// Reserved handle used where a real entity is not yet known.
    pub const PLACEHOLDER: Entity = Entity {
        index: u32::MAX,
        generation: NonZeroU32::MIN,
    };

    pub(crate) fn new(index: u32, generation: NonZeroU32) -> Entity {
        Entity { index, generation }
    }

    /// The handle's slot index.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// The handle's generation (≥ 1).
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation.get()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where an entity's row lives: which table and which row within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// Owning table. [`TableId::SENTINEL`] means not resident.
    pub table_id: TableId,
    /// Row index within the table. Unstable across flushes (swap-remove).
    pub row: u32,
}

impl EntityLocation {
    /// The location of an entity that occupies no table row.
    pub const NOT_RESIDENT: EntityLocation = EntityLocation {
        table_id: TableId::SENTINEL,
        row: 0,
    };

    /// Whether this location points at a real table row.
    #[inline]
    pub fn is_resident(self) -> bool {
        self.table_id != TableId::SENTINEL
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Hands out [`Entity`] handles.
///
/// Released indices go on a FIFO free list and come back with a bumped
/// generation, so no handle value ever repeats. Generations start at 1.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    /// Current generation per index slot.
    generations: Vec<NonZeroU32>,
    free: VecDeque<u32>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh handle.
    pub fn allocate(&mut self) -> Entity {
        if let Some(index) = self.free.pop_front() {
            // Generation was bumped when the slot was released.
            Entity::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(NonZeroU32::MIN);
            Entity::new(index, NonZeroU32::MIN)
        }
    }

    /// Release a handle, making outstanding copies stale. Returns `false` if
    /// the handle was already stale.
    pub fn release(&mut self, entity: Entity) -> bool {
        if !self.contains(entity) {
            return false;
        }
        let slot = &mut self.generations[entity.index() as usize];
        *slot = NonZeroU32::new(slot.get().wrapping_add(1)).unwrap_or(NonZeroU32::MIN);
        self.free.push_back(entity.index());
        true
    }

    /// Whether `entity` is the current handle for its slot.
    pub fn contains(&self, entity: Entity) -> bool {
        self.generations
            .get(entity.index() as usize)
            .is_some_and(|generation| *generation == entity.generation)
    }

    /// Number of index slots ever allocated.
    pub fn slot_count(&self) -> usize {
        self.generations.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
