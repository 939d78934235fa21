//! Archetype identity: a bitfield over component ids.
//!
//! An archetype is the exact set of component types held by an entity. Bit
//! `i` is set iff the component with id `i` is present; bit 0 (the
//! [`Entity`](crate::entity::Entity) component) is set in every live
//! archetype. The reserved value [`Archetype::EMPTY`] identifies despawned
//! entities and the sentinel table.

use std::fmt;

use crate::component::{ComponentId, ComponentRegistry};

/// Widest component id an archetype bitfield can represent.
pub const MAX_COMPONENTS: usize = 128;

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// A set of component types encoded as a 128-bit bitfield.
///
/// Equality of archetypes is equality of component sets. Every encoded
/// archetype is non-zero (bit 0 is always set); `EMPTY` is reserved.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Archetype(u128);

impl Archetype {
    /// The despawned/sentinel archetype. Never produced by [`Archetype::of`].
    pub const EMPTY: Archetype = Archetype(0);

    /// The archetype of an entity with no components beyond its handle.
    pub const ENTITY: Archetype = Archetype(1);

    /// Encode a set of component ids. Bit 0 is always set, so the result is
    /// never `EMPTY`.
    pub fn of(ids: impl IntoIterator<Item = ComponentId>) -> Archetype {
        ids.into_iter()
            .fold(Archetype::ENTITY, |archetype, id| archetype.with(id))
    }

    /// This archetype with the bit for `id` set.
    #[inline]
    #[must_use]
    pub fn with(self, id: ComponentId) -> Archetype {
        Archetype(self.0 | 1u128 << id.index())
    }

    /// This archetype with the bit for `id` cleared.
    ///
    /// Clearing [`ComponentId::ENTITY`] is not meaningful; despawning uses
    /// the explicit `EMPTY` value instead.
    #[inline]
    #[must_use]
    pub fn without(self, id: ComponentId) -> Archetype {
        debug_assert_ne!(id, ComponentId::ENTITY, "the Entity component cannot be removed");
        Archetype(self.0 & !(1u128 << id.index()))
    }

    /// Whether the bit for `id` is set.
    #[inline]
    pub fn contains(self, id: ComponentId) -> bool {
        self.0 & 1u128 << id.index() != 0
    }

    /// Whether every bit of `other` is set in `self`.
    #[inline]
    pub fn is_superset_of(self, other: Archetype) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether `self` and `other` share any bit.
    #[inline]
    pub fn intersects(self, other: Archetype) -> bool {
        self.0 & other.0 != 0
    }

    /// Union of the two component sets.
    #[inline]
    #[must_use]
    pub fn union(self, other: Archetype) -> Archetype {
        Archetype(self.0 | other.0)
    }

    /// Whether this is the reserved despawned archetype.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The raw bitfield.
    #[inline]
    pub fn bits(self) -> u128 {
        self.0
    }

    /// Iterate the set component ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ComponentId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let index = bits.trailing_zeros();
            bits &= bits - 1;
            Some(ComponentId(index))
        })
    }

    /// Decode to the ordered component list known to `registry`.
    ///
    /// Bits at positions the registry has never issued are skipped, so a
    /// stale bitfield decodes against a sparse registry without error.
    pub fn decode(self, registry: &ComponentRegistry) -> Vec<ComponentId> {
        self.iter()
            .filter(|id| registry.info(*id).is_some())
            .collect()
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Archetype({:#x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
