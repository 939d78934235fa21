//! Component type registration and metadata.
//!
//! Every component type used in a world is assigned a dense [`ComponentId`]
//! on first reference. The id doubles as the component's bit position inside
//! an [`Archetype`](crate::archetype::Archetype) bitfield and as the column
//! key inside a [`Table`](crate::table::Table). Ids are never reclaimed.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use crate::archetype::MAX_COMPONENTS;
use crate::entity::Entity;

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Marker for types that can be stored as components.
///
/// Blanket-implemented for every `Send + Sync + 'static` type; no derive is
/// required.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
///
/// The numeric value is the component's bit position in an archetype
/// bitfield. Id 0 is reserved for [`Entity`] itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    /// The reserved id of the [`Entity`] component (bit 0 of every archetype).
    pub const ENTITY: ComponentId = ComponentId(0);

    /// The id as a column/bit index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type, including the type-erased
/// drop hook used by column storage.
#[derive(Clone)]
pub struct ComponentInfo {
    /// Dense id assigned at registration time.
    pub id: ComponentId,
    /// `std::any::type_name` of the component type, kept for diagnostics.
    pub type_name: &'static str,
    /// `size_of::<T>()`. Zero for tag components.
    pub size: usize,
    /// `align_of::<T>()`.
    pub align: usize,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
    /// Drops one value in place. `None` when the type has no drop glue.
    pub(crate) drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ComponentInfo {
    // The drop hook is the one piece of type erasure living outside the
    // storage modules.
    #[allow(unsafe_code)]
    fn new<T: Component>(id: ComponentId) -> Self {
        unsafe fn drop_in_place<T>(ptr: *mut u8) {
            std::ptr::drop_in_place(ptr as *mut T);
        }
        Self {
            id,
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: TypeId::of::<T>(),
            drop_fn: std::mem::needs_drop::<T>().then_some(drop_in_place::<T> as unsafe fn(*mut u8)),
        }
    }

    /// Whether values of this type occupy no storage.
    #[inline]
    pub fn is_zero_sized(&self) -> bool {
        self.size == 0
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types to [`ComponentId`]s and their metadata.
///
/// Constructed with [`Entity`] pre-registered at id 0; all other types get
/// the next free id on first reference. A type registered twice keeps its
/// original id.
#[derive(Debug)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentId>,
    /// Indexed by `ComponentId.0`.
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    /// Create a registry with the [`Entity`] component at id 0.
    pub fn new() -> Self {
        let mut registry = Self {
            by_type: HashMap::new(),
            infos: Vec::new(),
        };
        let entity = registry.register::<Entity>();
        debug_assert_eq!(entity, ComponentId::ENTITY);
        registry
    }

    /// Register a component type, returning its id. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics when the number of distinct component types would exceed the
    /// archetype bitfield width ([`MAX_COMPONENTS`]).
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }
        if self.infos.len() >= MAX_COMPONENTS {
            panic!(
                "cannot register component '{}': the {MAX_COMPONENTS}-component limit is reached",
                std::any::type_name::<T>()
            );
        }
        let id = ComponentId(self.infos.len() as u32);
        self.infos.push(ComponentInfo::new::<T>(id));
        self.by_type.insert(type_id, id);
        id
    }

    /// Look up a component type's id without registering it.
    pub fn lookup<T: Component>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for a registered id. `None` for ids this registry never
    /// issued (the decoder's sparse-registry case).
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Number of registered component types (including [`Entity`]).
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Always false: [`Entity`] is registered at construction.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
