//! Tessella -- an archetype-based Entity Component System with staged
//! structural changes.
//!
//! Entities live in column-major [`Table`](table::Table)s, one per
//! *archetype* (the exact set of component types an entity holds, encoded as
//! a bitfield over dense component ids). Structural mutation -- spawn,
//! despawn, insert, remove -- is *staged*: each call records a per-entity
//! destination archetype and payload, and a single
//! [`flush`](world::World::flush) applies every staged change in bulk,
//! moving rows between tables with swap-remove. Queries match tables by
//! archetype and iterate rows with minimal overhead.
//!
//! # Quick Start
//!
//! ```
//! use tessella::prelude::*;
//!
//! #[derive(Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! let entity = world
//!     .spawn()
//!     .insert(Position { x: 0.0, y: 0.0 })
//!     .insert(Velocity { dx: 1.0, dy: 2.0 })
//!     .id();
//! world.flush();
//!
//! let mut movement = world.query::<(&mut Position, &Velocity)>();
//! for (position, velocity) in movement.iter_mut(&mut world) {
//!     position.x += velocity.dx;
//!     position.y += velocity.dy;
//! }
//!
//! assert_eq!(world.get::<Position>(entity), Some(&Position { x: 1.0, y: 2.0 }));
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod component;
pub mod entities;
pub mod entity;
pub mod event;
pub mod filter;
#[allow(unsafe_code)]
pub mod query;
pub mod resource;
pub mod schedule;
pub mod storage;
#[allow(unsafe_code)]
pub mod table;
#[allow(unsafe_code)]
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity is despawned (or a despawn is staged), or the handle was
    /// never issued.
    #[error("entity {entity} is despawned or was never spawned")]
    StaleEntity { entity: entity::Entity },

    /// A system with this name is already registered in the schedule.
    #[error("system '{name}' is already registered in this schedule")]
    DuplicateSystem { name: String },

    /// No system with this name is registered in the schedule.
    #[error("no system named '{name}' is registered in this schedule")]
    UnknownSystem { name: String },

    /// No schedule is registered under this label.
    #[error("no schedule registered under label '{label}'")]
    UnknownSchedule { label: schedule::ScheduleLabel },

    /// A failure reported by user code (systems, plugins).
    #[error("{0}")]
    Message(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::Archetype;
    pub use crate::component::{Component, ComponentId};
    pub use crate::entities::FlushReport;
    pub use crate::entity::{Entity, EntityLocation};
    pub use crate::event::{handler, EventBus, Handler};
    pub use crate::filter::{FilterPair, Or, QueryFilter, With, Without};
    pub use crate::query::{QueryData, QueryState};
    pub use crate::resource::{FromWorld, Resource};
    pub use crate::schedule::{system, FunctionSystem, Schedule, ScheduleLabel, System};
    pub use crate::storage::{TableId, TableRegistry};
    pub use crate::table::Table;
    pub use crate::world::{
        EntityUpdateTiming, EntityWorldMut, TableCreated, World, WorldConfig,
    };
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
