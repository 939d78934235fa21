//! The entity manager: staged structural changes applied in bulk.
//!
//! Spawning, despawning, and component insertion/removal never touch table
//! storage directly. Each call records a per-entity *destination archetype*
//! and, for inserts, a pending payload value; [`EntityManager::flush`]
//! resolves the destinations to tables and moves every staged row in one
//! pass. Reads (`has`, locations) always reflect the last flushed state.

use std::collections::{BTreeMap, HashMap};

use crate::archetype::Archetype;
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::entity::{Entity, EntityAllocator, EntityLocation};
use crate::storage::TableRegistry;
use crate::table::ErasedValue;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Bundle -- pending component payload for one entity
// ---------------------------------------------------------------------------

/// The staged component values of one entity, at most one per component id.
///
/// Staging the same component type twice before a flush replaces the earlier
/// value in place (dropping it).
#[derive(Default)]
pub(crate) struct Bundle {
    entries: Vec<(ComponentId, ErasedValue)>,
}

impl Bundle {
    fn put(&mut self, component: ComponentId, value: ErasedValue) {
        match self.entries.iter_mut().find(|(id, _)| *id == component) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((component, value)),
        }
    }

    fn take(self) -> Vec<(ComponentId, ErasedValue)> {
        self.entries
    }
}

// ---------------------------------------------------------------------------
// FlushReport
// ---------------------------------------------------------------------------

/// Summary of one [`EntityManager::flush`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entities moved into a table (spawns, inserts, removals, overwrites).
    pub moved: usize,
    /// Entities removed from their table and released.
    pub despawned: usize,
    /// Tables created while resolving destinations.
    pub tables_created: usize,
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// Owns entity handles, their locations, and all staged structural changes.
#[derive(Default)]
pub struct EntityManager {
    allocator: EntityAllocator,
    /// Indexed by entity index. Slots of released handles read NOT_RESIDENT.
    locations: Vec<EntityLocation>,
    /// Destination archetype per staged entity; absence means no pending
    /// change. `Archetype::EMPTY` stages a despawn. Ordered so flushes are
    /// deterministic.
    destinations: BTreeMap<Entity, Archetype>,
    /// Pending component payloads, written into the target table at flush.
    pending: HashMap<Entity, Bundle>,
}

impl EntityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle and stage it for residency in the entity-only
    /// archetype. The handle is not alive until the next flush.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        let index = entity.index() as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, EntityLocation::NOT_RESIDENT);
        }
        self.locations[index] = EntityLocation::NOT_RESIDENT;
        self.destinations.insert(entity, Archetype::ENTITY);
        entity
    }

    fn check_current(&self, entity: Entity) -> Result<(), EcsError> {
        if self.allocator.contains(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleEntity { entity })
        }
    }

    /// The archetype the entity occupies right now (EMPTY when not resident).
    fn flushed_archetype(&self, tables: &TableRegistry, entity: Entity) -> Archetype {
        match self.locations.get(entity.index() as usize) {
            Some(location) if location.is_resident() => tables
                .get(location.table_id)
                .expect("resident location must point at a live table")
                .archetype(),
            _ => Archetype::EMPTY,
        }
    }

    /// The destination slot for `entity`, seeded from its current archetype.
    ///
    /// Errors when the entity has a despawn staged; a dead handle cannot be
    /// restaged.
    fn destination_mut(
        &mut self,
        tables: &TableRegistry,
        entity: Entity,
    ) -> Result<&mut Archetype, EcsError> {
        self.check_current(entity)?;
        if !self.destinations.contains_key(&entity) {
            let archetype = self.flushed_archetype(tables, entity);
            debug_assert!(
                !archetype.is_empty(),
                "a current handle without a staged destination must be resident"
            );
            self.destinations.insert(entity, archetype);
        }
        let destination = self
            .destinations
            .get_mut(&entity)
            .expect("destination entry was just ensured");
        if destination.is_empty() {
            return Err(EcsError::StaleEntity { entity });
        }
        Ok(destination)
    }

    /// Stage `value` onto `entity`: OR the component's bit into the
    /// destination and record the payload (replacing any staged value of the
    /// same type).
    pub fn stage_insert<T: Component>(
        &mut self,
        components: &mut ComponentRegistry,
        tables: &TableRegistry,
        entity: Entity,
        value: T,
    ) -> Result<(), EcsError> {
        let component = components.register::<T>();
        let destination = self.destination_mut(tables, entity)?;
        *destination = destination.with(component);
        self.pending
            .entry(entity)
            .or_default()
            .put(component, ErasedValue::new(value));
        Ok(())
    }

    /// Stage a zero-sized tag component: destination bit only, no payload.
    ///
    /// # Panics
    ///
    /// Panics when `T` is not zero-sized; sized components must go through
    /// [`stage_insert`](Self::stage_insert) so the flush has a value to
    /// write.
    pub fn stage_insert_tag<T: Component>(
        &mut self,
        components: &mut ComponentRegistry,
        tables: &TableRegistry,
        entity: Entity,
    ) -> Result<(), EcsError> {
        assert!(
            std::mem::size_of::<T>() == 0,
            "insert_tag requires a zero-sized type; '{}' is {} bytes",
            std::any::type_name::<T>(),
            std::mem::size_of::<T>()
        );
        let component = components.register::<T>();
        let destination = self.destination_mut(tables, entity)?;
        *destination = destination.with(component);
        Ok(())
    }

    /// Stage removal of `T`: clear the component's bit from the destination.
    /// Any pending payload of that type stays staged and is filtered out at
    /// flush time by the target table's column set.
    pub fn stage_remove<T: Component>(
        &mut self,
        components: &ComponentRegistry,
        tables: &TableRegistry,
        entity: Entity,
    ) -> Result<(), EcsError> {
        let Some(component) = components.lookup::<T>() else {
            // An unregistered type cannot be present on any entity.
            return self.check_current(entity);
        };
        assert_ne!(
            component,
            ComponentId::ENTITY,
            "the Entity component cannot be removed; use despawn"
        );
        let destination = self.destination_mut(tables, entity)?;
        *destination = destination.without(component);
        Ok(())
    }

    /// Stage a despawn: destination becomes `EMPTY` and the pending payload
    /// is discarded. Further staging on this handle errors.
    pub fn stage_despawn(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.check_current(entity)?;
        self.destinations.insert(entity, Archetype::EMPTY);
        self.pending.remove(&entity);
        Ok(())
    }

    /// The entity's current location, `None` for stale handles.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.allocator
            .contains(entity)
            .then(|| self.locations[entity.index() as usize])
    }

    /// Whether the handle is current and resident in a table.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.location(entity)
            .is_some_and(EntityLocation::is_resident)
    }

    /// Whether the entity's *flushed* table holds `component`. Staged
    /// changes are not observed until the next flush.
    pub fn contains_component(
        &self,
        tables: &TableRegistry,
        entity: Entity,
        component: ComponentId,
    ) -> bool {
        self.allocator.contains(entity)
            && self.flushed_archetype(tables, entity).contains(component)
    }

    /// Whether any structural change is staged.
    pub fn has_staged(&self) -> bool {
        !self.destinations.is_empty()
    }

    /// Number of entities currently resident in a table.
    pub fn resident_count(&self) -> usize {
        self.locations
            .iter()
            .filter(|location| location.is_resident())
            .count()
    }

    /// Apply every staged change, moving rows between tables.
    ///
    /// All destinations are resolved to tables before the first row moves;
    /// the move loop itself cannot fail, so the world is never left in a
    /// mixed state. Entities back-filled by a swap-remove are re-located
    /// before the next move. Staging state is cleared afterwards.
    pub fn flush(
        &mut self,
        components: &ComponentRegistry,
        tables: &mut TableRegistry,
    ) -> FlushReport {
        if self.destinations.is_empty() {
            return FlushReport::default();
        }
        let tables_before = tables.len();

        // Resolve pass: every destination gets its table up front.
        let staged: Vec<(Entity, Archetype)> = std::mem::take(&mut self.destinations)
            .into_iter()
            .collect();
        let targets: Vec<_> = staged
            .iter()
            .map(|(_, destination)| {
                (!destination.is_empty()).then(|| tables.acquire(*destination, components))
            })
            .collect();
        let mut pending = std::mem::take(&mut self.pending);

        // Move pass.
        let mut moved = 0usize;
        let mut despawned = 0usize;
        for ((entity, _destination), target) in staged.into_iter().zip(targets) {
            let location = self.locations[entity.index() as usize];
            let Some(target) = target else {
                // Despawn: extract (dropping the row's values) and release.
                if location.is_resident() {
                    let table = tables
                        .get_mut(location.table_id)
                        .expect("resident location must point at a live table");
                    let (_values, back_filled) = table.extract_row(location.row as usize);
                    if let Some(back_filled) = back_filled {
                        self.locations[back_filled.index() as usize].row = location.row;
                    }
                }
                self.locations[entity.index() as usize] = EntityLocation::NOT_RESIDENT;
                self.allocator.release(entity);
                despawned += 1;
                continue;
            };

            let staged_values = pending.remove(&entity).map(Bundle::take).unwrap_or_default();
            if location.is_resident() && location.table_id == target {
                // Same table: overwrite staged values in place.
                tables
                    .get_mut(target)
                    .expect("acquired table must exist")
                    .write_row(location.row as usize, staged_values);
            } else {
                let mut values: Vec<(ComponentId, ErasedValue)> = Vec::new();
                if location.is_resident() {
                    let source = tables
                        .get_mut(location.table_id)
                        .expect("resident location must point at a live table");
                    let (extracted, back_filled) = source.extract_row(location.row as usize);
                    if let Some(back_filled) = back_filled {
                        self.locations[back_filled.index() as usize].row = location.row;
                    }
                    // Staged values override what was carried over.
                    values = extracted
                        .into_iter()
                        .filter(|(id, _)| !staged_values.iter().any(|(staged, _)| staged == id))
                        .collect();
                }
                values.extend(staged_values);
                let row = tables
                    .get_mut(target)
                    .expect("acquired table must exist")
                    .push_row(entity, values);
                self.locations[entity.index() as usize] = EntityLocation {
                    table_id: target,
                    row,
                };
            }
            moved += 1;
        }

        let report = FlushReport {
            moved,
            despawned,
            tables_created: tables.len() - tables_before,
        };
        tracing::debug!(
            moved = report.moved,
            despawned = report.despawned,
            tables_created = report.tables_created,
            "flushed staged entity changes"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(unsafe_code)] // tests read raw table rows back without a world
mod tests {
    use super::*;
    use crate::storage::TableId;

    #[derive(Debug, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    struct Frozen;

    struct Fixture {
        components: ComponentRegistry,
        tables: TableRegistry,
        entities: EntityManager,
    }

    fn fixture() -> Fixture {
        let components = ComponentRegistry::new();
        let tables = TableRegistry::new(&components);
        Fixture {
            components,
            tables,
            entities: EntityManager::new(),
        }
    }

    impl Fixture {
        fn insert<T: Component>(&mut self, entity: Entity, value: T) {
            self.entities
                .stage_insert(&mut self.components, &self.tables, entity, value)
                .unwrap();
        }

        fn flush(&mut self) -> FlushReport {
            self.entities.flush(&self.components, &mut self.tables)
        }
    }

    #[test]
    fn spawn_is_not_alive_until_flush() {
        let mut f = fixture();
        let e = f.entities.spawn();
        assert!(!f.entities.is_alive(e));
        assert_eq!(f.entities.location(e), Some(EntityLocation::NOT_RESIDENT));

        let report = f.flush();
        assert_eq!(report.moved, 1);
        assert!(f.entities.is_alive(e));
        let location = f.entities.location(e).unwrap();
        assert_ne!(location.table_id, TableId::SENTINEL);
        assert_eq!(location.row, 0);
    }

    #[test]
    fn insert_moves_entity_to_wider_archetype() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 1.0, y: 1.0 });
        f.flush();
        let first = f.entities.location(e).unwrap();

        f.insert(e, Vel { dx: 2.0, dy: 2.0 });
        f.flush();
        let second = f.entities.location(e).unwrap();
        assert_ne!(first.table_id, second.table_id);

        // The original table is now empty; the new one holds both values.
        assert_eq!(f.tables.get(first.table_id).unwrap().len(), 0);
        let pos = f.components.lookup::<Pos>().unwrap();
        let vel = f.components.lookup::<Vel>().unwrap();
        let table = f.tables.get(second.table_id).unwrap();
        let read_pos: &Pos = unsafe { table.get(pos, 0) }.unwrap();
        let read_vel: &Vel = unsafe { table.get(vel, 0) }.unwrap();
        assert_eq!(read_pos, &Pos { x: 1.0, y: 1.0 });
        assert_eq!(read_vel, &Vel { dx: 2.0, dy: 2.0 });
    }

    #[test]
    fn staged_insert_replaces_pending_value_of_same_type() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 1.0, y: 1.0 });
        f.insert(e, Pos { x: 9.0, y: 9.0 });
        f.flush();

        let pos = f.components.lookup::<Pos>().unwrap();
        let location = f.entities.location(e).unwrap();
        let table = f.tables.get(location.table_id).unwrap();
        assert_eq!(table.len(), 1);
        let read: &Pos = unsafe { table.get(pos, 0) }.unwrap();
        assert_eq!(read, &Pos { x: 9.0, y: 9.0 });
    }

    #[test]
    fn insert_then_remove_before_flush_leaves_component_absent() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 0.0, y: 0.0 });
        f.insert(e, Vel { dx: 1.0, dy: 1.0 });
        f.entities
            .stage_remove::<Vel>(&f.components, &f.tables, e)
            .unwrap();
        f.flush();

        let vel = f.components.lookup::<Vel>().unwrap();
        assert!(!f.entities.contains_component(&f.tables, e, vel));
        let pos = f.components.lookup::<Pos>().unwrap();
        assert!(f.entities.contains_component(&f.tables, e, pos));
    }

    #[test]
    fn has_reflects_flushed_state_only() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 0.0, y: 0.0 });
        let pos = f.components.lookup::<Pos>().unwrap();
        assert!(!f.entities.contains_component(&f.tables, e, pos));
        f.flush();
        assert!(f.entities.contains_component(&f.tables, e, pos));
    }

    #[test]
    fn despawn_releases_handle_and_back_fills() {
        let mut f = fixture();
        let e0 = f.entities.spawn();
        let e1 = f.entities.spawn();
        let e2 = f.entities.spawn();
        for (i, &e) in [e0, e1, e2].iter().enumerate() {
            f.insert(
                e,
                Pos {
                    x: i as f32,
                    y: i as f32,
                },
            );
        }
        f.flush();

        f.entities.stage_despawn(e1).unwrap();
        let report = f.flush();
        assert_eq!(report.despawned, 1);
        assert!(!f.entities.is_alive(e1));
        assert_eq!(f.entities.location(e1), None);

        // e2 was swap-moved into e1's row.
        let location = f.entities.location(e2).unwrap();
        assert_eq!(location.row, 1);
        let table = f.tables.get(location.table_id).unwrap();
        assert_eq!(table.entity(1), Some(e2));
        assert_eq!(table.entity(0), Some(e0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn staging_on_despawn_staged_handle_errors() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.flush();
        f.entities.stage_despawn(e).unwrap();
        let err = f
            .entities
            .stage_insert(&mut f.components, &f.tables, e, Pos { x: 0.0, y: 0.0 })
            .unwrap_err();
        assert!(matches!(err, EcsError::StaleEntity { .. }));
    }

    #[test]
    fn staging_on_released_handle_errors() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.flush();
        f.entities.stage_despawn(e).unwrap();
        f.flush();
        let err = f
            .entities
            .stage_insert(&mut f.components, &f.tables, e, Pos { x: 0.0, y: 0.0 })
            .unwrap_err();
        assert!(matches!(err, EcsError::StaleEntity { .. }));
    }

    #[test]
    fn tag_components_carry_no_payload() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 1.0, y: 1.0 });
        f.entities
            .stage_insert_tag::<Frozen>(&mut f.components, &f.tables, e)
            .unwrap();
        f.flush();

        let frozen = f.components.lookup::<Frozen>().unwrap();
        assert!(f.entities.contains_component(&f.tables, e, frozen));
    }

    #[test]
    fn same_archetype_restage_overwrites_in_place() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 1.0, y: 1.0 });
        f.flush();
        let before = f.entities.location(e).unwrap();

        f.insert(e, Pos { x: 7.0, y: 7.0 });
        f.flush();
        let after = f.entities.location(e).unwrap();
        assert_eq!(before, after);

        let pos = f.components.lookup::<Pos>().unwrap();
        let table = f.tables.get(after.table_id).unwrap();
        let read: &Pos = unsafe { table.get(pos, 0) }.unwrap();
        assert_eq!(read, &Pos { x: 7.0, y: 7.0 });
    }

    #[test]
    fn spawn_then_despawn_before_flush_never_becomes_resident() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 1.0, y: 1.0 });
        f.entities.stage_despawn(e).unwrap();
        let report = f.flush();
        assert_eq!(report.moved, 0);
        assert_eq!(report.despawned, 1);
        assert!(!f.entities.is_alive(e));
        assert_eq!(f.entities.resident_count(), 0);
    }

    #[test]
    fn flush_report_counts_created_tables() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.insert(e, Pos { x: 0.0, y: 0.0 });
        let report = f.flush();
        assert_eq!(report.tables_created, 1);
        assert_eq!(report.moved, 1);

        // Same archetype again: no new table.
        let e2 = f.entities.spawn();
        f.insert(e2, Pos { x: 1.0, y: 1.0 });
        let report = f.flush();
        assert_eq!(report.tables_created, 0);
    }

    #[test]
    fn remove_of_unregistered_type_is_a_noop() {
        let mut f = fixture();
        let e = f.entities.spawn();
        f.flush();
        f.entities
            .stage_remove::<Vel>(&f.components, &f.tables, e)
            .unwrap();
        let report = f.flush();
        assert_eq!(report.moved, 0);
        assert!(f.entities.is_alive(e));
    }
}
