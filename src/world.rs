//! The [`World`]: owner of all storage, staging, resources, schedules, and
//! events, and the public surface of the crate.

use std::collections::HashMap;
use std::fmt;

use crate::archetype::Archetype;
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::entities::{EntityManager, FlushReport};
use crate::entity::{Entity, EntityLocation};
use crate::event::EventBus;
use crate::filter::QueryFilter;
use crate::query::{QueryData, QueryState};
use crate::resource::{FromWorld, Resource, Resources};
use crate::schedule::{Schedule, ScheduleLabel, System};
use crate::storage::{TableId, TableRegistry};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// When staged entity changes are flushed relative to each schedule run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityUpdateTiming {
    /// Flush before every schedule of a frame.
    Before,
    /// Flush after every schedule of a frame (the default).
    #[default]
    After,
    /// Never flush implicitly; the caller drives [`World::flush`].
    Custom,
}

/// World construction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldConfig {
    pub entity_update_timing: EntityUpdateTiming,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Payload of the table-created event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCreated {
    pub table_id: TableId,
    pub archetype: Archetype,
}

/// The world's event buses.
#[derive(Debug, Default)]
pub struct WorldEvents {
    /// Emitted when [`World::run`] begins.
    pub start: EventBus<()>,
    /// Emitted when [`World::run`] returns.
    pub stop: EventBus<()>,
    /// Emitted by [`World::flush`] for each table created while resolving
    /// staged destinations.
    pub create_table: EventBus<TableCreated>,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level container: component registry, tables, entity manager,
/// resources, schedules, and events.
pub struct World {
    pub(crate) components: ComponentRegistry,
    pub(crate) tables: TableRegistry,
    pub(crate) entities: EntityManager,
    resources: Resources,
    schedules: HashMap<ScheduleLabel, Schedule>,
    /// Event buses; subscribe directly, e.g.
    /// `world.events.create_table.subscribe(...)`.
    pub events: WorldEvents,
    config: WorldConfig,
    started: bool,
    stop_requested: bool,
}

impl World {
    /// A world with default configuration.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// A world with explicit configuration. The [`Entity`] type is
    /// registered as component 0, the sentinel table occupies table id 0,
    /// and the four default schedules are installed.
    pub fn with_config(config: WorldConfig) -> Self {
        let components = ComponentRegistry::new();
        let tables = TableRegistry::new(&components);
        let mut schedules = HashMap::new();
        for label in [
            ScheduleLabel::STARTUP,
            ScheduleLabel::PRE_UPDATE,
            ScheduleLabel::UPDATE,
            ScheduleLabel::POST_UPDATE,
        ] {
            schedules.insert(label, Schedule::new());
        }
        Self {
            components,
            tables,
            entities: EntityManager::new(),
            resources: Resources::new(),
            schedules,
            events: WorldEvents::default(),
            config,
            started: false,
            stop_requested: false,
        }
    }

    pub fn config(&self) -> WorldConfig {
        self.config
    }

    // -- component & table access -------------------------------------------

    /// Register a component type up front. Types are otherwise registered on
    /// first use by staging and queries.
    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        self.components.register::<T>()
    }

    /// The component id of `T`, if it has been registered.
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.components.lookup::<T>()
    }

    /// Read-only access to the table registry.
    pub fn tables(&self) -> &TableRegistry {
        &self.tables
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Stage a new entity and return a handle facade for chaining inserts.
    /// The entity becomes resident (and alive) at the next flush.
    pub fn spawn(&mut self) -> EntityWorldMut<'_> {
        let entity = self.entities.spawn();
        EntityWorldMut {
            world: self,
            entity,
        }
    }

    /// A mutating facade for an existing entity.
    ///
    /// # Panics
    ///
    /// Panics when the handle is stale (despawned and flushed). Use
    /// [`get_entity_mut`](Self::get_entity_mut) for a fallible lookup.
    pub fn entity_mut(&mut self, entity: Entity) -> EntityWorldMut<'_> {
        match self.get_entity_mut(entity) {
            Some(facade) => facade,
            None => panic!("entity {entity} is despawned or was never spawned"),
        }
    }

    /// Fallible variant of [`entity_mut`](Self::entity_mut).
    pub fn get_entity_mut(&mut self, entity: Entity) -> Option<EntityWorldMut<'_>> {
        self.entities.location(entity)?;
        Some(EntityWorldMut {
            world: self,
            entity,
        })
    }

    /// Stage a despawn for `entity`.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.entities.stage_despawn(entity)
    }

    /// Whether `entity` is resident in a table (spawn staged but not yet
    /// flushed is *not* alive).
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// The entity's current location, `None` for stale handles.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.location(entity)
    }

    /// Number of entities resident in tables.
    pub fn entity_count(&self) -> usize {
        self.entities.resident_count()
    }

    /// Whether the entity's flushed table holds a `T` column. Staged changes
    /// are observed only after the next flush.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        match self.components.lookup::<T>() {
            Some(component) => self
                .entities
                .contains_component(&self.tables, entity, component),
            None => false,
        }
    }

    /// Read a component of `entity` from its flushed table row.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let location = self.entities.location(entity)?;
        if !location.is_resident() {
            return None;
        }
        let component = self.components.lookup::<T>()?;
        let table = self.tables.get(location.table_id)?;
        // The registry maps T to this id one-to-one, so the downcast is safe.
        unsafe { table.get::<T>(component, location.row as usize) }
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let location = self.entities.location(entity)?;
        if !location.is_resident() {
            return None;
        }
        let component = self.components.lookup::<T>()?;
        let table = self.tables.get_mut(location.table_id)?;
        unsafe { table.get_mut::<T>(component, location.row as usize) }
    }

    // -- staging forwarding (used by the handle facade) ---------------------

    pub(crate) fn stage_insert<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), EcsError> {
        self.entities
            .stage_insert(&mut self.components, &self.tables, entity, value)
    }

    pub(crate) fn stage_insert_tag<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.entities
            .stage_insert_tag::<T>(&mut self.components, &self.tables, entity)
    }

    pub(crate) fn stage_remove<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.entities
            .stage_remove::<T>(&self.components, &self.tables, entity)
    }

    // -- flush --------------------------------------------------------------

    /// Apply all staged structural changes, then emit a
    /// [`TableCreated`] event for each table the flush created.
    pub fn flush(&mut self) -> FlushReport {
        let report = self.entities.flush(&self.components, &mut self.tables);
        for table_id in self.tables.drain_created() {
            let archetype = self
                .tables
                .get(table_id)
                .expect("created table must exist")
                .archetype();
            self.events.create_table.emit(&TableCreated {
                table_id,
                archetype,
            });
        }
        report
    }

    // -- queries ------------------------------------------------------------

    /// Compile an unfiltered query.
    pub fn query<D: QueryData>(&mut self) -> QueryState<D> {
        QueryState::new(self)
    }

    /// Compile a filtered query.
    pub fn query_filtered<D: QueryData, F: QueryFilter>(&mut self) -> QueryState<D, F> {
        QueryState::new(self)
    }

    // -- resources ----------------------------------------------------------

    /// Insert a resource, replacing any value of the same type.
    pub fn insert_resource<T: Resource>(&mut self, value: T) -> &mut Self {
        self.resources.insert(value);
        self
    }

    /// Construct the resource via [`FromWorld`] if it is absent.
    pub fn init_resource<T: Resource + FromWorld>(&mut self) -> &mut Self {
        if !self.resources.contains::<T>() {
            let value = T::from_world(self);
            self.resources.insert(value);
        }
        self
    }

    /// The resource of type `T`.
    ///
    /// # Panics
    ///
    /// Panics when the resource was never inserted; use
    /// [`get_resource`](Self::get_resource) for a fallible lookup.
    pub fn resource<T: Resource>(&self) -> &T {
        match self.resources.get::<T>() {
            Some(value) => value,
            None => panic!(
                "resource '{}' was never inserted into this world",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Mutable variant of [`resource`](Self::resource).
    ///
    /// # Panics
    ///
    /// As [`resource`](Self::resource).
    pub fn resource_mut<T: Resource>(&mut self) -> &mut T {
        match self.resources.get_mut::<T>() {
            Some(value) => value,
            None => panic!(
                "resource '{}' was never inserted into this world",
                std::any::type_name::<T>()
            ),
        }
    }

    pub fn get_resource<T: Resource>(&self) -> Option<&T> {
        self.resources.get::<T>()
    }

    pub fn get_resource_mut<T: Resource>(&mut self) -> Option<&mut T> {
        self.resources.get_mut::<T>()
    }

    pub fn remove_resource<T: Resource>(&mut self) -> Option<T> {
        self.resources.remove::<T>()
    }

    pub fn contains_resource<T: Resource>(&self) -> bool {
        self.resources.contains::<T>()
    }

    // -- schedules & systems ------------------------------------------------

    /// Install an empty schedule under `label` if none exists.
    pub fn add_schedule(&mut self, label: ScheduleLabel) -> &mut Self {
        self.schedules.entry(label).or_default();
        self
    }

    /// The schedule registered under `label`.
    pub fn schedule(&self, label: ScheduleLabel) -> Result<&Schedule, EcsError> {
        self.schedules
            .get(&label)
            .ok_or(EcsError::UnknownSchedule { label })
    }

    /// Mutable variant of [`schedule`](Self::schedule).
    pub fn schedule_mut(&mut self, label: ScheduleLabel) -> Result<&mut Schedule, EcsError> {
        self.schedules
            .get_mut(&label)
            .ok_or(EcsError::UnknownSchedule { label })
    }

    /// Append a system to the schedule under `label`.
    pub fn add_system(
        &mut self,
        label: ScheduleLabel,
        system: impl System,
    ) -> Result<&mut Self, EcsError> {
        self.schedule_mut(label)?.add_system(system)?;
        Ok(self)
    }

    /// Remove the named system from the schedule under `label`.
    pub fn remove_system(&mut self, label: ScheduleLabel, name: &str) -> Result<(), EcsError> {
        self.schedule_mut(label)?.remove_system(name)
    }

    pub fn has_system(&self, label: ScheduleLabel, name: &str) -> bool {
        self.schedules
            .get(&label)
            .is_some_and(|schedule| schedule.has_system(name))
    }

    /// Run the schedule under `label` once, without any implicit flush.
    pub fn run_schedule(&mut self, label: ScheduleLabel) -> Result<(), EcsError> {
        let mut schedule = self
            .schedules
            .remove(&label)
            .ok_or(EcsError::UnknownSchedule { label })?;
        let result = schedule.run(self);
        self.schedules.insert(label, schedule);
        result
    }

    /// Prepare every schedule's systems. Idempotent: preparing again
    /// replaces previously resolved state.
    pub fn prepare(&mut self) -> Result<(), EcsError> {
        let labels: Vec<ScheduleLabel> = self.schedules.keys().copied().collect();
        for label in labels {
            let mut schedule = self
                .schedules
                .remove(&label)
                .expect("label was just listed");
            let result = schedule.prepare(self);
            self.schedules.insert(label, schedule);
            result?;
        }
        Ok(())
    }

    // -- plugins ------------------------------------------------------------

    /// Apply a plugin: a function that configures the world (registering
    /// components, resources, and systems).
    pub fn add_plugin<P>(&mut self, plugin: P) -> Result<&mut Self, EcsError>
    where
        P: FnOnce(&mut World) -> Result<(), EcsError>,
    {
        plugin(self)?;
        Ok(self)
    }

    // -- frame loop ---------------------------------------------------------

    fn run_schedule_with_timing(&mut self, label: ScheduleLabel) -> Result<(), EcsError> {
        if self.config.entity_update_timing == EntityUpdateTiming::Before {
            self.flush();
        }
        self.run_schedule(label)?;
        if self.config.entity_update_timing == EntityUpdateTiming::After {
            self.flush();
        }
        Ok(())
    }

    /// Run one frame: `Startup` on the first call, then `PreUpdate`,
    /// `Update`, `PostUpdate`, flushing around each schedule according to
    /// [`EntityUpdateTiming`].
    pub fn update(&mut self) -> Result<(), EcsError> {
        if !self.started {
            self.started = true;
            self.run_schedule_with_timing(ScheduleLabel::STARTUP)?;
        }
        for label in [
            ScheduleLabel::PRE_UPDATE,
            ScheduleLabel::UPDATE,
            ScheduleLabel::POST_UPDATE,
        ] {
            self.run_schedule_with_timing(label)?;
        }
        Ok(())
    }

    /// Run frames until [`stop`](Self::stop) is called or a system errors.
    /// Emits the `start` event first and the `stop` event on the way out.
    pub fn run(&mut self) -> Result<(), EcsError> {
        self.stop_requested = false;
        self.events.start.emit(&());
        let result = loop {
            if let Err(error) = self.update() {
                break Err(error);
            }
            if self.stop_requested {
                break Ok(());
            }
        };
        self.events.stop.emit(&());
        result
    }

    /// Request [`run`](Self::run) to return after the current frame.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_count())
            .field("table_count", &self.tables.len())
            .field("component_count", &self.components.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EntityWorldMut -- the mutating handle facade
// ---------------------------------------------------------------------------

/// A thin facade over one entity; every mutating call forwards to the entity
/// manager and is therefore *staged* until the next flush.
pub struct EntityWorldMut<'w> {
    world: &'w mut World,
    entity: Entity,
}

impl EntityWorldMut<'_> {
    /// The underlying handle.
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Stage `value` onto the entity.
    ///
    /// # Panics
    ///
    /// Panics when a despawn has been staged for this entity.
    pub fn insert<T: Component>(&mut self, value: T) -> &mut Self {
        if let Err(error) = self.world.stage_insert(self.entity, value) {
            panic!("cannot insert '{}': {error}", std::any::type_name::<T>());
        }
        self
    }

    /// Stage a zero-sized tag component onto the entity.
    ///
    /// # Panics
    ///
    /// Panics when `T` is not zero-sized, or when a despawn has been staged.
    pub fn insert_tag<T: Component>(&mut self) -> &mut Self {
        if let Err(error) = self.world.stage_insert_tag::<T>(self.entity) {
            panic!("cannot insert tag '{}': {error}", std::any::type_name::<T>());
        }
        self
    }

    /// Stage removal of `T` from the entity.
    ///
    /// # Panics
    ///
    /// Panics when a despawn has been staged for this entity.
    pub fn remove<T: Component>(&mut self) -> &mut Self {
        if let Err(error) = self.world.stage_remove::<T>(self.entity) {
            panic!("cannot remove '{}': {error}", std::any::type_name::<T>());
        }
        self
    }

    /// Stage a despawn, consuming the facade.
    pub fn despawn(self) {
        if let Err(error) = self.world.despawn(self.entity) {
            panic!("cannot despawn {}: {error}", self.entity);
        }
    }

    /// Whether the entity's *flushed* table holds `T`.
    pub fn contains<T: Component>(&self) -> bool {
        self.world.has::<T>(self.entity)
    }

    /// Whether the entity is resident in a table.
    pub fn is_alive(&self) -> bool {
        self.world.is_alive(self.entity)
    }

    /// The entity's current location.
    pub fn location(&self) -> EntityLocation {
        self.world
            .location(self.entity)
            .expect("facade exists only for current handles")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::system;

    #[derive(Debug, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, PartialEq, Default)]
    struct Counter(u32);

    #[test]
    fn spawn_insert_flush_read_back() {
        let mut world = World::new();
        let entity = world.spawn().insert(Pos { x: 1.0, y: 2.0 }).id();
        assert!(!world.is_alive(entity));
        world.flush();
        assert!(world.is_alive(entity));
        assert_eq!(world.get::<Pos>(entity), Some(&Pos { x: 1.0, y: 2.0 }));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn get_mut_overwrites_in_place() {
        let mut world = World::new();
        let entity = world.spawn().insert(Pos { x: 0.0, y: 0.0 }).id();
        world.flush();
        world.get_mut::<Pos>(entity).unwrap().x = 5.0;
        assert_eq!(world.get::<Pos>(entity), Some(&Pos { x: 5.0, y: 0.0 }));
    }

    #[test]
    fn entity_mut_panics_for_stale_handles() {
        let mut world = World::new();
        let entity = world.spawn().id();
        world.flush();
        world.despawn(entity).unwrap();
        world.flush();
        assert!(world.get_entity_mut(entity).is_none());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            world.entity_mut(entity);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn resources_roundtrip() {
        let mut world = World::new();
        world.insert_resource(Counter(3));
        assert_eq!(world.resource::<Counter>(), &Counter(3));
        world.resource_mut::<Counter>().0 += 1;
        assert_eq!(world.get_resource::<Counter>(), Some(&Counter(4)));
    }

    #[test]
    fn init_resource_uses_from_world_once() {
        let mut world = World::new();
        world.init_resource::<Counter>();
        world.resource_mut::<Counter>().0 = 9;
        world.init_resource::<Counter>(); // already present, not rebuilt
        assert_eq!(world.resource::<Counter>(), &Counter(9));
    }

    #[test]
    fn unknown_schedule_is_a_loud_error() {
        let mut world = World::new();
        let missing = ScheduleLabel("missing");
        assert!(matches!(
            world.run_schedule(missing),
            Err(EcsError::UnknownSchedule { .. })
        ));
        world.add_schedule(missing);
        assert!(world.run_schedule(missing).is_ok());
    }

    #[test]
    fn create_table_event_fires_on_flush() {
        use std::sync::{Arc, Mutex};
        let mut world = World::new();
        let seen: Arc<Mutex<Vec<TableCreated>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        world.events.create_table.subscribe(
            crate::event::handler(move |created: &TableCreated| {
                seen_in.lock().unwrap().push(*created);
            }),
            0,
        );

        world.spawn().insert(Pos { x: 0.0, y: 0.0 });
        world.flush();
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        let archetype = events[0].archetype;
        let pos = world.component_id::<Pos>().unwrap();
        assert!(archetype.contains(pos));
        assert!(archetype.contains(ComponentId::ENTITY));
    }

    #[test]
    fn update_flushes_after_each_schedule_by_default() {
        let mut world = World::new();
        world
            .add_system(
                ScheduleLabel::UPDATE,
                system("spawner", |world| {
                    world.spawn().insert(Pos { x: 1.0, y: 1.0 });
                    Ok(())
                }),
            )
            .unwrap();
        world.update().unwrap();
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn custom_timing_never_flushes_implicitly() {
        let mut world = World::with_config(WorldConfig {
            entity_update_timing: EntityUpdateTiming::Custom,
        });
        world
            .add_system(
                ScheduleLabel::UPDATE,
                system("spawner", |world| {
                    world.spawn().insert(Pos { x: 1.0, y: 1.0 });
                    Ok(())
                }),
            )
            .unwrap();
        world.update().unwrap();
        assert_eq!(world.entity_count(), 0);
        world.flush();
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn startup_runs_once_before_the_first_frame() {
        let mut world = World::new();
        world.insert_resource(Counter(0));
        world
            .add_system(
                ScheduleLabel::STARTUP,
                system("boot", |world| {
                    world.resource_mut::<Counter>().0 += 1;
                    Ok(())
                }),
            )
            .unwrap();
        world.update().unwrap();
        world.update().unwrap();
        assert_eq!(world.resource::<Counter>(), &Counter(1));
    }

    #[test]
    fn run_loops_until_stopped_and_fires_events() {
        use std::sync::{Arc, Mutex};
        let mut world = World::new();
        world.insert_resource(Counter(0));
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for (bus, tag) in [
            (&mut world.events.start, "start"),
            (&mut world.events.stop, "stop"),
        ] {
            let log = Arc::clone(&log);
            bus.subscribe(crate::event::handler(move |_| log.lock().unwrap().push(tag)), 0);
        }
        world
            .add_system(
                ScheduleLabel::UPDATE,
                system("count_to_three", |world| {
                    world.resource_mut::<Counter>().0 += 1;
                    if world.resource::<Counter>().0 == 3 {
                        world.stop();
                    }
                    Ok(())
                }),
            )
            .unwrap();
        world.run().unwrap();
        assert_eq!(world.resource::<Counter>(), &Counter(3));
        assert_eq!(*log.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn plugins_configure_the_world() {
        let mut world = World::new();
        world
            .add_plugin(|world: &mut World| {
                world.insert_resource(Counter(7));
                world.add_system(ScheduleLabel::UPDATE, system("noop", |_| Ok(())))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(world.resource::<Counter>(), &Counter(7));
        assert!(world.has_system(ScheduleLabel::UPDATE, "noop"));
    }
}
