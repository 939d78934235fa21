//! The table registry: archetype → table lookup, creating tables on demand.

use std::collections::HashMap;
use std::fmt;

use crate::archetype::Archetype;
use crate::component::ComponentRegistry;
use crate::table::Table;

// ---------------------------------------------------------------------------
// TableId
// ---------------------------------------------------------------------------

/// Index of a table within its registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) u32);

impl TableId {
    /// The sentinel table: archetype [`Archetype::EMPTY`], never holds
    /// resident entities. Source of fresh spawns and sink of despawns.
    pub const SENTINEL: TableId = TableId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// TableRegistry
// ---------------------------------------------------------------------------

/// Owns every table of a world and the archetype → table mapping.
///
/// Tables are created on demand by [`acquire`](Self::acquire) and never
/// destroyed, so a [`TableId`] stays valid for the lifetime of the world.
/// Newly created ids are also pushed to a log the world drains to emit
/// table-created events; queries pick up new tables by length cursor.
#[derive(Debug)]
pub struct TableRegistry {
    /// Indexed by `TableId.0`. Slot 0 is the sentinel.
    tables: Vec<Table>,
    by_archetype: HashMap<u128, TableId>,
    /// Ids created since the last [`drain_created`](Self::drain_created).
    created: Vec<TableId>,
}

impl TableRegistry {
    /// Create a registry holding only the sentinel table.
    pub fn new(registry: &ComponentRegistry) -> Self {
        let sentinel = Table::new(TableId::SENTINEL, Archetype::EMPTY, registry);
        let mut by_archetype = HashMap::new();
        by_archetype.insert(Archetype::EMPTY.bits(), TableId::SENTINEL);
        Self {
            tables: vec![sentinel],
            by_archetype,
            created: Vec::new(),
        }
    }

    /// Return the table for `archetype`, constructing it on first use.
    pub fn acquire(&mut self, archetype: Archetype, registry: &ComponentRegistry) -> TableId {
        if let Some(&id) = self.by_archetype.get(&archetype.bits()) {
            return id;
        }
        let id = TableId(self.tables.len() as u32);
        self.tables.push(Table::new(id, archetype, registry));
        self.by_archetype.insert(archetype.bits(), id);
        self.created.push(id);
        tracing::debug!(table = ?id, archetype = ?archetype, "created table");
        id
    }

    /// Look up an existing table id for `archetype` without creating one.
    pub fn lookup(&self, archetype: Archetype) -> Option<TableId> {
        self.by_archetype.get(&archetype.bits()).copied()
    }

    /// The table for `id`, or `None` for ids this registry never issued.
    pub fn get(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.index())
    }

    /// Number of tables, sentinel included.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Never true: the sentinel exists from construction.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// All tables in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    /// Take the ids created since the last call.
    pub(crate) fn drain_created(&mut self) -> Vec<TableId> {
        std::mem::take(&mut self.created)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentId;

    struct Pos;
    struct Vel;

    #[test]
    fn sentinel_occupies_slot_zero() {
        let components = ComponentRegistry::new();
        let tables = TableRegistry::new(&components);
        assert_eq!(tables.len(), 1);
        let sentinel = tables.get(TableId::SENTINEL).unwrap();
        assert_eq!(sentinel.archetype(), Archetype::EMPTY);
        assert!(sentinel.is_empty());
    }

    #[test]
    fn acquire_creates_once_per_archetype() {
        let mut components = ComponentRegistry::new();
        let pos = components.register::<Pos>();
        let mut tables = TableRegistry::new(&components);

        let archetype = Archetype::of([pos]);
        let first = tables.acquire(archetype, &components);
        let second = tables.acquire(archetype, &components);
        assert_eq!(first, second);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables.lookup(archetype), Some(first));
    }

    #[test]
    fn acquired_table_has_decoded_columns() {
        let mut components = ComponentRegistry::new();
        let pos = components.register::<Pos>();
        let vel = components.register::<Vel>();
        let mut tables = TableRegistry::new(&components);

        let id = tables.acquire(Archetype::of([pos, vel]), &components);
        let table = tables.get(id).unwrap();
        assert!(table.has_column(pos));
        assert!(table.has_column(vel));
        assert!(table.has_column(ComponentId::ENTITY));
    }

    #[test]
    fn unknown_id_returns_none() {
        let components = ComponentRegistry::new();
        let tables = TableRegistry::new(&components);
        assert!(tables.get(TableId(42)).is_none());
    }

    #[test]
    fn created_log_tracks_new_tables() {
        let mut components = ComponentRegistry::new();
        let pos = components.register::<Pos>();
        let mut tables = TableRegistry::new(&components);
        assert!(tables.drain_created().is_empty()); // sentinel is not "created"

        let id = tables.acquire(Archetype::of([pos]), &components);
        tables.acquire(Archetype::of([pos]), &components); // cached, not logged
        assert_eq!(tables.drain_created(), vec![id]);
        assert!(tables.drain_created().is_empty());
    }
}
