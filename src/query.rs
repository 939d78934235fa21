//! Queries: precomputed table views that yield rows during iteration.
//!
//! A query is parameterised by an accessor type `D` (a single accessor or a
//! tuple) and an optional [`QueryFilter`] `F`. Construction resolves the
//! accessed component types, builds the `(require, forbid)` pair list, and
//! matches every existing table; tables created later are picked up before
//! each operation by a length cursor over the table registry.
//!
//! ## Soundness
//!
//! Read-only iteration ([`QueryState::iter`]) takes `&World` and rejects
//! mutable accessors loudly. Mutable iteration ([`QueryState::iter_mut`])
//! takes `&mut World`, so the exclusive borrow guarantees no aliasing while
//! `&mut T` items are handed out; a query that accesses the same component
//! mutably twice is rejected at construction.

use std::marker::PhantomData;

use crate::archetype::Archetype;
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::entity::Entity;
use crate::filter::{check_satisfiable, FilterPair, QueryFilter};
use crate::storage::{TableId, TableRegistry};
use crate::table::Table;
use crate::world::World;

// ---------------------------------------------------------------------------
// QueryData -- one accessor, or a tuple of accessors
// ---------------------------------------------------------------------------

/// One recorded component access of a query, used for conflict checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub component: ComponentId,
    pub mutable: bool,
}

/// An accessor (or tuple of accessors) a query can yield per row.
///
/// Implemented for [`Entity`], `&T`, `&mut T`, `Option<&T>` / `Option<&mut
/// T>` (the *maybe* accessors, yielding `None` where the table lacks the
/// column), and tuples of up to five accessors.
pub trait QueryData {
    /// The value yielded per row.
    type Item<'w>;
    /// Whether any accessor borrows mutably.
    const MUTABLE: bool;

    /// Register the accessed types. Non-optional component accessors push
    /// their id into `required`; every component access lands in `access`.
    fn init(
        components: &mut ComponentRegistry,
        required: &mut Vec<ComponentId>,
        access: &mut Vec<Access>,
    );

    /// Fetch this accessor's value at `row` of `table`.
    ///
    /// # Safety
    ///
    /// `table` must satisfy the query's require set, `row` must be in range,
    /// and for `MUTABLE` accessors the caller must hold exclusive access to
    /// the world.
    unsafe fn fetch<'w>(
        components: &ComponentRegistry,
        table: &'w Table,
        row: usize,
    ) -> Self::Item<'w>;
}

impl QueryData for Entity {
    type Item<'w> = Entity;
    const MUTABLE: bool = false;

    fn init(_: &mut ComponentRegistry, _: &mut Vec<ComponentId>, _: &mut Vec<Access>) {
        // The entity column is part of every table.
    }

    unsafe fn fetch<'w>(_: &ComponentRegistry, table: &'w Table, row: usize) -> Entity {
        table.entities()[row]
    }
}

impl<T: Component> QueryData for &T {
    type Item<'w> = &'w T;
    const MUTABLE: bool = false;

    fn init(
        components: &mut ComponentRegistry,
        required: &mut Vec<ComponentId>,
        access: &mut Vec<Access>,
    ) {
        let component = components.register::<T>();
        required.push(component);
        access.push(Access {
            component,
            mutable: false,
        });
    }

    unsafe fn fetch<'w>(components: &ComponentRegistry, table: &'w Table, row: usize) -> &'w T {
        let component = components.lookup::<T>().unwrap();
        table.get::<T>(component, row).unwrap()
    }
}

impl<T: Component> QueryData for &mut T {
    type Item<'w> = &'w mut T;
    const MUTABLE: bool = true;

    fn init(
        components: &mut ComponentRegistry,
        required: &mut Vec<ComponentId>,
        access: &mut Vec<Access>,
    ) {
        let component = components.register::<T>();
        required.push(component);
        access.push(Access {
            component,
            mutable: true,
        });
    }

    unsafe fn fetch<'w>(
        components: &ComponentRegistry,
        table: &'w Table,
        row: usize,
    ) -> &'w mut T {
        let component = components.lookup::<T>().unwrap();
        // The caller (iter_mut) holds &mut World, so no other reference to
        // this value exists; the shared-to-mutable cast is sound.
        let ptr = table.get_untyped(component, row).unwrap();
        &mut *(ptr.as_ptr() as *mut T)
    }
}

impl<T: Component> QueryData for Option<&T> {
    type Item<'w> = Option<&'w T>;
    const MUTABLE: bool = false;

    fn init(components: &mut ComponentRegistry, _: &mut Vec<ComponentId>, access: &mut Vec<Access>) {
        // Registered so the id is known, but not required: tables without
        // the column still match and yield `None`.
        let component = components.register::<T>();
        access.push(Access {
            component,
            mutable: false,
        });
    }

    unsafe fn fetch<'w>(
        components: &ComponentRegistry,
        table: &'w Table,
        row: usize,
    ) -> Option<&'w T> {
        let component = components.lookup::<T>().unwrap();
        table.get::<T>(component, row)
    }
}

impl<T: Component> QueryData for Option<&mut T> {
    type Item<'w> = Option<&'w mut T>;
    const MUTABLE: bool = true;

    fn init(components: &mut ComponentRegistry, _: &mut Vec<ComponentId>, access: &mut Vec<Access>) {
        let component = components.register::<T>();
        access.push(Access {
            component,
            mutable: true,
        });
    }

    unsafe fn fetch<'w>(
        components: &ComponentRegistry,
        table: &'w Table,
        row: usize,
    ) -> Option<&'w mut T> {
        let component = components.lookup::<T>().unwrap();
        let ptr = table.get_untyped(component, row)?;
        Some(&mut *(ptr.as_ptr() as *mut T))
    }
}

macro_rules! impl_query_data_tuple {
    ($($name:ident),+) => {
        impl<$($name: QueryData),+> QueryData for ($($name,)+) {
            type Item<'w> = ($($name::Item<'w>,)+);
            const MUTABLE: bool = $($name::MUTABLE)||+;

            fn init(
                components: &mut ComponentRegistry,
                required: &mut Vec<ComponentId>,
                access: &mut Vec<Access>,
            ) {
                $($name::init(components, required, access);)+
            }

            unsafe fn fetch<'w>(
                components: &ComponentRegistry,
                table: &'w Table,
                row: usize,
            ) -> Self::Item<'w> {
                ($($name::fetch(components, table, row),)+)
            }
        }
    };
}

impl_query_data_tuple!(A);
impl_query_data_tuple!(A, B);
impl_query_data_tuple!(A, B, C);
impl_query_data_tuple!(A, B, C, D);
impl_query_data_tuple!(A, B, C, D, E);

/// Reject mutable access to a component that is accessed elsewhere in the
/// same query.
fn validate_access(access: &[Access]) {
    for (index, a) in access.iter().enumerate() {
        for b in &access[index + 1..] {
            if a.component == b.component && (a.mutable || b.mutable) {
                panic!(
                    "query accesses component {:?} mutably and through another accessor; \
                     each component may be borrowed mutably at most once per query",
                    a.component
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// QueryState
// ---------------------------------------------------------------------------

/// A compiled query: filter pairs plus the list of matching table ids.
///
/// The state holds non-owning [`TableId`]s, never column pointers, so it
/// stays valid for the lifetime of the world (tables are never destroyed).
pub struct QueryState<D: QueryData, F: QueryFilter = ()> {
    pairs: Vec<FilterPair>,
    matched: Vec<TableId>,
    /// How many registry tables have been examined for a match.
    seen_tables: usize,
    _marker: PhantomData<fn() -> (D, F)>,
}

impl<D: QueryData, F: QueryFilter> QueryState<D, F> {
    /// Compile the query against `world`, registering any new component
    /// types it references.
    ///
    /// # Panics
    ///
    /// Panics when the query borrows the same component mutably more than
    /// once, or (in debug builds) when the filter is unsatisfiable.
    pub fn new(world: &mut World) -> Self {
        Self::from_parts(&mut world.components, &world.tables)
    }

    pub(crate) fn from_parts(
        components: &mut ComponentRegistry,
        tables: &TableRegistry,
    ) -> Self {
        let mut required = Vec::new();
        let mut access = Vec::new();
        D::init(components, &mut required, &mut access);
        validate_access(&access);

        let base = Archetype::of(required);
        let pairs = F::apply(
            components,
            vec![FilterPair {
                require: base,
                forbid: Archetype::EMPTY,
            }],
        );
        check_satisfiable(&pairs);

        let mut state = Self {
            pairs,
            matched: Vec::new(),
            seen_tables: 0,
            _marker: PhantomData,
        };
        state.update(tables);
        state
    }

    /// The compiled `(require, forbid)` pairs.
    pub fn pairs(&self) -> &[FilterPair] {
        &self.pairs
    }

    /// Examine tables created since the last operation.
    fn update(&mut self, tables: &TableRegistry) {
        for table in tables.iter().skip(self.seen_tables) {
            if self.pairs.iter().any(|pair| pair.matches(table.archetype())) {
                self.matched.push(table.id());
            }
        }
        self.seen_tables = tables.len();
    }

    /// Whether `archetype` matches this query's filter.
    pub fn matches(&self, archetype: Archetype) -> bool {
        self.pairs.iter().any(|pair| pair.matches(archetype))
    }

    /// Iterate all matching rows read-only.
    ///
    /// # Panics
    ///
    /// Panics when `D` contains a mutable accessor; use
    /// [`iter_mut`](Self::iter_mut).
    pub fn iter<'w, 's>(&'s mut self, world: &'w World) -> QueryIter<'w, 's, D> {
        assert!(
            !D::MUTABLE,
            "QueryState::iter() cannot be used with mutable accessors (&mut T); \
             use QueryState::iter_mut(), which requires &mut World"
        );
        self.update(&world.tables);
        QueryIter::new(&world.components, &world.tables, &self.matched)
    }

    /// Iterate all matching rows with mutable access. The `&mut World`
    /// receiver guarantees exclusivity for the yielded `&mut T` items.
    pub fn iter_mut<'w, 's>(&'s mut self, world: &'w mut World) -> QueryIter<'w, 's, D> {
        self.update(&world.tables);
        let world = &*world;
        QueryIter::new(&world.components, &world.tables, &self.matched)
    }

    /// Total number of matching rows.
    pub fn len(&mut self, world: &World) -> usize {
        self.update(&world.tables);
        self.matched
            .iter()
            .map(|id| world.tables.get(*id).map_or(0, Table::len))
            .sum()
    }

    pub fn is_empty(&mut self, world: &World) -> bool {
        self.len(world) == 0
    }

    /// The first matching row, `None` when the query is empty. Debug builds
    /// assert there is at most one match.
    pub fn single<'w>(&mut self, world: &'w World) -> Option<D::Item<'w>> {
        let mut iter = self.iter(world);
        let first = iter.next();
        debug_assert!(
            first.is_none() || iter.next().is_none(),
            "single() called on a query matching more than one row"
        );
        first
    }

    /// Read the query's accessors for one specific entity.
    ///
    /// Returns `None` when the handle is stale, the entity is not resident,
    /// or its *current* table fails the filter. Staged changes that have
    /// not been flushed are not observed.
    pub fn get<'w>(&mut self, world: &'w World, entity: Entity) -> Option<D::Item<'w>> {
        assert!(
            !D::MUTABLE,
            "QueryState::get() cannot be used with mutable accessors (&mut T)"
        );
        self.update(&world.tables);
        let location = world.entities.location(entity)?;
        if !location.is_resident() {
            return None;
        }
        let table = world.tables.get(location.table_id)?;
        if !self.matches(table.archetype()) {
            return None;
        }
        Some(unsafe { D::fetch(&world.components, table, location.row as usize) })
    }

    /// Iterate every unique unordered pair of matching rows, read-only.
    ///
    /// # Panics
    ///
    /// Panics when `D` contains a mutable accessor.
    pub fn iter_pairs<'w>(&mut self, world: &'w World) -> QueryPairIter<'w, D> {
        assert!(
            !D::MUTABLE,
            "QueryState::iter_pairs() cannot be used with mutable accessors (&mut T)"
        );
        self.update(&world.tables);
        let mut positions = Vec::new();
        for &id in &self.matched {
            let table = world.tables.get(id).expect("matched table must exist");
            for row in 0..table.len() {
                positions.push((id, row));
            }
        }
        QueryPairIter {
            components: &world.components,
            tables: &world.tables,
            positions,
            first: 0,
            second: 1,
            _marker: PhantomData,
        }
    }
}

// ---------------------------------------------------------------------------
// QueryIter
// ---------------------------------------------------------------------------

/// Row iterator over a query's matched tables.
pub struct QueryIter<'w, 's, D: QueryData> {
    components: &'w ComponentRegistry,
    tables: &'w TableRegistry,
    matched: &'s [TableId],
    table_cursor: usize,
    row: usize,
    _marker: PhantomData<fn() -> D>,
}

impl<'w, 's, D: QueryData> QueryIter<'w, 's, D> {
    fn new(
        components: &'w ComponentRegistry,
        tables: &'w TableRegistry,
        matched: &'s [TableId],
    ) -> Self {
        Self {
            components,
            tables,
            matched,
            table_cursor: 0,
            row: 0,
            _marker: PhantomData,
        }
    }
}

impl<'w, 's, D: QueryData> Iterator for QueryIter<'w, 's, D> {
    type Item = D::Item<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        let components = self.components;
        let tables = self.tables;
        loop {
            let table_id = *self.matched.get(self.table_cursor)?;
            let table = tables.get(table_id).expect("matched table must exist");
            if self.row < table.len() {
                let row = self.row;
                self.row += 1;
                return Some(unsafe { D::fetch(components, table, row) });
            }
            self.table_cursor += 1;
            self.row = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// QueryPairIter
// ---------------------------------------------------------------------------

/// Iterator over all unique unordered pairs of matching rows.
pub struct QueryPairIter<'w, D: QueryData> {
    components: &'w ComponentRegistry,
    tables: &'w TableRegistry,
    positions: Vec<(TableId, usize)>,
    first: usize,
    second: usize,
    _marker: PhantomData<fn() -> D>,
}

impl<'w, D: QueryData> Iterator for QueryPairIter<'w, D> {
    type Item = (D::Item<'w>, D::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.second >= self.positions.len() {
            self.first += 1;
            self.second = self.first + 1;
            if self.second >= self.positions.len() {
                return None;
            }
        }
        let components = self.components;
        let tables = self.tables;
        let fetch_at = move |position: (TableId, usize)| {
            let table = tables.get(position.0).expect("matched table must exist");
            unsafe { D::fetch(components, table, position.1) }
        };
        let pair = (
            fetch_at(self.positions[self.first]),
            fetch_at(self.positions[self.second]),
        );
        self.second += 1;
        Some(pair)
    }
}
