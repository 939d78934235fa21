//! Column-major storage for all entities of one archetype.
//!
//! A [`Table`] holds one type-erased [`Column`] per component type plus a
//! parallel `Vec<Entity>` that is the component-0 column. All columns share
//! the same length. Removal is swap-remove: the last row back-fills the gap,
//! so row order within a table is unstable.
//!
//! # Safety
//!
//! This module contains `unsafe` code because component data lives in
//! manually managed byte buffers. The invariants are upheld by the
//! construction APIs: a column is only ever touched through the
//! [`ComponentId`] it was created for, and the registry guarantees a
//! one-to-one mapping between ids and Rust types.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::archetype::Archetype;
use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry};
use crate::entity::Entity;
use crate::storage::TableId;

// ---------------------------------------------------------------------------
// ErasedValue -- one component value in an aligned heap buffer
// ---------------------------------------------------------------------------

/// A single component value moved out of its typed form.
///
/// Owns an aligned heap buffer (no buffer for zero-sized types). The value
/// inside is dropped when the `ErasedValue` is dropped, unless the bytes were
/// moved into a column first ([`mark_moved`](Self::mark_moved)).
pub(crate) struct ErasedValue {
    /// Heap buffer, null for zero-sized types.
    data: *mut u8,
    size: usize,
    align: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
    /// Whether the buffer still contains a live value.
    live: bool,
}

// The construction APIs only ever put `Component` (Send + Sync) values in
// here, so moving the buffer across threads is sound.
unsafe impl Send for ErasedValue {}
unsafe impl Sync for ErasedValue {}

impl ErasedValue {
    /// Move `value` into a fresh erased buffer.
    pub fn new<T: Component>(value: T) -> Self {
        let size = std::mem::size_of::<T>();
        let align = std::mem::align_of::<T>();
        unsafe fn drop_in_place<T>(ptr: *mut u8) {
            ptr::drop_in_place(ptr as *mut T);
        }
        let drop_fn =
            std::mem::needs_drop::<T>().then_some(drop_in_place::<T> as unsafe fn(*mut u8));
        let data = if size > 0 {
            let layout = Layout::new::<T>();
            unsafe {
                let data = alloc::alloc(layout);
                assert!(!data.is_null(), "allocation failed");
                ptr::copy_nonoverlapping(&value as *const T as *const u8, data, size);
                data
            }
        } else {
            ptr::null_mut()
        };
        std::mem::forget(value);
        Self {
            data,
            size,
            align,
            drop_fn,
            live: true,
        }
    }

    /// Take ownership of an existing buffer holding a live value.
    ///
    /// # Safety
    ///
    /// `data` must have been allocated with `Layout::from_size_align(size,
    /// align)` (null iff `size == 0`) and must contain an initialized value
    /// whose drop glue is `drop_fn`.
    pub unsafe fn from_raw(
        data: *mut u8,
        size: usize,
        align: usize,
        drop_fn: Option<unsafe fn(*mut u8)>,
    ) -> Self {
        Self {
            data,
            size,
            align,
            drop_fn,
            live: true,
        }
    }

    /// Pointer to the value bytes (dangling but aligned for ZSTs).
    pub fn as_ptr(&self) -> *const u8 {
        if self.size > 0 {
            self.data
        } else {
            self.align as *const u8
        }
    }

    /// Record that the bytes were moved into a column; drop is skipped.
    pub fn mark_moved(&mut self) {
        self.live = false;
    }
}

impl Drop for ErasedValue {
    fn drop(&mut self) {
        unsafe {
            if self.live {
                if let Some(drop_fn) = self.drop_fn {
                    drop_fn(self.as_ptr() as *mut u8);
                }
            }
            if self.size > 0 && !self.data.is_null() {
                let layout = Layout::from_size_align(self.size, self.align)
                    .expect("erased value layout must be valid");
                alloc::dealloc(self.data, layout);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Column -- type-erased dense storage for one component type
// ---------------------------------------------------------------------------

/// A densely packed, type-erased array of component values of a single type.
pub(crate) struct Column {
    /// Heap allocation; null while capacity is 0 and always null for ZSTs.
    data: *mut u8,
    len: usize,
    capacity: usize,
    item_size: usize,
    item_align: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
}

// Columns only ever store `Component` (Send + Sync) values.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    pub fn new(info: &ComponentInfo) -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
            capacity: 0,
            item_size: info.size,
            item_align: info.align,
            drop_fn: info.drop_fn,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    fn layout_for_capacity(&self, capacity: usize) -> Option<Layout> {
        if self.item_size == 0 || capacity == 0 {
            return None;
        }
        Layout::from_size_align(self.item_size * capacity, self.item_align).ok()
    }

    fn grow_if_needed(&mut self) {
        if self.len < self.capacity {
            return;
        }
        let new_capacity = if self.capacity == 0 { 4 } else { self.capacity * 2 };
        if self.item_size == 0 {
            self.capacity = new_capacity;
            return;
        }
        let new_layout = self
            .layout_for_capacity(new_capacity)
            .expect("column layout overflow");
        unsafe {
            let new_data = if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                let old_layout = self
                    .layout_for_capacity(self.capacity)
                    .expect("old layout must be valid");
                alloc::realloc(self.data, old_layout, new_layout.size())
            };
            assert!(!new_data.is_null(), "allocation failed");
            self.data = new_data;
        }
        self.capacity = new_capacity;
    }

    #[inline]
    fn ptr_at(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len);
        if self.item_size == 0 {
            // ZST -- dangling but aligned.
            return self.item_align as *mut u8;
        }
        unsafe { self.data.add(index * self.item_size) }
    }

    /// Checked pointer to the element at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<NonNull<u8>> {
        if index >= self.len {
            return None;
        }
        NonNull::new(self.ptr_at(index))
    }

    /// Append a value by copying its bytes. Ownership moves into the column.
    ///
    /// # Safety
    ///
    /// `value_ptr` must point to a valid, initialized value of this column's
    /// component type; the caller must not drop the source afterwards.
    pub unsafe fn push_raw(&mut self, value_ptr: *const u8) {
        self.grow_if_needed();
        if self.item_size > 0 {
            let dst = self.data.add(self.len * self.item_size);
            ptr::copy_nonoverlapping(value_ptr, dst, self.item_size);
        }
        self.len += 1;
    }

    /// Drop the value at `index` and copy `value_ptr` over it.
    ///
    /// # Safety
    ///
    /// `index < len`; `value_ptr` as in [`push_raw`](Self::push_raw).
    pub unsafe fn replace(&mut self, index: usize, value_ptr: *const u8) {
        let slot = self.ptr_at(index);
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(slot);
        }
        if self.item_size > 0 {
            ptr::copy_nonoverlapping(value_ptr, slot, self.item_size);
        }
    }

    /// Swap-remove the value at `index`, moving it into a fresh
    /// [`ErasedValue`]. The last value back-fills the gap.
    ///
    /// # Safety
    ///
    /// `index < len`.
    pub unsafe fn take_swap_remove(&mut self, index: usize) -> ErasedValue {
        debug_assert!(index < self.len);
        let last = self.len - 1;
        let out = if self.item_size > 0 {
            let layout = Layout::from_size_align(self.item_size, self.item_align)
                .expect("column item layout must be valid");
            let buffer = alloc::alloc(layout);
            assert!(!buffer.is_null(), "allocation failed");
            ptr::copy_nonoverlapping(self.ptr_at(index), buffer, self.item_size);
            if index != last {
                ptr::copy_nonoverlapping(self.ptr_at(last), self.ptr_at(index), self.item_size);
            }
            buffer
        } else {
            ptr::null_mut()
        };
        self.len -= 1;
        ErasedValue::from_raw(out, self.item_size, self.item_align, self.drop_fn)
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        unsafe {
            if let Some(drop_fn) = self.drop_fn {
                for index in 0..self.len {
                    drop_fn(self.ptr_at(index));
                }
            }
            if self.item_size > 0 && self.capacity > 0 {
                let layout = self
                    .layout_for_capacity(self.capacity)
                    .expect("layout must be valid");
                alloc::dealloc(self.data, layout);
            }
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("item_size", &self.item_size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Column-major storage for every entity of one archetype.
///
/// The `entities` vector is the always-present component-0 column; the
/// remaining columns are stored sorted by [`ComponentId`] so lookups can
/// binary-search.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    archetype: Archetype,
    /// Sorted by `ComponentId`, excluding [`ComponentId::ENTITY`].
    columns: Vec<(ComponentId, Column)>,
    entities: Vec<Entity>,
}

impl Table {
    /// Build an empty table for `archetype`, decoding its column set against
    /// the registry.
    pub(crate) fn new(id: TableId, archetype: Archetype, registry: &ComponentRegistry) -> Table {
        let columns = archetype
            .decode(registry)
            .into_iter()
            .filter(|component| *component != ComponentId::ENTITY)
            .map(|component| {
                let info = registry
                    .info(component)
                    .expect("decoded component must be registered");
                (component, Column::new(info))
            })
            .collect();
        Table {
            id,
            archetype,
            columns,
            entities: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TableId {
        self.id
    }

    #[inline]
    pub fn archetype(&self) -> Archetype {
        self.archetype
    }

    /// Number of resident rows (the length of every column).
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The entity column.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// The entity at `row`, or `None` past the end.
    #[inline]
    pub fn entity(&self, row: usize) -> Option<Entity> {
        self.entities.get(row).copied()
    }

    fn column_index(&self, component: ComponentId) -> Option<usize> {
        self.columns
            .binary_search_by_key(&component, |(id, _)| *id)
            .ok()
    }

    /// Whether a column for `component` exists (the entity column always
    /// does).
    #[inline]
    pub fn has_column(&self, component: ComponentId) -> bool {
        component == ComponentId::ENTITY || self.column_index(component).is_some()
    }

    /// The length of one column, `None` when the column is absent. Always
    /// equal to [`len`](Self::len) for present columns.
    pub fn column_len(&self, component: ComponentId) -> Option<usize> {
        if component == ComponentId::ENTITY {
            return Some(self.entities.len());
        }
        self.column(component).map(Column::len)
    }

    pub(crate) fn column(&self, component: ComponentId) -> Option<&Column> {
        self.column_index(component)
            .map(|index| &self.columns[index].1)
    }

    fn column_mut(&mut self, component: ComponentId) -> Option<&mut Column> {
        self.column_index(component)
            .map(|index| &mut self.columns[index].1)
    }

    /// Checked pointer to the value at (`component`, `row`). Dereferencing
    /// is up to the caller, who must know the column's concrete type.
    pub(crate) fn get_untyped(&self, component: ComponentId, row: usize) -> Option<NonNull<u8>> {
        self.column(component)?.get(row)
    }

    /// Typed read of the value at (`component`, `row`).
    ///
    /// # Safety
    ///
    /// `T` must be the type the registry issued `component` for.
    pub(crate) unsafe fn get<T: Component>(&self, component: ComponentId, row: usize) -> Option<&T> {
        self.get_untyped(component, row)
            .map(|ptr| &*(ptr.as_ptr() as *const T))
    }

    /// Typed mutable access to the value at (`component`, `row`).
    ///
    /// # Safety
    ///
    /// As [`get`](Self::get); exclusivity comes from `&mut self`.
    pub(crate) unsafe fn get_mut<T: Component>(
        &mut self,
        component: ComponentId,
        row: usize,
    ) -> Option<&mut T> {
        self.get_untyped(component, row)
            .map(|ptr| &mut *(ptr.as_ptr() as *mut T))
    }

    /// Overwrite values at `row` in place (the same-table move).
    ///
    /// Values whose type has no column here are silently discarded; the
    /// destination archetype already decided what belongs. Out-of-range rows
    /// are a no-op.
    pub(crate) fn write_row(&mut self, row: usize, values: Vec<(ComponentId, ErasedValue)>) {
        if row >= self.entities.len() {
            return;
        }
        for (component, mut value) in values {
            if let Some(column) = self.column_mut(component) {
                unsafe {
                    column.replace(row, value.as_ptr());
                }
                value.mark_moved();
            }
        }
    }

    /// Swap-remove `row`, returning every column's value plus the entity that
    /// was back-filled into `row` (if any). Out-of-range rows are a no-op.
    pub(crate) fn extract_row(
        &mut self,
        row: usize,
    ) -> (Vec<(ComponentId, ErasedValue)>, Option<Entity>) {
        if row >= self.entities.len() {
            return (Vec::new(), None);
        }
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        let back_filled = (row < last).then(|| self.entities[row]);

        let mut values = Vec::with_capacity(self.columns.len());
        for (component, column) in &mut self.columns {
            let value = unsafe { column.take_swap_remove(row) };
            values.push((*component, value));
        }
        (values, back_filled)
    }

    /// Append one row. Every sized column must find a value in `values`;
    /// zero-sized columns may be appended without one (tag insertion).
    /// Values with no matching column are silently discarded.
    ///
    /// Returns the new row index.
    ///
    /// # Panics
    ///
    /// Panics when a sized column has no staged value. The entity manager's
    /// staging API cannot produce that state.
    pub(crate) fn push_row(
        &mut self,
        entity: Entity,
        mut values: Vec<(ComponentId, ErasedValue)>,
    ) -> u32 {
        let row = self.entities.len();
        self.entities.push(entity);
        for (component, column) in self.columns.iter_mut() {
            let component = *component;
            match values.iter_mut().find(|(id, _)| *id == component) {
                Some((_, value)) => {
                    unsafe {
                        column.push_raw(value.as_ptr());
                    }
                    value.mark_moved();
                }
                None if column.item_size() == 0 => unsafe {
                    column.push_raw(ptr::null());
                },
                None => panic!(
                    "no staged value for sized component {component:?} while moving {entity} \
                     into table {:?}",
                    self.id
                ),
            }
        }
        // Leftover values belong to columns this archetype lacks; dropping
        // the vec releases them.
        row as u32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
