//! Query filters: `With` / `Without` composed with tuples (and) and [`Or`].
//!
//! A filter rewrites a list of `(require, forbid)` archetype pairs. The list
//! is a disjunction: a table matches when any pair accepts its archetype.
//! Tuples of filters apply left to right; [`Or`] forks the list, producing
//! the disjunctive normal form.

use std::marker::PhantomData;

use crate::archetype::Archetype;
use crate::component::{Component, ComponentId, ComponentRegistry};

// ---------------------------------------------------------------------------
// FilterPair
// ---------------------------------------------------------------------------

/// One conjunction of a query's table filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPair {
    /// Every bit here must be present in a matching archetype.
    pub require: Archetype,
    /// No bit here may be present in a matching archetype.
    pub forbid: Archetype,
}

impl FilterPair {
    /// Whether `archetype` satisfies this conjunction.
    #[inline]
    pub fn matches(&self, archetype: Archetype) -> bool {
        archetype.is_superset_of(self.require) && !archetype.intersects(self.forbid)
    }

    /// A pair whose require and forbid sets overlap can never match.
    #[inline]
    pub fn is_satisfiable(&self) -> bool {
        !self.require.intersects(self.forbid)
    }
}

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// A type-level filter expression over archetype pairs.
pub trait QueryFilter {
    /// Rewrite `pairs`, registering any referenced component types.
    fn apply(components: &mut ComponentRegistry, pairs: Vec<FilterPair>) -> Vec<FilterPair>;
}

/// Requires the component `T` to be present.
pub struct With<T: Component>(PhantomData<fn() -> T>);

/// Requires the component `T` to be absent.
pub struct Without<T: Component>(PhantomData<fn() -> T>);

/// Matches when any branch of the tuple `T` matches.
pub struct Or<T>(PhantomData<fn() -> T>);

impl<T: Component> QueryFilter for With<T> {
    fn apply(components: &mut ComponentRegistry, mut pairs: Vec<FilterPair>) -> Vec<FilterPair> {
        let component = components.register::<T>();
        if component == ComponentId::ENTITY {
            // The Entity bit is part of every base; requiring it is a no-op.
            return pairs;
        }
        for pair in &mut pairs {
            pair.require = pair.require.with(component);
        }
        pairs
    }
}

impl<T: Component> QueryFilter for Without<T> {
    fn apply(components: &mut ComponentRegistry, mut pairs: Vec<FilterPair>) -> Vec<FilterPair> {
        let component = components.register::<T>();
        if component == ComponentId::ENTITY {
            // Forbidding the Entity bit would make every pair unsatisfiable.
            return pairs;
        }
        for pair in &mut pairs {
            pair.forbid = pair.forbid.with(component);
        }
        pairs
    }
}

impl QueryFilter for () {
    fn apply(_components: &mut ComponentRegistry, pairs: Vec<FilterPair>) -> Vec<FilterPair> {
        pairs
    }
}

macro_rules! impl_filter_tuple {
    ($($name:ident),+) => {
        impl<$($name: QueryFilter),+> QueryFilter for ($($name,)+) {
            fn apply(
                components: &mut ComponentRegistry,
                pairs: Vec<FilterPair>,
            ) -> Vec<FilterPair> {
                $(let pairs = $name::apply(components, pairs);)+
                pairs
            }
        }

        impl<$($name: QueryFilter),+> QueryFilter for Or<($($name,)+)> {
            fn apply(
                components: &mut ComponentRegistry,
                pairs: Vec<FilterPair>,
            ) -> Vec<FilterPair> {
                let mut result = Vec::new();
                $(result.extend($name::apply(components, pairs.clone()));)+
                result
            }
        }
    };
}

impl_filter_tuple!(A);
impl_filter_tuple!(A, B);
impl_filter_tuple!(A, B, C);
impl_filter_tuple!(A, B, C, D);

/// Debug-check that at least one pair can match some archetype. Queries call
/// this after construction: an unsatisfiable filter is a developer error.
pub(crate) fn check_satisfiable(pairs: &[FilterPair]) {
    if pairs.iter().any(FilterPair::is_satisfiable) {
        return;
    }
    if cfg!(debug_assertions) {
        panic!("query filter is unsatisfiable: every (require, forbid) pair overlaps");
    } else {
        tracing::warn!("query filter is unsatisfiable: every (require, forbid) pair overlaps");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
