//! Schedules: ordered lists of systems run against the world.
//!
//! A [`System`] is named work that receives exclusive world access. Systems
//! run strictly in registration order; the first error aborts the schedule
//! and later systems do not run. [`Schedule::prepare`] gives each system a
//! chance to resolve cached state (query states, resource handles) before
//! the first run; preparing twice replaces that state.

use std::fmt;

use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ScheduleLabel
// ---------------------------------------------------------------------------

/// Identifies a schedule on the world.
///
/// Four labels are pre-registered on every world; the set is open, any
/// `&'static str` names a schedule once added.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleLabel(pub &'static str);

impl ScheduleLabel {
    /// Runs once, before the first frame.
    pub const STARTUP: ScheduleLabel = ScheduleLabel("startup");
    pub const PRE_UPDATE: ScheduleLabel = ScheduleLabel("pre_update");
    pub const UPDATE: ScheduleLabel = ScheduleLabel("update");
    pub const POST_UPDATE: ScheduleLabel = ScheduleLabel("post_update");
}

impl fmt::Debug for ScheduleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScheduleLabel({})", self.0)
    }
}

impl fmt::Display for ScheduleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Named work executed by a schedule.
pub trait System: 'static {
    /// Unique name within a schedule; duplicate registration is rejected.
    fn name(&self) -> &str;

    /// Resolve cached state against the world. Called by
    /// [`Schedule::prepare`]; must be idempotent (a later call replaces the
    /// state of an earlier one).
    fn prepare(&mut self, _world: &mut World) -> Result<(), EcsError> {
        Ok(())
    }

    /// Execute against the world.
    fn run(&mut self, world: &mut World) -> Result<(), EcsError>;
}

/// A [`System`] wrapping a plain closure.
pub struct FunctionSystem<F> {
    name: &'static str,
    func: F,
}

impl<F> System for FunctionSystem<F>
where
    F: FnMut(&mut World) -> Result<(), EcsError> + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn run(&mut self, world: &mut World) -> Result<(), EcsError> {
        (self.func)(world)
    }
}

/// Wrap a closure into a named system.
///
/// ```
/// use tessella::prelude::*;
///
/// let mut world = World::new();
/// world
///     .add_system(ScheduleLabel::UPDATE, system("greet", |_world| Ok(())))
///     .unwrap();
/// ```
pub fn system<F>(name: &'static str, func: F) -> FunctionSystem<F>
where
    F: FnMut(&mut World) -> Result<(), EcsError> + 'static,
{
    FunctionSystem { name, func }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// An ordered list of systems.
#[derive(Default)]
pub struct Schedule {
    systems: Vec<Box<dyn System>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a system. Rejects a name that is already registered.
    pub fn add_system(&mut self, system: impl System) -> Result<&mut Self, EcsError> {
        if self.has_system(system.name()) {
            return Err(EcsError::DuplicateSystem {
                name: system.name().to_owned(),
            });
        }
        self.systems.push(Box::new(system));
        Ok(self)
    }

    /// Remove the system named `name`. Rejects unknown names.
    pub fn remove_system(&mut self, name: &str) -> Result<(), EcsError> {
        match self.systems.iter().position(|system| system.name() == name) {
            Some(index) => {
                self.systems.remove(index);
                Ok(())
            }
            None => Err(EcsError::UnknownSystem {
                name: name.to_owned(),
            }),
        }
    }

    pub fn has_system(&self, name: &str) -> bool {
        self.systems.iter().any(|system| system.name() == name)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Registered system names, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|system| system.name()).collect()
    }

    /// Prepare every system in order.
    pub fn prepare(&mut self, world: &mut World) -> Result<(), EcsError> {
        for system in &mut self.systems {
            system.prepare(world)?;
        }
        Ok(())
    }

    /// Run every system in order. The first error aborts the run; later
    /// systems do not execute and world state at that moment is preserved.
    pub fn run(&mut self, world: &mut World) -> Result<(), EcsError> {
        for system in &mut self.systems {
            tracing::trace!(system = system.name(), "running system");
            system.run(world)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("systems", &self.system_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn push_system(log: &Arc<Mutex<Vec<u32>>>, name: &'static str, value: u32) -> impl System {
        let log = Arc::clone(log);
        system(name, move |_world| {
            log.lock().unwrap().push(value);
            Ok(())
        })
    }

    #[test]
    fn systems_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system(push_system(&log, "a", 1)).unwrap();
        schedule.add_system(push_system(&log, "b", 2)).unwrap();
        schedule.add_system(push_system(&log, "c", 3)).unwrap();

        let mut world = World::new();
        schedule.run(&mut world).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_system_is_rejected() {
        let mut schedule = Schedule::new();
        schedule.add_system(system("tick", |_| Ok(()))).unwrap();
        let err = schedule.add_system(system("tick", |_| Ok(()))).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateSystem { .. }));
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn removing_unknown_system_is_rejected() {
        let mut schedule = Schedule::new();
        let err = schedule.remove_system("ghost").unwrap_err();
        assert!(matches!(err, EcsError::UnknownSystem { .. }));

        schedule.add_system(system("real", |_| Ok(()))).unwrap();
        assert!(schedule.has_system("real"));
        schedule.remove_system("real").unwrap();
        assert!(!schedule.has_system("real"));
    }

    #[test]
    fn error_aborts_remaining_systems() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system(push_system(&log, "first", 1)).unwrap();
        schedule
            .add_system(system("failing", |_| Err(EcsError::Message("boom".into()))))
            .unwrap();
        schedule.add_system(push_system(&log, "last", 3)).unwrap();

        let mut world = World::new();
        let err = schedule.run(&mut world).unwrap_err();
        assert!(matches!(err, EcsError::Message(message) if message == "boom"));
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }
}
