//! Property tests: random sequences of staged operations must preserve the
//! world's storage invariants after every flush.

use proptest::prelude::*;
use tessella::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vel {
    dx: f32,
    dy: f32,
}

struct Marked;

/// Operations staged against the world. Indices are taken modulo the live
/// handle list at execution time.
#[derive(Debug, Clone)]
enum WorldOp {
    Spawn(f32, f32),
    SpawnWithVel(f32, f32, f32, f32),
    SpawnBare,
    Despawn(usize),
    InsertVel(usize, f32, f32),
    InsertMark(usize),
    RemoveVel(usize),
    Flush,
}

fn finite_f32() -> impl Strategy<Value = f32> {
    (-1_000_000i32..1_000_000i32).prop_map(|v| v as f32 * 0.01)
}

fn world_op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        (finite_f32(), finite_f32()).prop_map(|(x, y)| WorldOp::Spawn(x, y)),
        (finite_f32(), finite_f32(), finite_f32(), finite_f32())
            .prop_map(|(x, y, dx, dy)| WorldOp::SpawnWithVel(x, y, dx, dy)),
        Just(WorldOp::SpawnBare),
        (0..64usize).prop_map(WorldOp::Despawn),
        (0..64usize, finite_f32(), finite_f32())
            .prop_map(|(i, dx, dy)| WorldOp::InsertVel(i, dx, dy)),
        (0..64usize).prop_map(WorldOp::InsertMark),
        (0..64usize).prop_map(WorldOp::RemoveVel),
        Just(WorldOp::Flush),
    ]
}

/// The §8-style storage invariants, checked through the public API.
fn assert_invariants(world: &World) {
    let mut archetypes = Vec::new();
    let mut resident = 0usize;
    for table in world.tables().iter() {
        // Archetype uniqueness.
        assert!(!archetypes.contains(&table.archetype()));
        archetypes.push(table.archetype());

        // Column parity and archetype/column agreement.
        for component in table.archetype().iter() {
            assert!(table.has_column(component));
            assert_eq!(table.column_len(component), Some(table.len()));
        }

        // Location consistency.
        for (row, &entity) in table.entities().iter().enumerate() {
            let location = world.location(entity).expect("row entity must be current");
            assert_eq!(location.table_id, table.id());
            assert_eq!(location.row as usize, row);
        }
        resident += table.len();
    }
    assert_eq!(world.entity_count(), resident);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn random_ops_preserve_invariants(ops in prop::collection::vec(world_op_strategy(), 1..60)) {
        let mut world = World::new();
        // Handles we have spawned and not yet despawned.
        let mut live: Vec<Entity> = Vec::new();

        for op in ops {
            match op {
                WorldOp::Spawn(x, y) => {
                    let entity = world.spawn().insert(Pos { x, y }).id();
                    live.push(entity);
                }
                WorldOp::SpawnWithVel(x, y, dx, dy) => {
                    let entity = world
                        .spawn()
                        .insert(Pos { x, y })
                        .insert(Vel { dx, dy })
                        .id();
                    live.push(entity);
                }
                WorldOp::SpawnBare => {
                    live.push(world.spawn().id());
                }
                WorldOp::Despawn(index) => {
                    if !live.is_empty() {
                        let entity = live.remove(index % live.len());
                        world.despawn(entity).unwrap();
                    }
                }
                WorldOp::InsertVel(index, dx, dy) => {
                    if !live.is_empty() {
                        let entity = live[index % live.len()];
                        world.entity_mut(entity).insert(Vel { dx, dy });
                    }
                }
                WorldOp::InsertMark(index) => {
                    if !live.is_empty() {
                        let entity = live[index % live.len()];
                        world.entity_mut(entity).insert_tag::<Marked>();
                    }
                }
                WorldOp::RemoveVel(index) => {
                    if !live.is_empty() {
                        let entity = live[index % live.len()];
                        world.entity_mut(entity).remove::<Vel>();
                    }
                }
                WorldOp::Flush => {
                    world.flush();
                    assert_invariants(&world);
                }
            }
        }

        world.flush();
        assert_invariants(&world);

        // Every handle we kept is alive; every despawned one is gone.
        prop_assert_eq!(world.entity_count(), live.len());
        for entity in &live {
            prop_assert!(world.is_alive(*entity));
        }
    }

    #[test]
    fn query_counts_match_tracked_state(ops in prop::collection::vec(world_op_strategy(), 1..40)) {
        let mut world = World::new();
        let mut live: Vec<Entity> = Vec::new();

        for op in ops {
            match op {
                WorldOp::Spawn(x, y) => live.push(world.spawn().insert(Pos { x, y }).id()),
                WorldOp::SpawnWithVel(x, y, dx, dy) => {
                    live.push(world.spawn().insert(Pos { x, y }).insert(Vel { dx, dy }).id())
                }
                WorldOp::SpawnBare => live.push(world.spawn().id()),
                WorldOp::Despawn(index) => {
                    if !live.is_empty() {
                        let entity = live.remove(index % live.len());
                        world.despawn(entity).unwrap();
                    }
                }
                WorldOp::InsertVel(index, dx, dy) => {
                    if !live.is_empty() {
                        world
                            .entity_mut(live[index % live.len()])
                            .insert(Vel { dx, dy });
                    }
                }
                WorldOp::InsertMark(index) => {
                    if !live.is_empty() {
                        world.entity_mut(live[index % live.len()]).insert_tag::<Marked>();
                    }
                }
                WorldOp::RemoveVel(index) => {
                    if !live.is_empty() {
                        world.entity_mut(live[index % live.len()]).remove::<Vel>();
                    }
                }
                WorldOp::Flush => {
                    world.flush();
                }
            }
        }
        world.flush();

        // Model the expected component sets from the flushed world itself,
        // then cross-check query results against per-entity `has`.
        let mut with_vel = world.query::<(Entity, &Vel)>();
        let vel_entities: Vec<Entity> = with_vel.iter(&world).map(|(entity, _)| entity).collect();
        for entity in &live {
            let expected = world.has::<Vel>(*entity);
            prop_assert_eq!(vel_entities.contains(entity), expected);
        }
        prop_assert!(vel_entities.iter().all(|entity| live.contains(entity)));

        let mut without_vel = world.query_filtered::<Entity, Without<Vel>>();
        let still: Vec<Entity> = without_vel.iter(&world).collect();
        prop_assert_eq!(still.len() + vel_entities.len(), live.len());
        for entity in &still {
            prop_assert!(!world.has::<Vel>(*entity));
        }
    }
}
