//! Integration tests for tables, the table graph and deferred stages

use tessera_ecs::{
    Constraint, EcsError, Entity, Id, RelationTraits, TableId, World, WorldConfig,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Health(u32);

#[derive(Debug, Default, Clone, PartialEq)]
struct Name(String);

/// Every table keeps columns in step with its entities, and every live
/// entity's record points back at its own row.
fn check_invariants(world: &World) {
    for table in world.tables() {
        for column in table.columns() {
            assert_eq!(column.len(), table.len(), "column out of step in {table:?}");
        }
        for (row, &entity) in table.entities().iter().enumerate() {
            let record = world.record(entity).expect("entity in table has no record");
            assert_eq!(record.table, table.id());
            assert_eq!(record.row as usize, row);
        }
    }
}

// ============================================================================
// Tables
// ============================================================================

#[test]
fn test_many_entities_stay_consistent() {
    init_tracing();
    let mut world = World::new();
    let tag = world.entity_named("Tag");

    let entities: Vec<_> = (0..100u32)
        .map(|i| {
            let e = world.entity();
            world.set(e, Health(i)).unwrap();
            if i % 3 == 0 {
                world.add_id(e, tag).unwrap();
            }
            e
        })
        .collect();
    check_invariants(&world);

    // swap-removes from the middle of tables
    for &e in entities.iter().step_by(7) {
        world.delete(e).unwrap();
    }
    for &e in entities.iter().skip(1).step_by(5) {
        if world.is_alive(e) {
            let _ = world.remove_id(e, tag);
            world.set(e, Name(format!("e{}", e.index()))).unwrap();
        }
    }
    check_invariants(&world);

    for (i, &e) in entities.iter().enumerate() {
        if world.is_alive(e) {
            assert_eq!(world.get::<Health>(e), Some(&Health(i as u32)));
        }
    }
}

#[test]
fn test_traverse_is_memoized() {
    let mut world = World::new();
    let a = Id::from(world.entity());
    let b = Id::from(world.entity());

    let (with_a, diff) = world.traverse_add(TableId::ROOT, a).unwrap();
    assert_eq!(diff.added.as_slice(), &[a]);
    let (again, _) = world.traverse_add(TableId::ROOT, a).unwrap();
    assert_eq!(with_a, again);

    // adding an id already present is a no-op
    let (same, diff) = world.traverse_add(with_a, a).unwrap();
    assert_eq!(same, with_a);
    assert!(diff.is_empty());

    let (with_ab, _) = world.traverse_add(with_a, b).unwrap();
    let (with_b, _) = world.traverse_add(TableId::ROOT, b).unwrap();
    let (with_ba, _) = world.traverse_add(with_b, a).unwrap();
    assert_eq!(with_ab, with_ba);

    let (back, diff) = world.traverse_remove(with_ab, b).unwrap();
    assert_eq!(back, with_a);
    assert_eq!(diff.removed.as_slice(), &[b]);
    let (root, _) = world.traverse_remove(with_a, a).unwrap();
    assert_eq!(root, TableId::ROOT);
}

#[test]
fn test_wildcard_records() {
    let mut world = World::new();
    let likes = world.entity_named("Likes");
    let apples = world.entity_named("Apples");
    let e = world.entity();
    world.add_pair(e, likes, apples).unwrap();

    let table = world.table_of(e).unwrap().id();
    for pattern in [
        Id::pair(likes, apples),
        Id::pair(likes, Entity::WILDCARD),
        Id::pair(Entity::WILDCARD, apples),
        Id::pair(Entity::WILDCARD, Entity::WILDCARD),
    ] {
        let record = world.id_record(pattern).unwrap();
        assert!(
            record.tables().iter().any(|tr| tr.table == table),
            "{pattern} not indexed"
        );
    }
    assert!(world.has_id(e, Id::pair(likes, Entity::WILDCARD)));
    assert!(!world.has_id(e, Entity::WILDCARD));
}

#[test]
fn test_delete_empty_tables() {
    let mut world = World::new();
    let tag = world.entity_named("Tag");
    let e = world.entity();
    world.add_id(e, tag).unwrap();
    let table = world.table_of(e).unwrap().id();
    world.remove_id(e, tag).unwrap();

    assert!(world.delete_empty_tables() >= 1);
    assert!(world.tables().all(|t| t.id() != table));
    assert!(world.tables().any(|t| t.id() == TableId::ROOT));
    assert!(world.id_record(tag).is_none_or(|r| r.table_count() == 0));

    // table is recreated on demand
    world.add_id(e, tag).unwrap();
    assert!(world.has_id(e, tag));
    check_invariants(&world);
}

// ============================================================================
// Constraints and cleanup
// ============================================================================

#[test]
fn test_exclusive_relation() {
    let mut world = World::new();
    let state = world.entity_named("State");
    let idle = world.entity_named("Idle");
    let busy = world.entity_named("Busy");
    world.set_traits(state, RelationTraits::EXCLUSIVE).unwrap();

    let e = world.entity();
    world.add_pair(e, state, idle).unwrap();
    let err = world.add_pair(e, state, busy).unwrap_err();
    assert!(matches!(
        err,
        EcsError::ConstraintViolation {
            kind: Constraint::Exclusive,
            ..
        }
    ));

    world.remove_pair(e, state, idle).unwrap();
    world.add_pair(e, state, busy).unwrap();
    assert_eq!(world.target(e, state), Some(busy));
}

#[test]
fn test_acyclic_child_of() {
    let mut world = World::new();
    let a = world.entity();
    let b = world.entity();
    let c = world.entity();
    world.add_pair(b, Entity::CHILD_OF, a).unwrap();
    world.add_pair(c, Entity::CHILD_OF, b).unwrap();

    let err = world.add_pair(a, Entity::CHILD_OF, c).unwrap_err();
    assert!(matches!(
        err,
        EcsError::ConstraintViolation {
            kind: Constraint::Acyclic,
            ..
        }
    ));
}

#[test]
fn test_one_of() {
    let mut world = World::new();
    let color = world.entity_named("Color");
    let red = world.entity_named("Red");
    let square = world.entity_named("Square");
    world.add_pair(red, Entity::CHILD_OF, color).unwrap();
    world.set_one_of(color, color).unwrap();

    let e = world.entity();
    world.add_pair(e, color, red).unwrap();
    let err = world.add_pair(e, color, square).unwrap_err();
    assert!(matches!(
        err,
        EcsError::ConstraintViolation {
            kind: Constraint::OneOf,
            ..
        }
    ));
}

#[test]
fn test_delete_cleans_references() {
    init_tracing();
    let mut world = World::new();
    let likes = world.entity_named("Likes");
    let apples = world.entity_named("Apples");
    let tag = world.entity_named("Tag");

    let e = world.entity();
    world.add_id(e, tag).unwrap();
    world.add_pair(e, likes, apples).unwrap();

    world.delete(apples).unwrap();
    assert!(!world.is_alive(apples));
    assert!(world.is_alive(e));
    assert!(world.has_id(e, tag));
    assert!(!world.has_id(e, Id::pair(likes, Entity::WILDCARD)));
    assert_eq!(world.lookup("Apples"), None);

    world.delete(tag).unwrap();
    assert!(world.table_of(e).unwrap().ty().is_empty());
    check_invariants(&world);

    // recycled index gets a new generation
    let fresh = world.entity();
    assert_eq!(fresh.index(), tag.index());
    assert_ne!(fresh, tag);
    assert!(matches!(
        world.add_id(e, tag),
        Err(EcsError::InvalidId(_) | EcsError::StaleReference(_))
    ));
}

#[test]
fn test_delete_parent_deletes_children() {
    init_tracing();
    let mut world = World::new();
    let owns = world.entity_named("Owns");
    let ship = world.entity_named("Ship");
    let deck = world.entity_named("Deck");
    let cabin = world.entity_named("Cabin");
    let dock = world.entity_named("Dock");
    world.add_pair(deck, Entity::CHILD_OF, ship).unwrap();
    world.add_pair(cabin, Entity::CHILD_OF, deck).unwrap();
    world.add_pair(dock, owns, cabin).unwrap();
    world.set(cabin, Health(3)).unwrap();

    world.delete(ship).unwrap();

    for e in [ship, deck, cabin] {
        assert!(!world.is_alive(e));
    }
    assert_eq!(world.lookup("Cabin"), None);
    assert!(world.is_alive(dock));
    assert!(!world.has_id(dock, Id::pair(owns, Entity::WILDCARD)));

    // recycled ids do not inherit names
    let fresh = world.entity();
    assert_eq!(world.name(fresh), None);
    check_invariants(&world);
}

#[test]
fn test_stale_references() {
    let mut world = World::new();
    let e = world.entity();
    world.delete(e).unwrap();

    assert!(matches!(world.delete(e), Err(EcsError::StaleReference(_))));
    assert!(matches!(world.clear(e), Err(EcsError::StaleReference(_))));
    assert!(world.delete(Entity::CHILD_OF).is_err());
}

// ============================================================================
// Deferred stages
// ============================================================================

#[test]
fn test_deferred_set_and_delete() {
    let mut world = World::new();
    world.component::<Name>();
    let e = world.entity();

    world.defer_begin();
    world.set(e, Name("first".into())).unwrap();
    world.set(e, Name("second".into())).unwrap();
    assert!(!world.has::<Name>(e));
    world.defer_end();
    assert_eq!(world.get::<Name>(e), Some(&Name("second".into())));

    world.defer_begin();
    world.set(e, Name("third".into())).unwrap();
    world.delete(e).unwrap();
    assert!(world.is_alive(e));
    world.defer_end();
    assert!(!world.is_alive(e));
}

#[test]
fn test_stages_from_threads() {
    init_tracing();
    let mut world = World::with_config(WorldConfig::default().with_stage_count(4));
    world.component::<Health>();
    let tag = world.entity_named("Tag");
    let entities: Vec<_> = (0..64).map(|_| world.entity()).collect();

    world.readonly_begin();
    std::thread::scope(|scope| {
        for (i, chunk) in entities.chunks(16).enumerate() {
            let stage = world.stage(i);
            scope.spawn(move || {
                for &e in chunk {
                    stage.add_id(e, tag).unwrap();
                    stage.set(e, Health(e.index())).unwrap();
                }
            });
        }
    });
    assert!(entities.iter().all(|&e| !world.has_id(e, tag)));
    assert_eq!(world.stage(0).pending(), 32);

    // Add followed by Set on the same id keeps both
    assert_eq!(world.readonly_end(), 128);
    for &e in &entities {
        assert!(world.has_id(e, tag));
        assert_eq!(world.get::<Health>(e), Some(&Health(e.index())));
    }
    check_invariants(&world);
}

#[test]
fn test_failed_command_is_skipped() {
    let mut world = World::new();
    let state = world.entity_named("State");
    let a = world.entity();
    let b = world.entity();
    let tag = world.entity();
    world.set_traits(state, RelationTraits::EXCLUSIVE).unwrap();

    let e = world.entity();
    world.defer_begin();
    world.add_pair(e, state, a).unwrap();
    world.add_pair(e, state, b).unwrap();
    world.add_id(e, tag).unwrap();
    world.defer_end();

    assert!(world.has_pair(e, state, a));
    assert!(!world.has_pair(e, state, b));
    assert!(world.has_id(e, tag));
}
