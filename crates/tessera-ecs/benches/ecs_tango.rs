//! ECS benchmarks using tango-bench for paired comparison testing.

use std::hint::black_box;

use tango_bench::{IntoBenchmarks, benchmark_fn, tango_benchmarks, tango_main};
use tessera_ecs::{Entity, World};

#[derive(Clone, Copy, Default)]
struct Position {
    x: f32,
    y: f32,
}

fn populated(count: usize) -> (World, Vec<Entity>) {
    let mut world = World::new();
    let tag = world.entity_named("Tag");
    let entities = (0..count)
        .map(|i| {
            let e = world.entity();
            world
                .set(e, Position { x: i as f32, y: 0.0 })
                .unwrap();
            if i % 2 == 0 {
                world.add_id(e, tag).unwrap();
            }
            e
        })
        .collect();
    (world, entities)
}

fn entity_benchmarks() -> impl IntoBenchmarks {
    [
        benchmark_fn("entity/1000", |b| {
            b.iter(|| {
                let mut world = World::new();
                for _ in 0..1000 {
                    black_box(world.entity());
                }
            })
        }),
        benchmark_fn("entity_with_component/1000", |b| {
            b.iter(|| {
                let mut world = World::new();
                for i in 0..1000 {
                    let e = world.entity();
                    world.set(e, Position { x: i as f32, y: 0.0 }).unwrap();
                }
            })
        }),
        benchmark_fn("delete/1000", |b| {
            b.iter(|| {
                let (mut world, entities) = populated(1000);
                for entity in entities {
                    world.delete(entity).unwrap();
                }
            })
        }),
    ]
}

fn id_benchmarks() -> impl IntoBenchmarks {
    [
        benchmark_fn("add_remove_tag/1000", |b| {
            let (mut world, entities) = populated(1000);
            let other = world.entity_named("Other");
            b.iter(|| {
                for &entity in &entities {
                    world.add_id(entity, other).unwrap();
                }
                for &entity in &entities {
                    world.remove_id(entity, other).unwrap();
                }
            })
        }),
        benchmark_fn("get_component/1000", |b| {
            let (world, entities) = populated(1000);
            b.iter(|| {
                for &entity in &entities {
                    black_box(world.get::<Position>(entity));
                }
            })
        }),
        benchmark_fn("deferred_add/1000", |b| {
            let (mut world, entities) = populated(1000);
            let other = world.entity_named("Other");
            b.iter(|| {
                world.defer_begin();
                for &entity in &entities {
                    world.add_id(entity, other).unwrap();
                    world.remove_id(entity, other).unwrap();
                }
                black_box(world.defer_end());
            })
        }),
    ]
}

fn rule_benchmarks() -> impl IntoBenchmarks {
    [
        benchmark_fn("rule_compile", |b| {
            let (world, _) = populated(10);
            b.iter(|| black_box(world.query("Position, !Tag").unwrap()))
        }),
        benchmark_fn("rule_iter/1000", |b| {
            let (world, _) = populated(1000);
            let rule = world.query("Position, !Tag").unwrap();
            b.iter(|| {
                let mut sum = 0.0;
                for result in rule.iter(&world) {
                    if let Some(positions) = result.field::<Position>(0) {
                        sum += positions.iter().map(|p| p.x).sum::<f32>();
                    }
                }
                black_box(sum)
            })
        }),
    ]
}

tango_benchmarks!(entity_benchmarks(), id_benchmarks(), rule_benchmarks());
tango_main!();
