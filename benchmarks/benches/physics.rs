//! Physics engine benchmarks (criterion - wall-clock time).
//!
//! Run all:    cargo bench --manifest-path benchmarks/Cargo.toml --bench physics
//! Filter:     cargo bench --manifest-path benchmarks/Cargo.toml --bench physics -- bvh

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Quat, Vec3};
use impetus::physics::narrowphase::{NarrowPhase, PosedShape};
use impetus::physics::transform::Transform;
use impetus::{ColliderShape, LayerFilter, Ray};
use impetus_bench::*;

// ---------------------------------------------------------------------------
// Broadphase
// ---------------------------------------------------------------------------

fn bench_bvh(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("bvh/insert");
        for &n in &[100, 500, 1000, 2000] {
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
                b.iter(|| setup_bvh(n, 1.5).expect("bvh setup"));
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("bvh/detect");
        let filter = LayerFilter::all();
        for &n in &[100, 500, 1000, 2000] {
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
                b.iter_batched(
                    || setup_bvh(n, 0.9).expect("bvh setup"),
                    |(colliders, mut bvh)| bvh.detect(&colliders, &filter),
                    criterion::BatchSize::LargeInput,
                );
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("bvh/ray_cast");
        for &n in &[100, 1000] {
            let (_, bvh) = setup_bvh(n, 1.5).expect("bvh setup");
            let ray = Ray::new(Vec3::splat(-5.0), Vec3::ONE).expect("ray");
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
                b.iter(|| bvh.ray_cast(&ray, 1000.0, |_, limit| Some(limit * 0.5)));
            });
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Narrowphase
// ---------------------------------------------------------------------------

fn bench_narrowphase(c: &mut Criterion) {
    let narrowphase = NarrowPhase::default();
    let unit_box = ColliderShape::Box {
        half_extents: Vec3::splat(1.0),
    };
    let sphere = ColliderShape::Sphere { radius: 1.0 };
    let capsule = ColliderShape::Capsule {
        radius: 0.5,
        half_height: 1.0,
    };
    let origin = Transform::identity();

    let mut group = c.benchmark_group("narrowphase/gjk_epa");

    let hit = Transform::from_position(Vec3::new(1.5, 0.0, 0.0));
    group.bench_function("box_box_face", |b| {
        let (a, bb) = (PosedShape::new(&unit_box, &origin), PosedShape::new(&unit_box, &hit));
        b.iter(|| narrowphase.detect(&a, &bb));
    });

    let rotated = Transform::from_position_rotation(
        Vec3::new(1.5, 0.3, 0.0),
        Quat::from_rotation_y(0.785) * Quat::from_rotation_x(0.4),
    );
    group.bench_function("box_box_rotated", |b| {
        let (a, bb) = (
            PosedShape::new(&unit_box, &origin),
            PosedShape::new(&unit_box, &rotated),
        );
        b.iter(|| narrowphase.detect(&a, &bb));
    });

    group.bench_function("capsule_box", |b| {
        let (a, bb) = (PosedShape::new(&capsule, &origin), PosedShape::new(&unit_box, &hit));
        b.iter(|| narrowphase.detect(&a, &bb));
    });

    let miss = Transform::from_position(Vec3::new(5.0, 0.0, 0.0));
    group.bench_function("box_sphere_separated", |b| {
        let (a, bb) = (PosedShape::new(&unit_box, &origin), PosedShape::new(&sphere, &miss));
        b.iter(|| narrowphase.detect(&a, &bb));
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline/step");
    group.sample_size(20);
    for &n in &[100, 500, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || setup_world(n).expect("world setup"),
                |mut world| run_steps(&mut world, 1),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();

    let mut group = c.benchmark_group("pipeline/settle");
    group.sample_size(10);
    group.bench_function("100_bodies_120_steps", |b| {
        b.iter_batched(
            || setup_world(100).expect("world setup"),
            |mut world| run_steps(&mut world, 120),
            criterion::BatchSize::LargeInput,
        );
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_bvh, bench_narrowphase, bench_pipeline);
criterion_main!(benches);
