//! Refinement benchmarks on the unit ball
//!
//! Measures a full `refine_mesh` run, sequential and parallel, for a few
//! mesh sizes, plus raw Delaunay insertion of random points for reference.

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use tetmesh::prelude::*;

type LabelFn = fn(&Point) -> SubdomainIndex;

fn unit_ball(p: &Point) -> SubdomainIndex {
    SubdomainIndex(u32::from(p.squared_distance(&Point::ORIGIN) < 1.0))
}

fn ball() -> LabeledFunctionDomain<LabelFn> {
    LabeledFunctionDomain::new(unit_ball as LabelFn, Bbox3::new([-2.0; 3], [2.0; 3]))
}

fn criteria(size: f64) -> MeshCriteria {
    MeshCriteria::new(
        MeshFacetCriteria {
            angle_bound: 25.0,
            size_bound: size,
            distance_bound: size / 4.0,
            ..MeshFacetCriteria::default()
        },
        MeshCellCriteria {
            radius_edge_bound: 3.0,
            size_bound: size,
        },
    )
}

fn generate_random_points(n: usize, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Point::new([0; 3].map(|_| rng.random_range(-1.0..1.0))))
        .collect()
}

/// Full refinement of the ball for decreasing size bounds
fn benchmark_refine_sphere(c: &mut Criterion) {
    let domain = ball();
    let mut group = c.benchmark_group("refine_sphere");
    group.sample_size(10);

    for &size in &[0.5, 0.3, 0.2] {
        let criteria = criteria(size);
        for (name, config) in [
            ("sequential", MesherConfig::default()),
            (
                "parallel",
                MesherConfig {
                    concurrency: ConcurrencyMode::Parallel,
                    ..MesherConfig::default()
                },
            ),
        ] {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter_with_setup(
                    || MeshComplex::with_initial_points(&domain, Some(20)).unwrap(),
                    |mut complex| {
                        let mut mesher = Mesher::new(
                            &mut complex,
                            &domain,
                            &criteria.facet,
                            &criteria.cell,
                            config.clone(),
                        )
                        .unwrap();
                        black_box(mesher.refine_mesh().unwrap());
                        drop(mesher);
                        black_box(complex.number_of_cells())
                    },
                );
            });
        }
    }
    group.finish();
}

/// Incremental Delaunay insertion of random points in the unit cube
fn benchmark_delaunay_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("delaunay_insertion");
    for &n in &[100_usize, 1_000, 5_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("random_points", n), &n, |b, &n| {
            b.iter_with_setup(
                || generate_random_points(n, 42),
                |points| black_box(Triangulation::from_points(&points).unwrap()),
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_refine_sphere,
    benchmark_delaunay_insertion
);
criterion_main!(benches);
