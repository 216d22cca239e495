//! Property-based tests for the spatial lock grid.
//!
//! A grid cell has at most one owner, guards release exactly what they
//! took, and concurrent guards never share a grid cell.

use std::sync::Barrier;

use proptest::prelude::*;
use tetmesh::concurrency::lock_grid::LockGrid;
use tetmesh::prelude::*;

fn unit_grid(cells_per_axis: usize) -> LockGrid {
    LockGrid::new(Bbox3::new([0.0; 3], [1.0; 3]), cells_per_axis)
}

proptest! {
    /// Points outside the box are clamped to a border cell.
    #[test]
    fn prop_grid_index_is_in_range(
        p in prop::array::uniform3(-2.0f64..3.0),
        n in 1usize..12,
    ) {
        let grid = unit_grid(n);
        prop_assert_eq!(grid.len(), n * n * n);
        prop_assert!(grid.grid_index(&Point::new(p)) < grid.len());
    }

    /// Two owners never hold the same grid cell, and dropping a guard frees
    /// everything it took.
    #[test]
    fn prop_guards_are_exclusive(
        first in prop::collection::vec(prop::array::uniform3(0.0f64..1.0), 1..16),
        second in prop::collection::vec(prop::array::uniform3(0.0f64..1.0), 1..16),
    ) {
        let grid = unit_grid(4);
        let mut a = grid.guard(1);
        for p in &first {
            prop_assert!(a.try_lock_point(&Point::new(*p)));
        }
        let mut b = grid.guard(2);
        for p in &second {
            let index = grid.grid_index(&Point::new(*p));
            let locked = b.try_lock_point(&Point::new(*p));
            prop_assert_eq!(locked, !a.held().contains(&index));
        }
        for &index in a.held() {
            prop_assert_eq!(grid.owner_of(index), Some(1));
        }
        for &index in b.held() {
            prop_assert_eq!(grid.owner_of(index), Some(2));
        }
        prop_assert_eq!(grid.locked_count(), a.held().len() + b.held().len());

        drop(a);
        drop(b);
        prop_assert_eq!(grid.locked_count(), 0);
    }
}

#[test]
fn test_concurrent_guards_never_share_a_cell() {
    let grid = unit_grid(3);
    let workers = 4;
    let barrier = Barrier::new(workers);
    std::thread::scope(|scope| {
        for owner in 1..=workers {
            let grid = &grid;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                for round in 0..200 {
                    let mut guard = grid.guard(owner);
                    let start = (owner * 7 + round) % grid.len();
                    let taken = (0..4).all(|k| guard.try_lock_cell((start + k) % grid.len()));
                    if taken {
                        for &index in guard.held() {
                            assert_eq!(grid.owner_of(index), Some(owner));
                        }
                    }
                }
            });
        }
    });
    assert_eq!(grid.locked_count(), 0);
}
