//! Property-based tests for incremental Delaunay insertion.
//!
//! After any sequence of insertions the triangulation is structurally
//! valid, empty-sphere Delaunay, and holds exactly the distinct points
//! inserted.

use proptest::prelude::*;
use tetmesh::core::algorithms::locate::ConflictError;
use tetmesh::prelude::*;

// =============================================================================
// STRATEGIES
// =============================================================================

fn point_strategy() -> impl Strategy<Value = Point> {
    prop::array::uniform3(-10.0f64..10.0).prop_map(Point::new)
}

/// Random points followed by repeats of some of them.
fn points_with_repeats() -> impl Strategy<Value = Vec<Point>> {
    prop::collection::vec(point_strategy(), 5..30).prop_flat_map(|points| {
        let n = points.len();
        prop::collection::vec(0..n, 1..10).prop_map(move |repeats| {
            let mut all = points.clone();
            all.extend(repeats.iter().map(|&i| points[i]));
            all
        })
    })
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random points give a valid Delaunay triangulation.
    #[test]
    fn prop_random_insertions_stay_delaunay(
        points in prop::collection::vec(point_strategy(), 5..40)
    ) {
        let tr = Triangulation::from_points(&points).unwrap();
        prop_assert!(tr.validate().is_ok());
        prop_assert!(tr.is_delaunay());
        prop_assert_eq!(tr.number_of_vertices(), points.len());
        prop_assert_eq!(tr.dimension(), 3);
    }

    /// Duplicates are rejected with the existing vertex and leave the
    /// triangulation unchanged.
    #[test]
    fn prop_duplicate_insertions_are_rejected(points in points_with_repeats()) {
        let mut tr = Triangulation::new();
        let mut distinct: Vec<Point> = Vec::new();
        for p in &points {
            match tr.insert(*p) {
                Ok(outcome) => {
                    prop_assert!(!distinct.contains(p));
                    prop_assert_eq!(tr.point(outcome.vertex), Some(p));
                    distinct.push(*p);
                }
                Err(InsertionError::ConflictRegion(ConflictError::DuplicateVertex { vertex })) => {
                    prop_assert_eq!(tr.point(vertex), Some(p));
                }
                Err(e) => prop_assert!(false, "unexpected insertion error: {e}"),
            }
        }
        prop_assert_eq!(tr.number_of_vertices(), distinct.len());
        prop_assert!(tr.validate().is_ok());
        prop_assert!(tr.is_delaunay());
    }

    /// The cells created by an insertion are exactly the cells incident to
    /// the new vertex, and the removed cells are gone.
    #[test]
    fn prop_insertion_outcome_matches_the_star(
        points in prop::collection::vec(point_strategy(), 5..30),
        extra in point_strategy(),
    ) {
        let mut tr = Triangulation::from_points(&points).unwrap();
        prop_assume!(!points.contains(&extra));
        let outcome = tr.insert(extra).unwrap();

        let mut created = outcome.new_cells.clone();
        let mut star = tr.incident_cells(outcome.vertex);
        created.sort_unstable();
        star.sort_unstable();
        prop_assert_eq!(created, star);
        for c in &outcome.removed_cells {
            prop_assert!(!tr.contains_cell(*c));
        }
    }

    /// Locating an inserted point finds its vertex.
    #[test]
    fn prop_nearest_vertex_of_inserted_point(
        points in prop::collection::vec(point_strategy(), 5..30)
    ) {
        let tr = Triangulation::from_points(&points).unwrap();
        for (v, vertex) in tr.finite_vertices() {
            prop_assert_eq!(tr.nearest_vertex(vertex.point()), Some(v));
        }
    }
}
