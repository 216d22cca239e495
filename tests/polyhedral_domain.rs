//! Integration tests for meshing polyhedral complex domains.
//!
//! Two nested boxes bound subdomain 1 (the shell between them) and
//! subdomain 2 (the inner box). The mesh must label every cell with the
//! subdomain of its circumcenter and put surface vertices on the patch
//! they were sampled from.

use tetmesh::prelude::*;

// =============================================================================
// FIXTURES
// =============================================================================

const OUTER: Bbox3 = Bbox3::new([0.0; 3], [3.0; 3]);
const INNER: Bbox3 = Bbox3::new([1.0; 3], [2.0; 3]);

fn nested_boxes() -> PolyhedralComplexDomain {
    PolyhedralComplexDomain::new(
        vec![
            Polyhedron::axis_aligned_box(&OUTER),
            Polyhedron::axis_aligned_box(&INNER),
        ],
        vec![
            (SubdomainIndex(1), SubdomainIndex(0)),
            (SubdomainIndex(2), SubdomainIndex(1)),
        ],
    )
    .unwrap()
}

fn on_box_surface(bbox: &Bbox3, p: &Point) -> bool {
    let eps = 1e-9;
    bbox.contains(p)
        && (0..3).any(|axis| {
            (p.coords()[axis] - bbox.min[axis]).abs() < eps
                || (p.coords()[axis] - bbox.max[axis]).abs() < eps
        })
}

// =============================================================================
// DOMAIN QUERIES
// =============================================================================

#[test]
fn test_nested_boxes_patches_and_subdomains() {
    let domain = nested_boxes();
    assert_eq!(domain.number_of_patches(), 2);
    assert_eq!(domain.boundary_patches(), &[PatchIndex(1)]);
    assert_eq!(domain.boundary_polyhedra(), &[0]);
    assert_eq!(domain.inside_polyhedra(), &[1]);
    assert_eq!(
        domain.incident_subdomains_indices(PatchIndex(2)).unwrap(),
        (SubdomainIndex(2), SubdomainIndex(1))
    );
    assert_eq!(domain.bbox(), OUTER);

    for (p, expected) in [
        ([1.5, 1.5, 1.5], Some(SubdomainIndex(2))),
        ([0.5, 1.5, 2.5], Some(SubdomainIndex(1))),
        ([2.9, 0.1, 0.1], Some(SubdomainIndex(1))),
        ([3.5, 1.5, 1.5], None),
        ([-1.0, -1.0, -1.0], None),
    ] {
        assert_eq!(domain.is_in_domain(&Point::new(p)).unwrap(), expected, "{p:?}");
    }
}

#[test]
fn test_segment_crossing_both_boxes_hits_the_outer_one_first() {
    let domain = nested_boxes();
    let hit = domain
        .intersect_segment(&Point::new([-1.0, 1.5, 1.5]), &Point::new([1.5, 1.5, 1.5]))
        .unwrap();
    assert_eq!(hit.patch, PatchIndex(1));
    approx::assert_relative_eq!(hit.point.x(), 0.0, epsilon = 1e-12);

    let inside = domain
        .intersect_segment(&Point::new([0.5, 1.5, 1.5]), &Point::new([1.5, 1.5, 1.5]))
        .unwrap();
    assert_eq!(inside.patch, PatchIndex(2));
    approx::assert_relative_eq!(inside.point.x(), 1.0, epsilon = 1e-12);
}

#[test]
fn test_polyhedra_json_round_trip_rebuilds_the_same_domain() {
    let mut domain = nested_boxes();
    domain.detect_features(60.0);

    let json = serde_json::to_string(domain.polyhedra()).unwrap();
    let polyhedra: Vec<Polyhedron> = serde_json::from_str(&json).unwrap();
    assert_eq!(polyhedra, domain.polyhedra());

    let mut rebuilt = PolyhedralComplexDomain::new(
        polyhedra,
        vec![
            (SubdomainIndex(1), SubdomainIndex(0)),
            (SubdomainIndex(2), SubdomainIndex(1)),
        ],
    )
    .unwrap();
    rebuilt.detect_features(60.0);
    assert_eq!(rebuilt.number_of_patches(), domain.number_of_patches());
    assert_eq!(rebuilt.features(), domain.features());

    let features: Vec<FeaturePolyline> =
        serde_json::from_str(&serde_json::to_string(domain.features()).unwrap()).unwrap();
    assert_eq!(features, domain.features());
}

// =============================================================================
// MESHING
// =============================================================================

#[test]
fn test_nested_boxes_mesh_labels_cells_by_subdomain() {
    let domain = nested_boxes();
    let mut complex = MeshComplex::with_initial_points(&domain, Some(30)).unwrap();
    let criteria = MeshCriteria::new(
        MeshFacetCriteria {
            angle_bound: 20.0,
            size_bound: 0.8,
            distance_bound: 0.2,
            ..MeshFacetCriteria::default()
        },
        MeshCellCriteria {
            radius_edge_bound: 3.0,
            size_bound: 0.8,
        },
    );
    let config = MesherConfig {
        max_vertices: 1_500,
        ..MesherConfig::default()
    };
    let mut mesher =
        Mesher::new(&mut complex, &domain, &criteria.facet, &criteria.cell, config).unwrap();
    mesher.refine_mesh().unwrap();
    drop(mesher);

    let tr = complex.triangulation();
    assert!(tr.validate().is_ok());
    assert!(tr.is_delaunay());

    let mut seen = [false; 3];
    for (cell, subdomain) in complex.cells_in_complex() {
        let center = tr.circumcenter(cell).unwrap();
        assert_eq!(domain.is_in_domain(&center).unwrap(), Some(subdomain));
        seen[subdomain.0 as usize] = true;
    }
    assert_eq!(seen, [false, true, true]);

    for (key, vertex) in tr.finite_vertices() {
        match complex.vertex_info(key).and_then(|info| info.surface_patch()) {
            Some(PatchIndex(1)) => assert!(on_box_surface(&OUTER, vertex.point())),
            Some(PatchIndex(2)) => assert!(on_box_surface(&INNER, vertex.point())),
            _ => {}
        }
    }
    let patches: std::collections::BTreeSet<PatchIndex> = complex
        .facets_in_complex()
        .map(|(_, surface)| surface.patch)
        .collect();
    assert_eq!(patches.into_iter().collect::<Vec<_>>(), vec![PatchIndex(1), PatchIndex(2)]);
}

#[test]
fn test_mesher_classifies_with_the_configured_retry_cap() {
    // The domain's own cap would fail every direct query; refinement uses
    // the cap from the configuration instead.
    let domain = PolyhedralComplexDomain::new(
        vec![Polyhedron::axis_aligned_box(&INNER)],
        vec![(SubdomainIndex(1), SubdomainIndex(0))],
    )
    .unwrap()
    .with_max_retries(0);
    assert!(domain.is_in_domain(&Point::new([1.5; 3])).is_err());

    let mut complex = MeshComplex::with_initial_points(&domain, Some(12)).unwrap();
    let criteria = MeshCriteria::new(
        MeshFacetCriteria {
            size_bound: 0.4,
            ..MeshFacetCriteria::default()
        },
        MeshCellCriteria {
            radius_edge_bound: 3.0,
            size_bound: 0.4,
        },
    );
    let config = MesherConfig {
        classification_max_retries: 32,
        max_vertices: 1_000,
        ..MesherConfig::default()
    };
    let mut mesher =
        Mesher::new(&mut complex, &domain, &criteria.facet, &criteria.cell, config).unwrap();
    mesher.refine_mesh().unwrap();
    drop(mesher);

    assert!(complex.number_of_cells() > 0);
    let tr = complex.triangulation();
    for (cell, subdomain) in complex.cells_in_complex() {
        let center = tr.circumcenter(cell).unwrap();
        assert_eq!(
            domain.is_in_domain_with_retries(&center, 32).unwrap(),
            Some(subdomain)
        );
    }
}
