//! # tetmesh
//!
//! 3D Delaunay refinement mesh generation inspired by [CGAL](https://www.cgal.org)'s
//! `Mesh_3`.
//!
//! The mesher incrementally refines a tetrahedral Delaunay triangulation
//! until its restricted surface approximates the boundary of a domain and
//! its cells satisfy size and shape criteria.
//!
//! # Features
//!
//! - 3D Delaunay triangulation with an explicit infinite vertex and
//!   conflict-zone insertion
//! - Two-level refinement (surface facets, then volume cells) with
//!   encroachment tests between levels
//! - Polyhedral complex domains with ray-shooting point classification
//!   through an AABB tree, feature detection and patch bookkeeping
//! - Implicit domains given by a labeling function
//! - Optional parallel refinement on a [`rayon`] pool, with a spatial lock
//!   grid guarding concurrent insertions
//! - Serialization of configurations and domains with [serde](https://serde.rs)
//!
//! # Basic Usage
//!
//! ```rust
//! use tetmesh::prelude::*;
//!
//! // Unit cube given as a closed triangulated surface, inside = subdomain 1.
//! let cube = Polyhedron::axis_aligned_box(&Bbox3::new([0.0; 3], [1.0; 3]));
//! let domain = PolyhedralComplexDomain::new(
//!     vec![cube],
//!     vec![(SubdomainIndex(1), SubdomainIndex(0))],
//! )
//! .unwrap();
//! assert_eq!(
//!     domain.is_in_domain(&Point::new([0.5, 0.5, 0.5])).unwrap(),
//!     Some(SubdomainIndex(1))
//! );
//!
//! let mut complex = MeshComplex::with_initial_points(&domain, Some(12)).unwrap();
//! let criteria = MeshCriteria::new(
//!     MeshFacetCriteria {
//!         size_bound: 0.4,
//!         ..MeshFacetCriteria::default()
//!     },
//!     MeshCellCriteria {
//!         radius_edge_bound: 3.0,
//!         size_bound: 0.4,
//!     },
//! );
//! let config = MesherConfig {
//!     max_vertices: 150,
//!     ..MesherConfig::default()
//! };
//! let mut mesher =
//!     Mesher::new(&mut complex, &domain, &criteria.facet, &criteria.cell, config).unwrap();
//! mesher.refine_mesh().unwrap();
//! drop(mesher);
//!
//! assert!(complex.triangulation().is_delaunay());
//! assert!(complex.number_of_facets() > 0);
//! ```
//!
//! # Refinement
//!
//! [`mesh::mesher::Mesher`] runs the facet level through three passes
//! (bad facets, then non-manifold edges, then non-manifold vertices, the
//! last two only when [`mesh::config::MeshTopology`] asks for it), then the
//! cell level. Every cell step first drains the facet level, and a cell
//! circumcenter that falls inside the surface Delaunay ball of a
//! restricted facet is deferred until that facet has been refined.
//!
//! The run stops when both queues are empty or when the triangulation
//! holds [`MesherConfig::max_vertices`](mesh::config::MesherConfig::max_vertices)
//! vertices; the latter is reported as
//! [`RefinementStatus::MaximalNumberOfVerticesReached`](mesh::mesher::RefinementStatus),
//! not as an error.
//!
//! # Parallelism
//!
//! With [`ConcurrencyMode::Parallel`](mesh::config::ConcurrencyMode) the
//! queues are split in worksharing bins and workers insert concurrently.
//! A worker locks every grid cell of the [`concurrency::lock_grid::LockGrid`]
//! containing a vertex of the neighborhood it modifies; a worker that
//! cannot take a grid cell puts its element back and retries later.
//! Results are valid Delaunay refinements but depend on scheduling.

// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// The `core` module contains the triangulation: vertices, cells, facets
/// and the incremental insertion algorithms.
pub mod core {
    /// Point location and cavity insertion.
    pub mod algorithms {
        /// Conflict-zone insertion of a point (Bowyer–Watson).
        pub mod incremental_insertion;
        /// Point location by facet walking and conflict-zone search.
        pub mod locate;
    }
    pub mod cell;
    /// High-performance collection types optimized for computational geometry
    pub mod collections;
    pub mod facet;
    pub mod triangulation;
    pub mod vertex;
    // Re-export the `core` modules.
    pub use cell::*;
    pub use facet::*;
    pub use triangulation::*;
    pub use vertex::*;
    // Note: collections module not re-exported here to avoid namespace pollution
    // Import specific types via prelude or use crate::core::collections::
}

/// Geometric types, predicates and constructions.
pub mod geometry {
    /// AABB tree over triangles with first-hit ray queries.
    pub mod aabb_tree;
    pub mod point;
    pub mod predicates;
    /// Shape measures of tetrahedra
    pub mod quality;
    /// Geometric constructions: circumcenters, normals, angles, random directions
    pub mod util;
    pub use aabb_tree::*;
    pub use point::*;
    pub use predicates::*;
    pub use quality::*;
    pub use util::*;
}

/// Structures shared between parallel refinement workers.
pub mod concurrency {
    pub mod lock_grid;
    pub mod worksharing;
}

/// The mesh generator: domains, criteria, the mesh complex and the
/// refinement engine.
pub mod mesh {
    pub mod complex;
    pub mod config;
    pub mod criteria;
    pub mod domain;
    pub mod error;
    pub mod mesher;
    pub mod observer;
    pub mod parallel;
    pub mod refinement;
}

/// A prelude module that re-exports commonly used types.
/// This makes it easier to import the most commonly used items from the crate.
pub mod prelude {
    // Re-export from core
    pub use crate::core::{
        algorithms::{
            incremental_insertion::{InsertionError, InsertionOutcome},
            locate::{ConflictZone, LocateResult},
        },
        cell::Cell,
        facet::{EdgeKey, Facet, FacetKey},
        triangulation::{Triangulation, TriangulationError},
        vertex::Vertex,
    };

    // Re-export commonly used collection types from core::collections
    pub use crate::core::collections::{
        CellKey, FastHashMap, FastHashSet, SmallBuffer, VertexKey,
    };

    // Re-export from geometry
    pub use crate::geometry::{
        aabb_tree::{AabbTree, RayHit, Triangle},
        point::{Bbox3, Point},
        predicates::{InSphere, Orientation, insphere, orientation},
        quality::{radius_edge_ratio, radius_ratio},
    };

    // Re-export from mesh
    pub use crate::mesh::{
        complex::{MeshComplex, SurfaceFacet, VertexInfo},
        config::{ConcurrencyMode, FarPointPolicy, MeshTopology, MesherConfig, MesherConfigBuilder},
        criteria::{
            CellCriteria, CellView, FacetCriteria, FacetTopology, FacetView, MeshCellCriteria,
            MeshCriteria, MeshFacetCriteria, Quality,
        },
        domain::{
            MeshDomain, PatchIndex, SubdomainIndex, SurfaceIntersection,
            labeled_function::LabeledFunctionDomain,
            polyhedral_complex::{FeaturePolyline, PolyhedralComplexDomain, Polyhedron},
        },
        error::{DomainError, MeshError},
        mesher::{Mesher, MesherStatus, RefinementReport, RefinementStatus},
        observer::{NullObserver, RefinementCounters, RefinementObserver},
        refinement::{RefinementStage, StepOutcome},
    };
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================
