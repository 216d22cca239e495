//! Error types of the meshing layer.

use crate::core::algorithms::incremental_insertion::InsertionError;
use crate::core::triangulation::TriangulationError;
use crate::geometry::point::Point;
use crate::mesh::config::ConfigError;
use crate::mesh::domain::PatchIndex;

/// Errors raised by mesh domains.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// Polyhedra and subdomain pairs were given in different numbers.
    #[error("Got {polyhedra} polyhedra but {pairs} subdomain pairs")]
    MismatchedSubdomainPairs {
        /// Number of polyhedra
        polyhedra: usize,
        /// Number of pairs
        pairs: usize,
    },

    /// A face references a vertex the polyhedron does not have.
    #[error("Face {face} of polyhedron {polyhedron} references missing vertex {vertex}")]
    InvalidFace {
        /// Polyhedron index
        polyhedron: usize,
        /// Face index
        face: usize,
        /// Offending vertex index
        vertex: usize,
    },

    /// The domain has no boundary triangle.
    #[error("Domain has no boundary triangle")]
    EmptyDomain,

    /// The bounding box is empty or not finite.
    #[error("Invalid domain bounding box")]
    InvalidBoundingBox,

    /// A patch index is not known to the domain.
    #[error("Unknown patch {patch}")]
    UnknownPatch {
        /// The patch
        patch: PatchIndex,
    },

    /// Every ray shot from the point hit the boundary degenerately.
    #[error("Could not classify {point} after {retries} ray directions")]
    ClassificationRetriesExhausted {
        /// Query point
        point: Point,
        /// Directions tried
        retries: usize,
    },
}

/// Errors raised by the mesher.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Domain query failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Triangulation construction or validation failed.
    #[error("Triangulation error: {0}")]
    Triangulation(#[from] TriangulationError),

    /// A point required by the mesher could not be inserted.
    #[error("Insertion error: {0}")]
    Insertion(#[from] InsertionError),

    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The worker pool could not be created.
    #[error("Failed to build worker pool: {message}")]
    ThreadPool {
        /// Pool error
        message: String,
    },
}
