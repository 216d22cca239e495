//! Mesh domains: the geometric oracle the mesher conforms to.
//!
//! A domain classifies points into subdomains and intersects segments and
//! rays with its boundary surface, which is split into patches.

pub mod labeled_function;
pub mod polyhedral_complex;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::point::{Bbox3, Point};
use crate::mesh::error::DomainError;

/// Index of a subdomain; `0` is the exterior.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SubdomainIndex(pub u32);

impl SubdomainIndex {
    /// The exterior.
    pub const EXTERIOR: Self = Self(0);

    /// Returns `true` for the exterior.
    #[must_use]
    pub const fn is_exterior(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SubdomainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a surface patch; `0` is reserved.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PatchIndex(pub u32);

impl PatchIndex {
    /// The reserved "no patch" index.
    pub const NONE: Self = Self(0);
}

impl fmt::Display for PatchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point on the domain boundary and the patch it lies on.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceIntersection {
    /// Intersection point.
    pub point: Point,
    /// Patch containing the point.
    pub patch: PatchIndex,
}

/// Geometric oracle queried by the mesher.
pub trait MeshDomain: Sync {
    /// Box enclosing the domain.
    fn bbox(&self) -> Bbox3;

    /// Subdomain containing `p`, or `None` if `p` is in the exterior.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ClassificationRetriesExhausted`] if the point
    /// could not be classified.
    fn is_in_domain(&self, p: &Point) -> Result<Option<SubdomainIndex>, DomainError>;

    /// Same as [`MeshDomain::is_in_domain`], giving up after `max_retries`
    /// degenerate attempts for domains that classify by ray shooting.
    ///
    /// The mesher always classifies through this method with
    /// [`MesherConfig::classification_max_retries`], so during refinement
    /// that value overrides any cap stored in the domain. Domains that
    /// classify exactly ignore the cap.
    ///
    /// [`MesherConfig::classification_max_retries`]: crate::mesh::config::MesherConfig::classification_max_retries
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ClassificationRetriesExhausted`] if the point
    /// could not be classified.
    fn is_in_domain_with_retries(
        &self,
        p: &Point,
        _max_retries: usize,
    ) -> Result<Option<SubdomainIndex>, DomainError> {
        self.is_in_domain(p)
    }

    /// Intersection of the segment `[a, b]` with the boundary nearest to `a`.
    fn intersect_segment(&self, a: &Point, b: &Point) -> Option<SurfaceIntersection>;

    /// Intersection of the ray from `origin` along `dir` with the boundary
    /// nearest to `origin`.
    fn intersect_ray(&self, origin: &Point, dir: &Vector3<f64>) -> Option<SurfaceIntersection>;

    /// Up to `n` points on the boundary used to seed the triangulation.
    fn construct_initial_points(&self, n: usize) -> Vec<SurfaceIntersection>;

    /// Number of initial points requested when the caller does not choose.
    fn default_initial_point_count(&self) -> usize {
        20
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_indices() {
        assert!(SubdomainIndex::EXTERIOR.is_exterior());
        assert!(!SubdomainIndex(3).is_exterior());
        assert_eq!(PatchIndex::default(), PatchIndex::NONE);
        assert_eq!(PatchIndex(4).to_string(), "4");
    }
}
