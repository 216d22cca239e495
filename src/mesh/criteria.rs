//! Mesh criteria: decide whether a facet or a cell is bad and how urgently
//! it must be refined.
//!
//! A criterion returns `None` for a good element and `Some(quality)` for a
//! bad one. Lower qualities are refined first; [`Quality::ENCROACHED`]
//! precedes everything.
//!
//! Any closure with the right signature is a criterion:
//!
//! ```rust
//! use tetmesh::mesh::criteria::{CellCriteria, CellView, Quality};
//! use tetmesh::core::triangulation::Triangulation;
//!
//! let too_big = |_: &Triangulation, cell: &CellView| {
//!     let r2 = cell.circumcenter.squared_distance(&cell.vertices[0]);
//!     (r2 > 1.0).then(|| Quality::new(1.0 / r2))
//! };
//! fn accepts<C: CellCriteria>(_: &C) {}
//! accepts(&too_big);
//! ```

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::core::collections::{CellKey, VertexKey};
use crate::core::facet::FacetKey;
use crate::core::triangulation::Triangulation;
use crate::geometry::point::Point;
use crate::geometry::quality::radius_edge_ratio;
use crate::geometry::util::{min_triangle_angle_degrees, triangle_circumcenter};
use crate::mesh::domain::{PatchIndex, SubdomainIndex};

/// Refinement priority of a bad element; lower is refined first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Quality(pub OrderedFloat<f64>);

impl Quality {
    /// Priority of a facet encroached by a point of a higher level.
    pub const ENCROACHED: Self = Self(OrderedFloat(f64::NEG_INFINITY));

    /// Wraps a raw quality value.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(OrderedFloat(value))
    }

    /// The raw value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0.0
    }
}

/// A restricted facet as seen by the criteria.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FacetView {
    /// Canonical key.
    pub key: FacetKey,
    /// Vertex positions, in key order.
    pub vertices: [Point; 3],
    /// Intersection of the facet dual with the surface.
    pub surface_center: Point,
    /// Patch containing the surface center.
    pub patch: PatchIndex,
    /// Patch of each vertex, `None` for a vertex not lying on the surface.
    pub vertex_patches: [Option<PatchIndex>; 3],
}

impl FacetView {
    /// Squared radius of the surface Delaunay ball.
    #[must_use]
    pub fn surface_ball_squared_radius(&self) -> f64 {
        self.surface_center.squared_distance(&self.vertices[0])
    }
}

/// A cell in the complex as seen by the criteria.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellView {
    /// Cell key.
    pub key: CellKey,
    /// Vertex keys.
    pub vertex_keys: [VertexKey; 4],
    /// Vertex positions.
    pub vertices: [Point; 4],
    /// Circumcenter.
    pub circumcenter: Point,
    /// Subdomain containing the circumcenter.
    pub subdomain: SubdomainIndex,
}

/// Criteria for restricted facets.
pub trait FacetCriteria: Sync {
    /// Returns the quality of `facet` if it is bad.
    fn is_bad(&self, tr: &Triangulation, facet: &FacetView) -> Option<Quality>;
}

/// Criteria for cells in the complex.
pub trait CellCriteria: Sync {
    /// Returns the quality of `cell` if it is bad.
    fn is_bad(&self, tr: &Triangulation, cell: &CellView) -> Option<Quality>;
}

impl<F> FacetCriteria for F
where
    F: Fn(&Triangulation, &FacetView) -> Option<Quality> + Sync,
{
    fn is_bad(&self, tr: &Triangulation, facet: &FacetView) -> Option<Quality> {
        self(tr, facet)
    }
}

impl<F> CellCriteria for F
where
    F: Fn(&Triangulation, &CellView) -> Option<Quality> + Sync,
{
    fn is_bad(&self, tr: &Triangulation, cell: &CellView) -> Option<Quality> {
        self(tr, cell)
    }
}

/// Requirement on where the vertices of a restricted facet lie.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetTopology {
    /// No requirement.
    #[default]
    Any,
    /// All three vertices lie on the surface.
    VerticesOnSurface,
    /// All three vertices lie on the facet's own patch.
    VerticesOnSameSurfacePatch,
}

/// Standard facet criteria. A bound of `0` disables the criterion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshFacetCriteria {
    /// Lower bound on the smallest facet angle, in degrees.
    pub angle_bound: f64,
    /// Upper bound on the surface Delaunay ball radius.
    pub size_bound: f64,
    /// Upper bound on the distance between the facet circumcenter and its
    /// surface center.
    pub distance_bound: f64,
    /// Vertex placement requirement.
    pub topology: FacetTopology,
}

impl FacetCriteria for MeshFacetCriteria {
    fn is_bad(&self, _tr: &Triangulation, facet: &FacetView) -> Option<Quality> {
        let [a, b, c] = &facet.vertices;
        let mut worst: Option<f64> = None;
        let mut violate = |q: f64| worst = Some(worst.map_or(q, |w| w.min(q)));

        let topology_ok = match self.topology {
            FacetTopology::Any => true,
            FacetTopology::VerticesOnSurface => facet.vertex_patches.iter().all(Option::is_some),
            FacetTopology::VerticesOnSameSurfacePatch => facet
                .vertex_patches
                .iter()
                .all(|&p| p == Some(facet.patch)),
        };
        if !topology_ok {
            violate(0.0);
        }

        if self.angle_bound > 0.0 {
            let angle = min_triangle_angle_degrees(a, b, c);
            if angle < self.angle_bound {
                let ratio = angle.to_radians().sin() / self.angle_bound.to_radians().sin();
                violate(ratio * ratio);
            }
        }

        if self.size_bound > 0.0 {
            let r2 = facet.surface_ball_squared_radius();
            let bound2 = self.size_bound * self.size_bound;
            if r2 > bound2 {
                violate(bound2 / r2);
            }
        }

        if self.distance_bound > 0.0
            && let Some(cc) = triangle_circumcenter(a, b, c)
        {
            let d2 = cc.squared_distance(&facet.surface_center);
            let bound2 = self.distance_bound * self.distance_bound;
            if d2 > bound2 {
                violate(bound2 / d2);
            }
        }

        worst.map(Quality::new)
    }
}

/// Standard cell criteria. A bound of `0` disables the criterion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshCellCriteria {
    /// Upper bound on circumradius over shortest edge.
    pub radius_edge_bound: f64,
    /// Upper bound on the circumradius.
    pub size_bound: f64,
}

impl CellCriteria for MeshCellCriteria {
    fn is_bad(&self, _tr: &Triangulation, cell: &CellView) -> Option<Quality> {
        let mut worst: Option<f64> = None;

        if self.size_bound > 0.0 {
            let r2 = cell.circumcenter.squared_distance(&cell.vertices[0]);
            let bound2 = self.size_bound * self.size_bound;
            if r2 > bound2 {
                worst = Some(bound2 / r2);
            }
        }

        if self.radius_edge_bound > 0.0 {
            // A flat cell has an unbounded ratio.
            let ratio = radius_edge_ratio(&cell.vertices).unwrap_or(f64::INFINITY);
            if ratio > self.radius_edge_bound {
                let q = (self.radius_edge_bound / ratio).powi(2);
                worst = Some(worst.map_or(q, |w| w.min(q)));
            }
        }

        worst.map(Quality::new)
    }
}

/// Facet and cell criteria used together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshCriteria {
    /// Facet criteria.
    pub facet: MeshFacetCriteria,
    /// Cell criteria.
    pub cell: MeshCellCriteria,
}

impl MeshCriteria {
    /// Bundles facet and cell criteria.
    #[must_use]
    pub const fn new(facet: MeshFacetCriteria, cell: MeshCellCriteria) -> Self {
        Self { facet, cell }
    }
}
