//! Geometric quality measures for tetrahedra and triangles.
//!
//! # Quality Metrics
//!
//! - **Radius-edge ratio**: circumradius divided by the shortest edge length.
//!   Delaunay refinement bounds this ratio; the regular tetrahedron reaches
//!   `sqrt(6) / 4 ≈ 0.612`.
//! - **Radius ratio**: circumradius divided by inradius, `3` for the regular
//!   tetrahedron and unbounded for slivers.
//! - **Minimum angle**: smallest interior angle of a triangle.
//!
//! # References
//!
//! - Shewchuk, J.R. "What Is a Good Linear Element? Interpolation, Conditioning,
//!   Anisotropy, and Quality Measures" (2002)
//! - Shewchuk, J.R. "Tetrahedral Mesh Generation by Delaunay Refinement" (1998)

use crate::geometry::point::Point;
use crate::geometry::predicates::orientation_determinant;
use crate::geometry::util::{circumcenter, triangle_area};

/// Errors that can occur during quality metric computation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QualityError {
    /// Cell is degenerate (zero or near-zero volume)
    #[error("Degenerate tetrahedron: volume {volume:e}")]
    DegenerateCell {
        /// Signed volume of the tetrahedron
        volume: f64,
    },
}

/// Volume of the tetrahedron `(a, b, c, d)`, always non-negative.
#[must_use]
pub fn tetrahedron_volume(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    orientation_determinant(a, b, c, d).abs() / 6.0
}

/// Length of the shortest edge of the tetrahedron.
#[must_use]
pub fn shortest_edge_squared(points: &[Point; 4]) -> f64 {
    let mut best = f64::INFINITY;
    for i in 0..4 {
        for j in (i + 1)..4 {
            best = best.min(points[i].squared_distance(&points[j]));
        }
    }
    best
}

/// Circumradius over shortest edge length.
///
/// # Errors
///
/// Returns [`QualityError::DegenerateCell`] if the tetrahedron is flat.
///
/// # Examples
///
/// ```rust
/// use tetmesh::geometry::point::Point;
/// use tetmesh::geometry::quality::radius_edge_ratio;
///
/// let s = 1.0 / 2.0_f64.sqrt();
/// let regular = [
///     Point::new([1.0, 0.0, -s]),
///     Point::new([-1.0, 0.0, -s]),
///     Point::new([0.0, 1.0, s]),
///     Point::new([0.0, -1.0, s]),
/// ];
/// let ratio = radius_edge_ratio(&regular).unwrap();
/// assert!((ratio - 6.0_f64.sqrt() / 4.0).abs() < 1e-9);
/// ```
pub fn radius_edge_ratio(points: &[Point; 4]) -> Result<f64, QualityError> {
    let [a, b, c, d] = points;
    let center = circumcenter(a, b, c, d).ok_or_else(|| QualityError::DegenerateCell {
        volume: tetrahedron_volume(a, b, c, d),
    })?;
    let edge2 = shortest_edge_squared(points);
    if edge2 <= f64::MIN_POSITIVE {
        return Err(QualityError::DegenerateCell { volume: 0.0 });
    }
    Ok((center.squared_distance(a) / edge2).sqrt())
}

/// Circumradius over inradius.
///
/// # Errors
///
/// Returns [`QualityError::DegenerateCell`] if the tetrahedron is flat.
pub fn radius_ratio(points: &[Point; 4]) -> Result<f64, QualityError> {
    let [a, b, c, d] = points;
    let volume = tetrahedron_volume(a, b, c, d);
    let center = circumcenter(a, b, c, d).ok_or(QualityError::DegenerateCell { volume })?;
    let surface =
        triangle_area(b, c, d) + triangle_area(a, c, d) + triangle_area(a, b, d) + triangle_area(a, b, c);
    if volume <= f64::MIN_POSITIVE || surface <= f64::MIN_POSITIVE {
        return Err(QualityError::DegenerateCell { volume });
    }
    let inradius = 3.0 * volume / surface;
    Ok(center.distance(a) / inradius)
}

// =============================================================================
// TESTS
// =============================================================================
