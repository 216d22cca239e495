//! Filtered geometric predicates in 3D.
//!
//! Every predicate evaluates its determinant in floating point together with
//! a static error bound derived from the permanent of the same expression
//! (Shewchuk's stage-A bounds). Results whose magnitude falls under the bound
//! are reported as `DEGENERATE` / `BOUNDARY` instead of guessing a sign.
//!
//! # Sign conventions
//!
//! - [`orientation`]`(a, b, c, d)` is the sign of `det[b - a, c - a, d - a]`.
//!   `POSITIVE` means `d` lies on the side of the plane `abc` towards which the
//!   normal `(b - a) × (c - a)` points.
//! - [`insphere`]`(a, b, c, d, e)` reports where `e` lies relative to the
//!   sphere through `a, b, c, d`, independently of their orientation.

use crate::geometry::point::Point;
use crate::geometry::util::triangle_circumcenter;

/// Represents the position of a point relative to a circumsphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InSphere {
    /// The point is outside the circumsphere
    OUTSIDE,
    /// The point is on the boundary of the circumsphere (within numerical tolerance)
    BOUNDARY,
    /// The point is inside the circumsphere
    INSIDE,
}

impl std::fmt::Display for InSphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Represents the orientation of a simplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// The simplex has negative orientation (determinant < 0)
    NEGATIVE,
    /// The simplex is degenerate (determinant ≈ 0)
    DEGENERATE,
    /// The simplex has positive orientation (determinant > 0)
    POSITIVE,
}

impl Orientation {
    /// The orientation obtained by swapping two vertices.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::NEGATIVE => Self::POSITIVE,
            Self::DEGENERATE => Self::DEGENERATE,
            Self::POSITIVE => Self::NEGATIVE,
        }
    }

    const fn from_filtered(value: f64, bound: f64) -> Self {
        if value > bound {
            Self::POSITIVE
        } else if value < -bound {
            Self::NEGATIVE
        } else {
            Self::DEGENERATE
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

const EPSILON: f64 = f64::EPSILON * 0.5;
const ORIENT_ERROR_BOUND: f64 = (7.0 + 56.0 * EPSILON) * EPSILON;
const INSPHERE_ERROR_BOUND: f64 = (16.0 + 224.0 * EPSILON) * EPSILON;

/// 3x3 determinant of the rows `u, v, w` together with its permanent
/// (the same expansion with every product taken in absolute value).
fn det3_with_permanent(u: [f64; 3], v: [f64; 3], w: [f64; 3]) -> (f64, f64) {
    let m0 = v[1].mul_add(w[2], -(v[2] * w[1]));
    let m1 = v[0].mul_add(w[2], -(v[2] * w[0]));
    let m2 = v[0].mul_add(w[1], -(v[1] * w[0]));
    let det = u[2].mul_add(m2, u[0].mul_add(m0, -(u[1] * m1)));

    let p0 = (v[1] * w[2]).abs() + (v[2] * w[1]).abs();
    let p1 = (v[0] * w[2]).abs() + (v[2] * w[0]).abs();
    let p2 = (v[0] * w[1]).abs() + (v[1] * w[0]).abs();
    let permanent = u[2].abs().mul_add(p2, u[0].abs().mul_add(p0, u[1].abs() * p1));
    (det, permanent)
}

fn diff(p: &Point, q: &Point) -> [f64; 3] {
    let (p, q) = (p.coords(), q.coords());
    [p[0] - q[0], p[1] - q[1], p[2] - q[2]]
}

/// Orientation of the tetrahedron `(a, b, c, d)`.
///
/// # Examples
///
/// ```rust
/// use tetmesh::geometry::point::Point;
/// use tetmesh::geometry::predicates::{orientation, Orientation};
///
/// let a = Point::new([0.0, 0.0, 0.0]);
/// let b = Point::new([1.0, 0.0, 0.0]);
/// let c = Point::new([0.0, 1.0, 0.0]);
/// assert_eq!(orientation(&a, &b, &c, &Point::new([0.0, 0.0, 1.0])), Orientation::POSITIVE);
/// assert_eq!(orientation(&a, &b, &c, &Point::new([0.0, 0.0, -1.0])), Orientation::NEGATIVE);
/// assert_eq!(orientation(&a, &b, &c, &Point::new([0.3, 0.3, 0.0])), Orientation::DEGENERATE);
/// ```
#[must_use]
pub fn orientation(a: &Point, b: &Point, c: &Point, d: &Point) -> Orientation {
    let (det, permanent) = det3_with_permanent(diff(b, a), diff(c, a), diff(d, a));
    Orientation::from_filtered(det, ORIENT_ERROR_BOUND * permanent)
}

/// Signed volume determinant `det[b - a, c - a, d - a]` (six times the signed volume).
#[must_use]
pub fn orientation_determinant(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    det3_with_permanent(diff(b, a), diff(c, a), diff(d, a)).0
}

/// Position of `e` relative to the sphere circumscribing `a, b, c, d`.
///
/// Returns `BOUNDARY` when the four sphere points are coplanar within the
/// filter bound, since no sphere is defined then.
#[must_use]
pub fn insphere(a: &Point, b: &Point, c: &Point, d: &Point, e: &Point) -> InSphere {
    let orient = orientation(a, b, c, d);
    if orient == Orientation::DEGENERATE {
        return InSphere::BOUNDARY;
    }

    let rows = [diff(a, e), diff(b, e), diff(c, e), diff(d, e)];
    let lift = rows.map(|r| r[2].mul_add(r[2], r[0].mul_add(r[0], r[1] * r[1])));

    // Cofactor expansion of the lifted 4x4 determinant along the lift column.
    let (d_bcd, p_bcd) = det3_with_permanent(rows[1], rows[2], rows[3]);
    let (d_acd, p_acd) = det3_with_permanent(rows[0], rows[2], rows[3]);
    let (d_abd, p_abd) = det3_with_permanent(rows[0], rows[1], rows[3]);
    let (d_abc, p_abc) = det3_with_permanent(rows[0], rows[1], rows[2]);

    let det = lift[3].mul_add(
        d_abc,
        lift[2].mul_add(-d_abd, lift[1].mul_add(d_acd, -(lift[0] * d_bcd))),
    );
    let permanent = lift[3].mul_add(
        p_abc,
        lift[2].mul_add(p_abd, lift[1].mul_add(p_acd, lift[0] * p_bcd)),
    );

    // For positively oriented (a, b, c, d) the lifted determinant is negative
    // exactly when e is inside.
    let signed = if orient == Orientation::POSITIVE {
        -det
    } else {
        det
    };
    let bound = INSPHERE_ERROR_BOUND * permanent;
    if signed > bound {
        InSphere::INSIDE
    } else if signed < -bound {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

/// Position of `p` relative to the circle circumscribing the triangle `a, b, c`.
///
/// `p` is assumed coplanar with the triangle; it is compared with the
/// circumcircle by distance to the circumcenter, with a relative tolerance.
#[must_use]
pub fn coplanar_side_of_bounded_circle(a: &Point, b: &Point, c: &Point, p: &Point) -> InSphere {
    let Some(center) = triangle_circumcenter(a, b, c) else {
        return InSphere::BOUNDARY;
    };
    let r2 = center.squared_distance(a);
    let d2 = center.squared_distance(p);
    let tolerance = 64.0 * f64::EPSILON * r2.max(d2);
    if d2 < r2 - tolerance {
        InSphere::INSIDE
    } else if d2 > r2 + tolerance {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

/// Position of `p` relative to the sphere of given `center` and squared radius.
///
/// Used for surface Delaunay balls, whose center is a constructed point.
#[must_use]
pub fn side_of_bounded_sphere(center: &Point, squared_radius: f64, p: &Point) -> InSphere {
    let d2 = center.squared_distance(p);
    let tolerance = 64.0 * f64::EPSILON * squared_radius.max(d2);
    if d2 < squared_radius - tolerance {
        InSphere::INSIDE
    } else if d2 > squared_radius + tolerance {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tetrahedron() -> [Point; 4] {
        [
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
            Point::new([0.0, 0.0, 1.0]),
        ]
    }

    #[test]
    fn test_orientation_swaps_sign() {
        let [a, b, c, d] = unit_tetrahedron();
        assert_eq!(orientation(&a, &b, &c, &d), Orientation::POSITIVE);
        assert_eq!(orientation(&b, &a, &c, &d), Orientation::NEGATIVE);
        assert_eq!(
            orientation(&a, &b, &c, &d).opposite(),
            orientation(&a, &c, &b, &d)
        );
    }

    #[test]
    fn test_orientation_degenerate_for_coplanar_points() {
        let [a, b, c, _] = unit_tetrahedron();
        let p = Point::new([0.1, 0.7, 0.0]);
        assert_eq!(orientation(&a, &b, &c, &p), Orientation::DEGENERATE);
        assert_eq!(orientation(&a, &b, &c, &c), Orientation::DEGENERATE);
    }

    #[test]
    fn test_insphere_is_orientation_independent() {
        let [a, b, c, d] = unit_tetrahedron();
        let inside = Point::new([0.25, 0.25, 0.25]);
        let outside = Point::new([2.0, 2.0, 2.0]);
        assert_eq!(insphere(&a, &b, &c, &d, &inside), InSphere::INSIDE);
        assert_eq!(insphere(&b, &a, &c, &d, &inside), InSphere::INSIDE);
        assert_eq!(insphere(&a, &b, &c, &d, &outside), InSphere::OUTSIDE);
        assert_eq!(insphere(&b, &a, &c, &d, &outside), InSphere::OUTSIDE);
    }

    #[test]
    fn test_insphere_boundary_on_cospherical_point() {
        let [a, b, c, d] = unit_tetrahedron();
        // The circumsphere of the unit corner tetrahedron passes through (1, 1, 0).
        let e = Point::new([1.0, 1.0, 0.0]);
        assert_eq!(insphere(&a, &b, &c, &d, &e), InSphere::BOUNDARY);
    }

    #[test]
    fn test_side_of_bounded_circle() {
        let a = Point::new([1.0, 0.0, 0.0]);
        let b = Point::new([0.0, 1.0, 0.0]);
        let c = Point::new([-1.0, 0.0, 0.0]);
        assert_eq!(
            coplanar_side_of_bounded_circle(&a, &b, &c, &Point::new([0.0, -0.5, 0.0])),
            InSphere::INSIDE
        );
        assert_eq!(
            coplanar_side_of_bounded_circle(&a, &b, &c, &Point::new([0.0, -2.0, 0.0])),
            InSphere::OUTSIDE
        );
        assert_eq!(
            coplanar_side_of_bounded_circle(&a, &b, &c, &Point::new([0.0, -1.0, 0.0])),
            InSphere::BOUNDARY
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Orientation::POSITIVE), "POSITIVE");
        assert_eq!(format!("{}", InSphere::BOUNDARY), "BOUNDARY");
    }
}
