//! Geometric constructions in 3D.
//!
//! Circumcenters, normals, angles and random directions used by the
//! triangulation, the domains and the refinement criteria.

use nalgebra::{Matrix3, Vector3};
use rand::Rng;

use crate::geometry::point::Point;

/// Circumcenter of the tetrahedron `(a, b, c, d)`.
///
/// Solves `2 (p_i - a) · x = |p_i - a|^2` for `x = center - a`.
/// Returns `None` if the tetrahedron is flat.
///
/// # Examples
///
/// ```rust
/// use tetmesh::geometry::point::Point;
/// use tetmesh::geometry::util::circumcenter;
///
/// let c = circumcenter(
///     &Point::new([0.0, 0.0, 0.0]),
///     &Point::new([2.0, 0.0, 0.0]),
///     &Point::new([0.0, 2.0, 0.0]),
///     &Point::new([0.0, 0.0, 2.0]),
/// )
/// .unwrap();
/// assert!((c.x() - 1.0).abs() < 1e-12);
/// ```
#[must_use]
pub fn circumcenter(a: &Point, b: &Point, c: &Point, d: &Point) -> Option<Point> {
    let ab = *b - *a;
    let ac = *c - *a;
    let ad = *d - *a;
    let m = Matrix3::from_rows(&[ab.transpose(), ac.transpose(), ad.transpose()]);
    let rhs = Vector3::new(ab.norm_squared(), ac.norm_squared(), ad.norm_squared()) * 0.5;
    let x = m.lu().solve(&rhs)?;
    let center = *a + x;
    center.is_finite().then_some(center)
}

/// Circumcenter of the triangle `(a, b, c)`, lying in its plane.
///
/// Returns `None` for a degenerate triangle.
#[must_use]
pub fn triangle_circumcenter(a: &Point, b: &Point, c: &Point) -> Option<Point> {
    let ab = *b - *a;
    let ac = *c - *a;
    let n = ab.cross(&ac);
    let n2 = n.norm_squared();
    if n2 <= f64::MIN_POSITIVE {
        return None;
    }
    let offset = (n.cross(&ab) * ac.norm_squared() + ac.cross(&n) * ab.norm_squared()) / (2.0 * n2);
    let center = *a + offset;
    center.is_finite().then_some(center)
}

/// Unnormalized normal `(b - a) × (c - a)` of the triangle `(a, b, c)`.
#[must_use]
pub fn triangle_normal(a: &Point, b: &Point, c: &Point) -> Vector3<f64> {
    (*b - *a).cross(&(*c - *a))
}

/// Area of the triangle `(a, b, c)`.
#[must_use]
pub fn triangle_area(a: &Point, b: &Point, c: &Point) -> f64 {
    0.5 * triangle_normal(a, b, c).norm()
}

/// Angle between two vectors, in degrees, in `[0, 180]`.
///
/// Returns `0` if either vector is null.
#[must_use]
pub fn angle_between_degrees(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    let nu = u.norm();
    let nv = v.norm();
    if nu <= f64::MIN_POSITIVE || nv <= f64::MIN_POSITIVE {
        return 0.0;
    }
    (u.dot(v) / (nu * nv)).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Smallest interior angle of the triangle `(a, b, c)`, in degrees.
#[must_use]
pub fn min_triangle_angle_degrees(a: &Point, b: &Point, c: &Point) -> f64 {
    let at_a = angle_between_degrees(&(*b - *a), &(*c - *a));
    let at_b = angle_between_degrees(&(*a - *b), &(*c - *b));
    let at_c = angle_between_degrees(&(*a - *c), &(*b - *c));
    at_a.min(at_b).min(at_c)
}

/// Uniformly distributed unit vector.
///
/// Rejection-samples the unit ball, then normalizes.
pub fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    loop {
        let v = Vector3::<f64>::new(
            rng.random_range(-1.0..=1.0),
            rng.random_range(-1.0..=1.0),
            rng.random_range(-1.0..=1.0),
        );
        let n2 = v.norm_squared();
        if n2 > 1e-6 && n2 <= 1.0 {
            return v / n2.sqrt();
        }
    }
}

/// Uniformly distributed point on the sphere of given `center` and `radius`.
pub fn random_point_on_sphere<R: Rng + ?Sized>(rng: &mut R, center: &Point, radius: f64) -> Point {
    *center + random_unit_vector(rng) * radius
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_circumcenter_is_equidistant() {
        let pts = [
            Point::new([0.1, -0.3, 0.2]),
            Point::new([1.7, 0.2, -0.4]),
            Point::new([0.3, 1.9, 0.5]),
            Point::new([-0.2, 0.4, 1.3]),
        ];
        let c = circumcenter(&pts[0], &pts[1], &pts[2], &pts[3]).unwrap();
        let r = c.distance(&pts[0]);
        for p in &pts[1..] {
            assert_relative_eq!(c.distance(p), r, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_circumcenter_flat_tetrahedron() {
        let a = Point::new([0.0, 0.0, 0.0]);
        let b = Point::new([1.0, 0.0, 0.0]);
        let c = Point::new([0.0, 1.0, 0.0]);
        let d = Point::new([1.0, 1.0, 0.0]);
        assert!(circumcenter(&a, &b, &c, &d).is_none());
    }

    #[test]
    fn test_triangle_circumcenter_in_plane() {
        let a = Point::new([1.0, 0.0, 5.0]);
        let b = Point::new([-1.0, 0.0, 5.0]);
        let c = Point::new([0.0, 1.0, 5.0]);
        let center = triangle_circumcenter(&a, &b, &c).unwrap();
        assert_relative_eq!(center.x(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(center.y(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(center.z(), 5.0, epsilon = 1e-12);
        assert!(triangle_circumcenter(&a, &a, &c).is_none());
    }

    #[test]
    fn test_angles() {
        let a = Point::new([0.0, 0.0, 0.0]);
        let b = Point::new([1.0, 0.0, 0.0]);
        let c = Point::new([0.5, 3.0_f64.sqrt() / 2.0, 0.0]);
        assert_relative_eq!(min_triangle_angle_degrees(&a, &b, &c), 60.0, epsilon = 1e-9);
        assert_relative_eq!(
            angle_between_degrees(&Vector3::x(), &Vector3::y()),
            90.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(triangle_area(&a, &b, &c), 3.0_f64.sqrt() / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_random_unit_vectors_have_unit_norm() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut sum = Vector3::zeros();
        for _ in 0..200 {
            let v = random_unit_vector(&mut rng);
            assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-12);
            sum += v;
        }
        // Directions spread over the sphere rather than clustering.
        assert!(sum.norm() / 200.0 < 0.25);
    }

    #[test]
    fn test_random_point_on_sphere() {
        let mut rng = StdRng::seed_from_u64(7);
        let center = Point::new([1.0, 2.0, 3.0]);
        for _ in 0..100 {
            let p = random_point_on_sphere(&mut rng, &center, 4.0);
            assert_relative_eq!(p.distance(&center), 4.0, epsilon = 1e-12);
        }
    }
}
