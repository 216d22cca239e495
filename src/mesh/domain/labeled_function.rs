//! Implicit domain given by a labeling function.
//!
//! Every point of the bounding box is mapped to a subdomain index; label `0`
//! and everything outside the box is the exterior. The boundary between two
//! labels is found by bisection along query segments.

use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::geometry::point::{Bbox3, Point};
use crate::geometry::util::random_unit_vector;
use crate::mesh::domain::{MeshDomain, PatchIndex, SubdomainIndex, SurfaceIntersection};
use crate::mesh::error::DomainError;

/// Default bisection precision, relative to the box diagonal.
pub const DEFAULT_RELATIVE_ERROR_BOUND: f64 = 1e-3;

/// Domain described by `function: point -> subdomain`.
#[derive(Clone, Debug)]
pub struct LabeledFunctionDomain<F> {
    function: F,
    bbox: Bbox3,
    relative_error_bound: f64,
    seed: u64,
}

impl<F> LabeledFunctionDomain<F>
where
    F: Fn(&Point) -> SubdomainIndex + Sync,
{
    /// Creates the domain of `function` restricted to `bbox`.
    #[must_use]
    pub const fn new(function: F, bbox: Bbox3) -> Self {
        Self {
            function,
            bbox,
            relative_error_bound: DEFAULT_RELATIVE_ERROR_BOUND,
            seed: 0,
        }
    }

    /// Sets the bisection precision relative to the box diagonal.
    #[must_use]
    pub const fn with_relative_error_bound(mut self, bound: f64) -> Self {
        self.relative_error_bound = bound;
        self
    }

    /// Sets the seed used to pick initial point directions.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Label of `p`; exterior outside the box.
    #[must_use]
    pub fn label(&self, p: &Point) -> SubdomainIndex {
        if self.bbox.contains(p) {
            (self.function)(p)
        } else {
            SubdomainIndex::EXTERIOR
        }
    }

    /// Patch separating subdomains `a` and `b`, in either order.
    #[must_use]
    pub const fn patch_index(a: SubdomainIndex, b: SubdomainIndex) -> PatchIndex {
        let (lo, hi) = if a.0 < b.0 { (a.0, b.0) } else { (b.0, a.0) };
        PatchIndex(hi * hi.saturating_sub(1) / 2 + lo + 1)
    }

    /// The two subdomains separated by `patch`, lower index first.
    #[must_use]
    pub fn incident_subdomains(patch: PatchIndex) -> Option<(SubdomainIndex, SubdomainIndex)> {
        let k = patch.0.checked_sub(1)?;
        let mut hi = 1u32;
        while (hi + 1) * hi / 2 <= k {
            hi += 1;
        }
        let lo = k - hi * (hi - 1) / 2;
        Some((SubdomainIndex(lo), SubdomainIndex(hi)))
    }

    fn bisect(&self, a: &Point, b: &Point) -> Option<SurfaceIntersection> {
        let la = self.label(a);
        let lb = self.label(b);
        if la == lb {
            return None;
        }
        let tolerance = self.relative_error_bound * self.bbox.diagonal();
        let tol2 = tolerance * tolerance;
        let (mut lo, mut hi) = (*a, *b);
        // Keeps label(lo) == la and label(hi) != la.
        while lo.squared_distance(&hi) > tol2 {
            let mid = lo.midpoint(&hi);
            if self.label(&mid) == la {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Some(SurfaceIntersection {
            point: lo.midpoint(&hi),
            patch: Self::patch_index(la, self.label(&hi)),
        })
    }
}

impl<F> MeshDomain for LabeledFunctionDomain<F>
where
    F: Fn(&Point) -> SubdomainIndex + Sync,
{
    fn bbox(&self) -> Bbox3 {
        self.bbox
    }

    fn is_in_domain(&self, p: &Point) -> Result<Option<SubdomainIndex>, DomainError> {
        let label = self.label(p);
        Ok((!label.is_exterior()).then_some(label))
    }

    fn intersect_segment(&self, a: &Point, b: &Point) -> Option<SurfaceIntersection> {
        self.bisect(a, b)
    }

    fn intersect_ray(&self, origin: &Point, dir: &Vector3<f64>) -> Option<SurfaceIntersection> {
        let (_, t_exit) = self.bbox.clip_line(origin, dir, 0.0, f64::INFINITY)?;
        // Step just past the box so the far end is exterior.
        let margin = 1e-6 * self.bbox.diagonal() / dir.norm().max(f64::MIN_POSITIVE);
        let end = *origin + dir * (t_exit + margin);
        self.bisect(origin, &end)
    }

    fn construct_initial_points(&self, n: usize) -> Vec<SurfaceIntersection> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let center = self.bbox.center();
        let mut points = Vec::with_capacity(n);
        for _ in 0..n.saturating_mul(50) {
            if points.len() >= n {
                break;
            }
            let dir = random_unit_vector(&mut rng);
            if let Some(hit) = self.intersect_ray(&center, &dir) {
                points.push(hit);
            }
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    type LabelFn = fn(&Point) -> SubdomainIndex;

    fn unit_ball(p: &Point) -> SubdomainIndex {
        SubdomainIndex(u32::from(p.squared_distance(&Point::ORIGIN) < 1.0))
    }

    fn domain() -> LabeledFunctionDomain<LabelFn> {
        LabeledFunctionDomain::new(unit_ball as LabelFn, Bbox3::new([-2.0; 3], [2.0; 3]))
            .with_relative_error_bound(1e-6)
    }

    #[test]
    fn test_exact_classification_ignores_the_retry_cap() {
        let d = domain();
        assert_eq!(
            d.is_in_domain_with_retries(&Point::ORIGIN, 0).unwrap(),
            Some(SubdomainIndex(1))
        );
        assert_eq!(
            d.is_in_domain_with_retries(&Point::new([1.5, 0.0, 0.0]), 0).unwrap(),
            None
        );
    }

    #[test]
    fn test_patch_indices_are_a_bijection_on_pairs() {
        let mut seen = std::collections::BTreeSet::new();
        for hi in 1..8 {
            for lo in 0..hi {
                let patch = LabeledFunctionDomain::<LabelFn>::patch_index(
                    SubdomainIndex(lo),
                    SubdomainIndex(hi),
                );
                assert!(seen.insert(patch));
                assert_eq!(
                    LabeledFunctionDomain::<LabelFn>::incident_subdomains(patch),
                    Some((SubdomainIndex(lo), SubdomainIndex(hi)))
                );
            }
        }
        assert_eq!(seen.len(), 28);
        assert_eq!(
            LabeledFunctionDomain::<LabelFn>::patch_index(SubdomainIndex(0), SubdomainIndex(1)),
            PatchIndex(1)
        );
    }

    #[test]
    fn test_classification() {
        let d = domain();
        assert_eq!(d.is_in_domain(&Point::ORIGIN).unwrap(), Some(SubdomainIndex(1)));
        assert_eq!(d.is_in_domain(&Point::new([1.5, 0.0, 0.0])).unwrap(), None);
        assert_eq!(d.is_in_domain(&Point::new([9.0, 0.0, 0.0])).unwrap(), None);
    }

    #[test]
    fn test_segment_and_ray_intersections() {
        let d = domain();
        let hit = d
            .intersect_segment(&Point::ORIGIN, &Point::new([1.8, 0.0, 0.0]))
            .unwrap();
        assert_relative_eq!(hit.point.x(), 1.0, epsilon = 1e-5);
        assert_eq!(hit.patch, PatchIndex(1));
        assert!(
            d.intersect_segment(&Point::ORIGIN, &Point::new([0.5, 0.0, 0.0]))
                .is_none()
        );

        let ray = d
            .intersect_ray(&Point::ORIGIN, &Vector3::new(0.0, 0.0, -3.0))
            .unwrap();
        assert_relative_eq!(ray.point.z(), -1.0, epsilon = 1e-5);
        assert!(
            d.intersect_ray(&Point::new([5.0, 5.0, 5.0]), &Vector3::new(1.0, 0.0, 0.0))
                .is_none()
        );
    }

    #[test]
    fn test_initial_points_lie_on_sphere() {
        let points = domain().with_seed(3).construct_initial_points(10);
        assert_eq!(points.len(), 10);
        for sp in points {
            assert_relative_eq!(sp.point.distance(&Point::ORIGIN), 1.0, epsilon = 1e-5);
        }
    }
}
