//! Axis-aligned bounding box tree over triangles.
//!
//! The tree answers the three queries the mesh domains need:
//!
//! - [`AabbTree::first_ray_hit`]: the nearest triangle hit by a ray, flagged
//!   as degenerate when the hit lies on a triangle edge or vertex, coincides
//!   with another hit, or starts on the surface. Point classification retries
//!   with another direction on degenerate hits.
//! - [`AabbTree::first_segment_intersection`] /
//!   [`AabbTree::first_ray_intersection`]: the intersection point nearest to the
//!   query origin, used to place vertices on the surface.
//! - [`AabbTree::primitives_in_bbox`]: candidate triangles overlapping a box.
//!
//! Nodes split at the median centroid along the longest axis of their box.

use nalgebra::Vector3;

use crate::geometry::point::{Bbox3, Point};

const MAX_LEAF_SIZE: usize = 8;
const BARYCENTRIC_TOLERANCE: f64 = 1e-10;
const PARAMETER_TOLERANCE: f64 = 1e-10;

// =============================================================================
// PRIMITIVES
// =============================================================================

/// A triangle in 3D.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    /// The three corners.
    pub vertices: [Point; 3],
}

impl Triangle {
    /// Creates a triangle from its corners.
    #[must_use]
    pub const fn new(a: Point, b: Point, c: Point) -> Self {
        Self {
            vertices: [a, b, c],
        }
    }

    /// Bounding box of the triangle.
    #[must_use]
    pub fn bbox(&self) -> Bbox3 {
        Bbox3::from_points(&self.vertices)
    }

    /// Centroid of the triangle.
    #[must_use]
    pub fn centroid(&self) -> Point {
        let [a, b, c] = self.vertices;
        Point::new([
            (a.x() + b.x() + c.x()) / 3.0,
            (a.y() + b.y() + c.y()) / 3.0,
            (a.z() + b.z() + c.z()) / 3.0,
        ])
    }

    /// Intersection of the line `origin + t * dir` with the triangle
    /// (Möller–Trumbore). Returns `(t, u, v)` with barycentric `u, v`.
    fn intersect_line(&self, origin: &Point, dir: &Vector3<f64>) -> Option<(f64, f64, f64)> {
        let [v0, v1, v2] = self.vertices;
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;
        let h = dir.cross(&edge2);
        let det = edge1.dot(&h);
        let scale = edge1.norm() * edge2.norm() * dir.norm();
        if det.abs() <= 1e-14 * scale {
            return None;
        }
        let inv = 1.0 / det;
        let s = *origin - v0;
        let u = inv * s.dot(&h);
        if !(-BARYCENTRIC_TOLERANCE..=1.0 + BARYCENTRIC_TOLERANCE).contains(&u) {
            return None;
        }
        let q = s.cross(&edge1);
        let v = inv * dir.dot(&q);
        if v < -BARYCENTRIC_TOLERANCE || u + v > 1.0 + BARYCENTRIC_TOLERANCE {
            return None;
        }
        Some((inv * edge2.dot(&q), u, v))
    }
}

/// Result of [`AabbTree::first_ray_hit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RayHit<Id> {
    /// The ray hits no triangle.
    Miss,
    /// The nearest hit is ambiguous and the query must be retried.
    Degenerate,
    /// Unambiguous nearest hit.
    Hit {
        /// Index of the triangle in the tree.
        primitive: usize,
        /// Caller-supplied id of the triangle.
        id: Id,
        /// Intersection point.
        point: Point,
    },
}

// =============================================================================
// TREE
// =============================================================================

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        bbox: Bbox3,
        primitives: Vec<usize>,
    },
    Internal {
        bbox: Bbox3,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    const fn bbox(&self) -> &Bbox3 {
        match self {
            Self::Leaf { bbox, .. } | Self::Internal { bbox, .. } => bbox,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct NearestHit {
    t: f64,
    primitive: usize,
    on_boundary: bool,
    tie: bool,
}

/// Bounding volume hierarchy over triangles tagged with an id.
#[derive(Debug, Clone)]
pub struct AabbTree<Id> {
    primitives: Vec<(Triangle, Id)>,
    root: Option<Node>,
}

impl<Id: Copy> AabbTree<Id> {
    /// Builds the tree.
    #[must_use]
    pub fn new(primitives: Vec<(Triangle, Id)>) -> Self {
        if primitives.is_empty() {
            return Self {
                primitives,
                root: None,
            };
        }
        let boxes: Vec<(Bbox3, Point)> = primitives
            .iter()
            .map(|(t, _)| (t.bbox(), t.centroid()))
            .collect();
        let root = Self::build_recursive(&boxes, (0..primitives.len()).collect());
        Self {
            primitives,
            root: Some(root),
        }
    }

    fn build_recursive(boxes: &[(Bbox3, Point)], mut indices: Vec<usize>) -> Node {
        let mut bbox = Bbox3::empty();
        for &i in &indices {
            bbox = bbox.union(&boxes[i].0);
        }
        if indices.len() <= MAX_LEAF_SIZE {
            return Node::Leaf {
                bbox,
                primitives: indices,
            };
        }

        let axis = bbox.longest_axis();
        indices.sort_by(|&a, &b| boxes[a].1.coords()[axis].total_cmp(&boxes[b].1.coords()[axis]));
        let right_indices = indices.split_off(indices.len() / 2);
        let left = Self::build_recursive(boxes, indices);
        let right = Self::build_recursive(boxes, right_indices);
        Node::Internal {
            bbox,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Number of triangles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    /// Returns `true` if the tree holds no triangle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    /// Bounding box of all triangles.
    #[must_use]
    pub fn bbox(&self) -> Bbox3 {
        self.root.as_ref().map_or_else(Bbox3::empty, |n| *n.bbox())
    }

    /// The triangle stored at `index` and its id.
    #[must_use]
    pub fn primitive(&self, index: usize) -> Option<&(Triangle, Id)> {
        self.primitives.get(index)
    }

    /// Iterates over all triangles and ids.
    pub fn primitives(&self) -> impl Iterator<Item = &(Triangle, Id)> {
        self.primitives.iter()
    }

    /// Nearest triangle hit by the ray `origin + t * dir`, `t > 0`.
    #[must_use]
    pub fn first_ray_hit(&self, origin: &Point, dir: &Vector3<f64>) -> RayHit<Id> {
        let Some(nearest) = self.nearest(origin, dir, f64::INFINITY) else {
            return RayHit::Miss;
        };
        if nearest.tie || nearest.on_boundary || nearest.t <= PARAMETER_TOLERANCE {
            return RayHit::Degenerate;
        }
        let (_, id) = self.primitives[nearest.primitive];
        RayHit::Hit {
            primitive: nearest.primitive,
            id,
            point: *origin + dir * nearest.t,
        }
    }

    /// Intersection of the segment `[a, b]` with the triangles nearest to `a`.
    #[must_use]
    pub fn first_segment_intersection(&self, a: &Point, b: &Point) -> Option<(Point, Id)> {
        let dir = *b - *a;
        let nearest = self.nearest(a, &dir, 1.0)?;
        let (_, id) = self.primitives[nearest.primitive];
        Some((*a + dir * nearest.t.clamp(0.0, 1.0), id))
    }

    /// Intersection of the ray `origin + t * dir` with the triangles nearest to `origin`.
    #[must_use]
    pub fn first_ray_intersection(&self, origin: &Point, dir: &Vector3<f64>) -> Option<(Point, Id)> {
        let nearest = self.nearest(origin, dir, f64::INFINITY)?;
        let (_, id) = self.primitives[nearest.primitive];
        Some((*origin + dir * nearest.t.max(0.0), id))
    }

    /// Indices of triangles whose boxes overlap `query`.
    #[must_use]
    pub fn primitives_in_bbox(&self, query: &Bbox3, tolerance: f64) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                if !node.bbox().intersects(query, tolerance) {
                    continue;
                }
                match node {
                    Node::Leaf { primitives, .. } => out.extend(
                        primitives
                            .iter()
                            .copied()
                            .filter(|&i| self.primitives[i].0.bbox().intersects(query, tolerance)),
                    ),
                    Node::Internal { left, right, .. } => {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }
        out
    }

    fn nearest(&self, origin: &Point, dir: &Vector3<f64>, t_max: f64) -> Option<NearestHit> {
        let root = self.root.as_ref()?;
        let mut best: Option<NearestHit> = None;
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let limit = best.map_or(t_max, |b| (b.t + tie_tolerance(b.t)).min(t_max));
            if node.bbox().clip_line(origin, dir, 0.0, limit).is_none() {
                continue;
            }
            match node {
                Node::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
                Node::Leaf { primitives, .. } => {
                    for &i in primitives {
                        let Some((t, u, v)) = self.primitives[i].0.intersect_line(origin, dir) else {
                            continue;
                        };
                        if t < -PARAMETER_TOLERANCE || t > t_max + PARAMETER_TOLERANCE {
                            continue;
                        }
                        let on_boundary = u.min(v).min(1.0 - u - v) <= BARYCENTRIC_TOLERANCE;
                        let candidate = NearestHit {
                            t,
                            primitive: i,
                            on_boundary,
                            tie: false,
                        };
                        best = Some(match best {
                            Some(b) if (t - b.t).abs() <= tie_tolerance(b.t) => {
                                let kept = if t < b.t { candidate } else { b };
                                NearestHit { tie: true, ..kept }
                            }
                            Some(b) if b.t < t => b,
                            _ => candidate,
                        });
                    }
                }
            }
        }
        best
    }
}

fn tie_tolerance(t: f64) -> f64 {
    PARAMETER_TOLERANCE * t.abs().max(1.0)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two unit squares at z = 0 and z = 1, each split in two triangles.
    fn two_layers() -> AabbTree<u32> {
        let square = |z: f64, id: u32| {
            let p = |x: f64, y: f64| Point::new([x, y, z]);
            vec![
                (Triangle::new(p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)), id),
                (Triangle::new(p(0.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)), id),
            ]
        };
        let mut prims = square(0.0, 1);
        prims.extend(square(1.0, 2));
        AabbTree::new(prims)
    }

    #[test]
    fn test_first_ray_hit_nearest() {
        let tree = two_layers();
        let origin = Point::new([0.3, 0.6, -1.0]);
        match tree.first_ray_hit(&origin, &Vector3::new(0.0, 0.0, 1.0)) {
            RayHit::Hit { id, point, .. } => {
                assert_eq!(id, 1);
                assert_relative_eq!(point.z(), 0.0, epsilon = 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
        let above = Point::new([0.3, 0.6, 2.0]);
        assert!(matches!(
            tree.first_ray_hit(&above, &Vector3::new(0.0, 0.0, -1.0)),
            RayHit::Hit { id: 2, .. }
        ));
        assert_eq!(
            tree.first_ray_hit(&above, &Vector3::new(0.0, 0.0, 1.0)),
            RayHit::Miss
        );
    }

    #[test]
    fn test_first_ray_hit_on_diagonal_is_degenerate() {
        let tree = two_layers();
        // The diagonal x == y is shared by both triangles of each square.
        let origin = Point::new([0.5, 0.5, -1.0]);
        assert_eq!(
            tree.first_ray_hit(&origin, &Vector3::new(0.0, 0.0, 1.0)),
            RayHit::Degenerate
        );
    }

    #[test]
    fn test_segment_intersection() {
        let tree = two_layers();
        let (p, id) = tree
            .first_segment_intersection(&Point::new([0.2, 0.7, 1.5]), &Point::new([0.2, 0.7, -0.5]))
            .unwrap();
        assert_eq!(id, 2);
        assert_relative_eq!(p.z(), 1.0, epsilon = 1e-12);
        assert!(
            tree.first_segment_intersection(&Point::new([0.2, 0.7, 0.2]), &Point::new([0.2, 0.7, 0.8]))
                .is_none()
        );
    }

    #[test]
    fn test_bbox_query_and_accessors() {
        let tree = two_layers();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.bbox(), Bbox3::new([0.0; 3], [1.0; 3]));
        let near_top = Bbox3::new([0.0, 0.0, 0.9], [1.0, 1.0, 1.1]);
        let hits = tree.primitives_in_bbox(&near_top, 0.0);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|&i| tree.primitive(i).unwrap().1 == 2));
        assert!(AabbTree::<u32>::new(Vec::new()).bbox().is_empty());
    }
}
