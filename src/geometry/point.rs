//! Data and operations on 3D points.
//!
//! # Equality Semantics
//!
//! [`Point`] equality compares coordinates bit-for-bit after normalizing
//! `-0.0` to `0.0`, and treats all `NaN` bit patterns as equal so that points
//! can be used as keys in hash-based collections. Geometric comparisons with a
//! tolerance should use [`Point::squared_distance`] instead.

#![allow(clippy::similar_names)]

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};

// =============================================================================
// POINT STRUCT DEFINITION
// =============================================================================

/// A point in 3D Euclidean space with `f64` coordinates.
///
/// # Examples
///
/// ```rust
/// use tetmesh::geometry::point::Point;
///
/// let p = Point::new([1.0, 2.0, 3.0]);
/// assert_eq!(p.coords(), &[1.0, 2.0, 3.0]);
/// assert_eq!(p.z(), 3.0);
/// ```
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Point {
    coords: [f64; 3],
}

impl Point {
    /// The origin `(0, 0, 0)`.
    pub const ORIGIN: Self = Self::new([0.0, 0.0, 0.0]);

    /// Creates a point from its coordinates.
    #[must_use]
    pub const fn new(coords: [f64; 3]) -> Self {
        Self { coords }
    }

    /// Returns the coordinate array.
    #[must_use]
    pub const fn coords(&self) -> &[f64; 3] {
        &self.coords
    }

    /// The `x` coordinate.
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.coords[0]
    }

    /// The `y` coordinate.
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.coords[1]
    }

    /// The `z` coordinate.
    #[must_use]
    pub const fn z(&self) -> f64 {
        self.coords[2]
    }

    /// Position vector of the point.
    #[must_use]
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.coords[0], self.coords[1], self.coords[2])
    }

    /// Point at the tip of a position vector.
    #[must_use]
    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new([v.x, v.y, v.z])
    }

    /// Squared Euclidean distance to `other`.
    #[must_use]
    pub fn squared_distance(&self, other: &Self) -> f64 {
        (*self - *other).norm_squared()
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        self.squared_distance(other).sqrt()
    }

    /// Midpoint of the segment `[self, other]`.
    #[must_use]
    pub fn midpoint(&self, other: &Self) -> Self {
        Self::new([
            0.5 * (self.coords[0] + other.coords[0]),
            0.5 * (self.coords[1] + other.coords[1]),
            0.5 * (self.coords[2] + other.coords[2]),
        ])
    }

    /// Returns `true` if every coordinate is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    fn normalized_bits(&self) -> [u64; 3] {
        self.coords.map(|c| {
            if c.is_nan() {
                f64::NAN.to_bits()
            } else if c == 0.0 {
                0.0_f64.to_bits()
            } else {
                c.to_bits()
            }
        })
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_bits() == other.normalized_bits()
    }
}

impl Eq for Point {}

impl Hash for Point {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_bits().hash(state);
    }
}

impl From<[f64; 3]> for Point {
    fn from(coords: [f64; 3]) -> Self {
        Self::new(coords)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.coords[0], self.coords[1], self.coords[2]
        )
    }
}

impl Sub for Point {
    type Output = Vector3<f64>;

    fn sub(self, rhs: Self) -> Vector3<f64> {
        self.to_vector() - rhs.to_vector()
    }
}

impl Add<Vector3<f64>> for Point {
    type Output = Self;

    fn add(self, rhs: Vector3<f64>) -> Self {
        Self::from_vector(&(self.to_vector() + rhs))
    }
}

// =============================================================================
// BOUNDING BOX
// =============================================================================

/// Axis-aligned bounding box in 3D.
///
/// An empty box has `min > max` on every axis; extending it with a point
/// makes it the degenerate box around that point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bbox3 {
    /// Lower corner.
    pub min: [f64; 3],
    /// Upper corner.
    pub max: [f64; 3],
}

impl Default for Bbox3 {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bbox3 {
    /// The empty box.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Box with the given corners.
    #[must_use]
    pub const fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all `points`.
    #[must_use]
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut bbox = Self::empty();
        for p in points {
            bbox.extend(p);
        }
        bbox
    }

    /// Returns `true` if the box contains no point.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// Grows the box to contain `p`.
    pub fn extend(&mut self, p: &Point) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p.coords[i]);
            self.max[i] = self.max[i].max(p.coords[i]);
        }
    }

    /// Smallest box containing both boxes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for i in 0..3 {
            out.min[i] = out.min[i].min(other.min[i]);
            out.max[i] = out.max[i].max(other.max[i]);
        }
        out
    }

    /// Returns `true` if `p` lies in the closed box.
    #[must_use]
    pub fn contains(&self, p: &Point) -> bool {
        (0..3).all(|i| self.min[i] <= p.coords[i] && p.coords[i] <= self.max[i])
    }

    /// Center of the box.
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new([
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ])
    }

    /// Extent along each axis.
    #[must_use]
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Length of the box diagonal, `0` for an empty box.
    #[must_use]
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.extent();
        e[2].mul_add(e[2], e[0].mul_add(e[0], e[1] * e[1])).sqrt()
    }

    /// Index of the longest axis.
    #[must_use]
    pub fn longest_axis(&self) -> usize {
        let e = self.extent();
        if e[0] >= e[1] && e[0] >= e[2] {
            0
        } else if e[1] >= e[2] {
            1
        } else {
            2
        }
    }

    /// Returns `true` if the boxes overlap, allowing a gap of `tolerance`.
    #[must_use]
    pub fn intersects(&self, other: &Self, tolerance: f64) -> bool {
        (0..3).all(|i| {
            self.max[i] + tolerance >= other.min[i] && other.max[i] + tolerance >= self.min[i]
        })
    }

    /// Parameter interval `[t_min, t_max]` over which the line
    /// `origin + t * dir` stays inside the box, clipped to `[t0, t1]`.
    #[must_use]
    pub fn clip_line(
        &self,
        origin: &Point,
        dir: &Vector3<f64>,
        t0: f64,
        t1: f64,
    ) -> Option<(f64, f64)> {
        let mut lo = t0;
        let mut hi = t1;
        for i in 0..3 {
            let o = origin.coords[i];
            let d = dir[i];
            if d.abs() < f64::MIN_POSITIVE {
                if o < self.min[i] || o > self.max[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut ta = (self.min[i] - o) * inv;
            let mut tb = (self.max[i] - o) * inv;
            if ta > tb {
                std::mem::swap(&mut ta, &mut tb);
            }
            lo = lo.max(ta);
            hi = hi.min(tb);
            if lo > hi {
                return None;
            }
        }
        Some((lo, hi))
    }
}

// =============================================================================
// TESTS
// =============================================================================
