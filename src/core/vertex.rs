//! Triangulation vertices.
//!
//! A vertex stores its position and one incident cell. The incident cell is
//! a hint kept valid by every insertion; it seeds point location and the
//! traversal of the vertex star.

use serde::{Deserialize, Serialize};

use crate::core::collections::CellKey;
use crate::geometry::point::Point;

/// A vertex of the triangulation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    point: Point,
    #[serde(skip)]
    pub(crate) incident_cell: Option<CellKey>,
}

impl Vertex {
    /// Creates a vertex with no incident cell.
    #[must_use]
    pub const fn new(point: Point) -> Self {
        Self {
            point,
            incident_cell: None,
        }
    }

    /// Position of the vertex.
    #[must_use]
    pub const fn point(&self) -> &Point {
        &self.point
    }

    /// One cell incident to the vertex, if the vertex is connected.
    #[must_use]
    pub const fn incident_cell(&self) -> Option<CellKey> {
        self.incident_cell
    }
}
