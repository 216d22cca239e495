//! Incremental Delaunay insertion using the cavity-based algorithm.
//!
//! This module implements insertion following CGAL's approach:
//! 1. Locate the cell containing the new point (facet walking)
//! 2. Find the conflict region (BFS with in-sphere tests)
//! 3. Check that the cavity is star-shaped from the new point
//! 4. Fill the cavity: one new cell per boundary facet, apex at the new vertex
//! 5. Wire neighbors locally (no global neighbor assignment)
//! 6. Remove the conflict cells
//!
//! Steps 1-3 never mutate the triangulation, so a rejected point leaves it
//! untouched.

use crate::core::algorithms::locate::{ConflictError, ConflictZone, LocateError};
use crate::core::cell::Cell;
use crate::core::collections::{CellKey, FastHashMap, VertexKey};
use crate::core::facet::{EdgeKey, Facet};
use crate::core::triangulation::Triangulation;
use crate::geometry::point::Point;
use crate::geometry::predicates::{Orientation, orientation};

/// Error during incremental insertion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InsertionError {
    /// Conflict region finding failed
    #[error("Conflict region error: {0}")]
    ConflictRegion(#[from] ConflictError),

    /// Point location failed
    #[error("Location error: {0}")]
    Location(#[from] LocateError),

    /// The point has a non-finite coordinate
    #[error("Cannot insert non-finite point {point}")]
    NonFinitePoint {
        /// The rejected point
        point: Point,
    },

    /// A new cell would not be positively oriented
    #[error("Cavity is not star-shaped from {point}: new cell would be {orientation}")]
    NonStarShapedCavity {
        /// The point being inserted
        point: Point,
        /// Orientation of the offending new cell
        orientation: Orientation,
    },

    /// Cavity filling failed
    #[error("Cavity filling failed: {message}")]
    CavityFilling {
        /// Error message
        message: String,
    },

    /// Neighbor wiring failed
    #[error("Neighbor wiring failed: {message}")]
    NeighborWiring {
        /// Error message
        message: String,
    },
}

/// Cells created and destroyed by one insertion.
#[derive(Debug, Clone, Default)]
pub struct InsertionOutcome {
    /// The new vertex.
    pub vertex: VertexKey,
    /// Cells incident to the new vertex.
    pub new_cells: Vec<CellKey>,
    /// Former conflict cells, no longer in the triangulation.
    pub removed_cells: Vec<CellKey>,
}

/// Checks that filling the cavity of `zone` with `point` yields a valid
/// triangulation: every new finite cell is positively oriented and every
/// cavity boundary edge is shared by exactly two boundary facets.
///
/// # Errors
///
/// Returns [`InsertionError::NonStarShapedCavity`] or
/// [`InsertionError::CavityFilling`] describing the first violation.
pub fn check_cavity(
    tr: &Triangulation,
    point: &Point,
    zone: &ConflictZone,
) -> Result<(), InsertionError> {
    let infinite = tr.infinite_vertex();
    let mut edge_use: FastHashMap<EdgeKey, u8> = FastHashMap::default();

    for facet in &zone.boundary_facets {
        let cell = tr
            .cell(facet.cell())
            .ok_or_else(|| InsertionError::CavityFilling {
                message: format!("Boundary facet cell {:?} not found", facet.cell()),
            })?;
        let i = facet.index_usize();

        let [a, b, c] = cell.facet_vertices(facet.index());
        for edge in [EdgeKey::new(a, b), EdgeKey::new(b, c), EdgeKey::new(a, c)] {
            *edge_use.entry(edge).or_insert(0) += 1;
        }

        let finite_new_cell = (0..4).all(|k| k == i || cell.vertex(k) != infinite);
        if !finite_new_cell {
            continue;
        }
        let mut pts = [Point::ORIGIN; 4];
        for (k, slot) in pts.iter_mut().enumerate() {
            *slot = if k == i {
                *point
            } else {
                *tr.point(cell.vertex(k))
                    .ok_or_else(|| InsertionError::CavityFilling {
                        message: format!("Vertex {:?} not found", cell.vertex(k)),
                    })?
            };
        }
        let o = orientation(&pts[0], &pts[1], &pts[2], &pts[3]);
        if o != Orientation::POSITIVE {
            return Err(InsertionError::NonStarShapedCavity {
                point: *point,
                orientation: o,
            });
        }
    }

    if let Some((edge, count)) = edge_use.iter().find(|&(_, &count)| count != 2) {
        return Err(InsertionError::CavityFilling {
            message: format!("Cavity boundary edge {edge:?} is used by {count} facets"),
        });
    }
    Ok(())
}

/// Fill cavity by creating new cells connecting boundary facets to new vertex.
///
/// The cell built on boundary facet `(c, i)` is `c` with vertex `i`
/// replaced by `new_vertex`, which preserves its orientation. Its neighbor
/// `i` is the cell outside the cavity, whose back pointer is updated.
///
/// # Errors
///
/// Returns error if a boundary cell or its outside neighbor is missing.
pub fn fill_cavity(
    tr: &mut Triangulation,
    new_vertex: VertexKey,
    boundary_facets: &[Facet],
) -> Result<Vec<CellKey>, InsertionError> {
    let mut new_cells = Vec::with_capacity(boundary_facets.len());

    for facet in boundary_facets {
        let boundary_cell =
            *tr.cell(facet.cell())
                .ok_or_else(|| InsertionError::CavityFilling {
                    message: format!("Boundary facet cell {:?} not found", facet.cell()),
                })?;
        let i = facet.index_usize();
        let outside = boundary_cell
            .neighbor(i)
            .ok_or_else(|| InsertionError::CavityFilling {
                message: format!("Boundary facet {facet:?} has no outside neighbor"),
            })?;

        let mut vertices = *boundary_cell.vertices();
        vertices[i] = new_vertex;
        let mut cell = Cell::new(vertices);
        cell.set_neighbor(i, Some(outside));
        let key = tr.cells.insert(cell);

        let outside_cell =
            tr.cells
                .get_mut(outside)
                .ok_or_else(|| InsertionError::NeighborWiring {
                    message: format!("External cell {outside:?} not found"),
                })?;
        let back = outside_cell
            .index_of_neighbor(facet.cell())
            .ok_or_else(|| InsertionError::NeighborWiring {
                message: format!("External cell {outside:?} does not point back"),
            })?;
        outside_cell.set_neighbor(back, Some(key));

        new_cells.push(key);
    }

    Ok(new_cells)
}

/// Wire neighbor relationships between the newly created cavity cells.
///
/// Two new cells are adjacent across a facet containing the new vertex;
/// such a facet is identified by its edge opposite the new vertex.
///
/// # Errors
///
/// Returns error if a new cell is missing or an edge is not shared by
/// exactly two new cells.
pub fn wire_cavity_neighbors(
    tr: &mut Triangulation,
    new_vertex: VertexKey,
    new_cells: &[CellKey],
) -> Result<(), InsertionError> {
    let mut facet_map: FastHashMap<EdgeKey, Vec<(CellKey, usize)>> = FastHashMap::default();

    for &cell_key in new_cells {
        let cell = tr
            .cell(cell_key)
            .ok_or_else(|| InsertionError::NeighborWiring {
                message: format!("New cell {cell_key:?} not found"),
            })?;
        let apex = cell
            .index_of(new_vertex)
            .ok_or_else(|| InsertionError::NeighborWiring {
                message: format!("New cell {cell_key:?} misses the new vertex"),
            })?;
        for k in (0..4).filter(|&k| k != apex) {
            let mut others = (0..4).filter(|&j| j != apex && j != k).map(|j| cell.vertex(j));
            let (Some(a), Some(b)) = (others.next(), others.next()) else {
                continue;
            };
            facet_map
                .entry(EdgeKey::new(a, b))
                .or_default()
                .push((cell_key, k));
        }
    }

    for (edge, cells) in facet_map {
        let [(c1, i1), (c2, i2)] = cells[..] else {
            return Err(InsertionError::NeighborWiring {
                message: format!("Edge {edge:?} is shared by {} new cells", cells.len()),
            });
        };
        set_neighbor(tr, c1, i1, c2)?;
        set_neighbor(tr, c2, i2, c1)?;
    }
    Ok(())
}

/// Helper: Set a single neighbor relationship
fn set_neighbor(
    tr: &mut Triangulation,
    cell_key: CellKey,
    facet_idx: usize,
    neighbor: CellKey,
) -> Result<(), InsertionError> {
    let cell = tr
        .cells
        .get_mut(cell_key)
        .ok_or_else(|| InsertionError::NeighborWiring {
            message: format!("Cell {cell_key:?} not found"),
        })?;
    cell.set_neighbor(facet_idx, Some(neighbor));
    Ok(())
}

/// Inserts `vertex` (already stored, not yet connected) into the cavity of `zone`.
///
/// # Errors
///
/// Returns error if the cavity is invalid; the triangulation is then unchanged.
pub fn insert_vertex_in_conflict_zone(
    tr: &mut Triangulation,
    vertex: VertexKey,
    zone: &ConflictZone,
) -> Result<InsertionOutcome, InsertionError> {
    if let Some(&stale) = zone.tested_cells.iter().find(|&&c| !tr.contains_cell(c)) {
        return Err(ConflictError::InvalidStartCell { cell_key: stale }.into());
    }
    let point = *tr
        .point(vertex)
        .ok_or_else(|| InsertionError::CavityFilling {
            message: format!("Vertex {vertex:?} not found"),
        })?;
    check_cavity(tr, &point, zone)?;

    let new_cells = fill_cavity(tr, vertex, &zone.boundary_facets)?;
    wire_cavity_neighbors(tr, vertex, &new_cells)?;

    for &c in &zone.cells {
        tr.cells.remove(c);
    }
    for &c in &new_cells {
        if let Some(cell) = tr.cells.get(c).copied() {
            for v in cell.vertices() {
                if let Some(vertex) = tr.vertices.get_mut(*v) {
                    vertex.incident_cell = Some(c);
                }
            }
        }
    }

    Ok(InsertionOutcome {
        vertex,
        new_cells,
        removed_cells: zone.cells.clone(),
    })
}
