//! Refinement levels and the protocol connecting them.
//!
//! The mesher runs two levels: facets (the surface approximation) and
//! cells (the volume). Each level owns a priority queue of bad elements
//! and fixes the worst one by inserting a vertex. A level's step is split
//! in a read-only [`prepare`](facets::FacetLevel::prepare) phase and a
//! mutating [`commit`](facets::FacetLevel::commit) phase so the parallel
//! driver can run the first under a shared lock.

pub mod cells;
pub mod facets;
pub mod level;
pub mod visitor;
pub mod worklist;

use std::fmt;

use crate::core::algorithms::locate::ConflictZone;
use crate::geometry::point::Point;
use crate::mesh::complex::{MeshComplex, VertexInfo};
use crate::mesh::config::MesherConfig;
use crate::mesh::observer::{DiscardReason, RefinementObserver};
use crate::mesh::refinement::worklist::BadElement;

/// Stage of a refinement run. Stages only move forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefinementStage {
    /// `initialize` has not run.
    #[default]
    NotInitialized,
    /// Refining bad facets.
    RefineFacets,
    /// Also repairing non-manifold restricted edges.
    RefineFacetsAndEdges,
    /// Also repairing non-manifold surface vertices.
    RefineFacetsAndEdgesAndVertices,
    /// Refining cells; facet refinement is driven through the visitor.
    RefineAll,
}

impl fmt::Display for RefinementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotInitialized => "not initialized",
            Self::RefineFacets => "facets",
            Self::RefineFacetsAndEdges => "facets and edges",
            Self::RefineFacetsAndEdgesAndVertices => "facets, edges and vertices",
            Self::RefineAll => "all",
        };
        f.write_str(name)
    }
}

/// Answer of a conflict test on a refinement point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConflictStatus {
    /// The point can be inserted.
    NoConflict,
    /// The point must wait; the record goes back to the queue.
    ConflictButElementCanBeReconsidered,
    /// The point must not be inserted; the record is dropped.
    ConflictAndElementShouldBeDropped,
    /// Parallel only: the neighborhood is locked by another worker.
    CouldNotLockZone,
}

/// What a single step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The queue was empty.
    Empty,
    /// A vertex was inserted.
    Inserted,
    /// The popped record was discarded or queued again.
    Discarded(DiscardReason),
    /// The vertex budget stopped the step before it started.
    BudgetReached,
}

/// Read-only inputs shared by every step.
pub struct RefinementContext<'a, D: ?Sized> {
    /// The domain.
    pub domain: &'a D,
    /// Run configuration.
    pub config: &'a MesherConfig,
    /// Event sink.
    pub observer: &'a dyn RefinementObserver,
}

impl<D: ?Sized> Clone for RefinementContext<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: ?Sized> Copy for RefinementContext<'_, D> {}

impl<D: ?Sized> RefinementContext<'_, D> {
    /// Returns `true` once the complex holds the configured number of
    /// vertices.
    #[must_use]
    pub fn budget_reached(&self, complex: &MeshComplex) -> bool {
        self.config.max_vertices > 0
            && complex.triangulation().number_of_vertices() >= self.config.max_vertices
    }
}

/// Everything needed to insert the refinement point of a record.
#[derive(Clone, Debug)]
pub struct PreparedInsertion<E> {
    /// The record being fixed.
    pub record: BadElement<E>,
    /// The refinement point.
    pub point: Point,
    /// Label of the new vertex.
    pub info: VertexInfo,
    /// Conflict zone of `point`.
    pub zone: ConflictZone,
}

/// Result of the read-only phase of a step.
#[derive(Clone, Debug)]
pub enum Preparation<E> {
    /// Ready to insert.
    Ready(PreparedInsertion<E>),
    /// The record must be dropped.
    Discard(DiscardReason),
    /// The record must be queued again.
    Requeue(BadElement<E>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_are_ordered() {
        assert!(RefinementStage::NotInitialized < RefinementStage::RefineFacets);
        assert!(RefinementStage::RefineFacets < RefinementStage::RefineFacetsAndEdges);
        assert!(
            RefinementStage::RefineFacetsAndEdges
                < RefinementStage::RefineFacetsAndEdgesAndVertices
        );
        assert!(RefinementStage::RefineFacetsAndEdgesAndVertices < RefinementStage::RefineAll);
        assert_eq!(RefinementStage::RefineAll.to_string(), "all");
    }

    #[test]
    fn test_budget() {
        let mut complex = MeshComplex::default();
        let mut config = MesherConfig::default();
        let observer = crate::mesh::observer::NullObserver;
        let ctx = RefinementContext {
            domain: &(),
            config: &config,
            observer: &observer,
        };
        assert!(!ctx.budget_reached(&complex));
        config.max_vertices = 1;
        let ctx = RefinementContext {
            domain: &(),
            config: &config,
            observer: &observer,
        };
        assert!(!ctx.budget_reached(&complex));

        complex
            .insert_point(Point::ORIGIN, VertexInfo::FAR)
            .unwrap();
        let ctx = RefinementContext {
            domain: &(),
            config: &config,
            observer: &observer,
        };
        assert!(ctx.budget_reached(&complex));
    }
}
