//! Notification chain between refinement levels.
//!
//! A level talks to the level below it only through its visitor:
//!
//! ```text
//! cell level --CellsVisitor--> facet level --FacetsVisitor--> (cells, when active)
//! ```
//!
//! [`CellsVisitor`] lets the cell level drain the facet level before each
//! step, test its refinement points for encroachment and keep the
//! restricted surface up to date. [`FacetsVisitor`] forwards facet-level
//! insertions to the cell level once cell refinement has started.
//! Visitors are rebuilt for every step from borrowed levels; they hold no
//! state of their own.

use crate::core::algorithms::incremental_insertion::InsertionOutcome;
use crate::core::algorithms::locate::ConflictZone;
use crate::geometry::point::Point;
use crate::mesh::complex::MeshComplex;
use crate::mesh::criteria::{CellCriteria, FacetCriteria};
use crate::mesh::domain::MeshDomain;
use crate::mesh::error::MeshError;
use crate::mesh::refinement::cells::CellLevel;
use crate::mesh::refinement::facets::FacetLevel;
use crate::mesh::refinement::{ConflictStatus, RefinementContext, StepOutcome};

/// Hooks a level calls on the levels below it.
pub trait MeshVisitor: Sync {
    /// Refines the previous level until its queue is empty. Returns `false`
    /// if the vertex budget stopped it.
    ///
    /// # Errors
    ///
    /// Returns the previous level's error.
    fn refine_previous_level<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> Result<bool, MeshError>;

    /// Returns `true` if the previous level has nothing queued.
    fn previous_level_is_done(&self) -> bool;

    /// Tests whether inserting `point` would break an element of the
    /// previous level.
    fn test_point_conflict_from_superior(
        &self,
        complex: &MeshComplex,
        point: &Point,
        zone: &ConflictZone,
    ) -> ConflictStatus;

    /// Called before the cells of `zone` are destroyed.
    fn before_insertion(&self, complex: &MeshComplex, zone: &ConflictZone);

    /// Called after a vertex was inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if a new element cannot be classified.
    fn after_insertion<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        outcome: &InsertionOutcome,
    ) -> Result<(), MeshError>;

    /// Called when the triangulation rejected the point after
    /// [`MeshVisitor::before_insertion`] ran.
    ///
    /// # Errors
    ///
    /// Returns an error if an element cannot be classified.
    fn insertion_rejected<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        zone: &ConflictZone,
    ) -> Result<(), MeshError>;
}

/// End of the chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullVisitor;

impl MeshVisitor for NullVisitor {
    fn refine_previous_level<D: MeshDomain + ?Sized>(
        &self,
        _complex: &mut MeshComplex,
        _ctx: RefinementContext<'_, D>,
    ) -> Result<bool, MeshError> {
        Ok(true)
    }

    fn previous_level_is_done(&self) -> bool {
        true
    }

    fn test_point_conflict_from_superior(
        &self,
        _complex: &MeshComplex,
        _point: &Point,
        _zone: &ConflictZone,
    ) -> ConflictStatus {
        ConflictStatus::NoConflict
    }

    fn before_insertion(&self, _complex: &MeshComplex, _zone: &ConflictZone) {}

    fn after_insertion<D: MeshDomain + ?Sized>(
        &self,
        _complex: &mut MeshComplex,
        _ctx: RefinementContext<'_, D>,
        _outcome: &InsertionOutcome,
    ) -> Result<(), MeshError> {
        Ok(())
    }

    fn insertion_rejected<D: MeshDomain + ?Sized>(
        &self,
        _complex: &mut MeshComplex,
        _ctx: RefinementContext<'_, D>,
        _zone: &ConflictZone,
    ) -> Result<(), MeshError> {
        Ok(())
    }
}

/// Visitor of the facet level: forwards insertions to the cell level while
/// `active`.
pub struct FacetsVisitor<'l, 'a, CC: ?Sized> {
    /// The cell level.
    pub cells: Option<&'l CellLevel<'a, CC>>,
    /// Set once cell refinement has started.
    pub active: bool,
    previous: NullVisitor,
}

impl<'l, 'a, CC: ?Sized> FacetsVisitor<'l, 'a, CC> {
    /// A visitor forwarding to `cells` when `active`.
    #[must_use]
    pub const fn new(cells: Option<&'l CellLevel<'a, CC>>, active: bool) -> Self {
        Self {
            cells,
            active,
            previous: NullVisitor,
        }
    }

    fn active_cells(&self) -> Option<&'l CellLevel<'a, CC>> {
        self.cells.filter(|_| self.active)
    }
}

impl<CC: CellCriteria + ?Sized> MeshVisitor for FacetsVisitor<'_, '_, CC> {
    fn refine_previous_level<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> Result<bool, MeshError> {
        self.previous.refine_previous_level(complex, ctx)
    }

    fn previous_level_is_done(&self) -> bool {
        self.previous.previous_level_is_done()
    }

    fn test_point_conflict_from_superior(
        &self,
        complex: &MeshComplex,
        point: &Point,
        zone: &ConflictZone,
    ) -> ConflictStatus {
        self.previous
            .test_point_conflict_from_superior(complex, point, zone)
    }

    fn before_insertion(&self, complex: &MeshComplex, zone: &ConflictZone) {
        if let Some(cells) = self.active_cells() {
            cells.before_insertion(zone);
        }
        self.previous.before_insertion(complex, zone);
    }

    fn after_insertion<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        outcome: &InsertionOutcome,
    ) -> Result<(), MeshError> {
        if let Some(cells) = self.active_cells() {
            cells.after_insertion(complex, ctx, outcome)?;
        }
        self.previous.after_insertion(complex, ctx, outcome)
    }

    fn insertion_rejected<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        zone: &ConflictZone,
    ) -> Result<(), MeshError> {
        if let Some(cells) = self.active_cells() {
            cells.reevaluate(complex, ctx, &zone.cells)?;
        }
        self.previous.insertion_rejected(complex, ctx, zone)
    }
}

/// Visitor of the cell level: gives access to the facet level.
pub struct CellsVisitor<'l, 'a, FC: ?Sized, CC: ?Sized> {
    /// The facet level.
    pub facets: &'l FacetLevel<'a, FC>,
    /// Visitor used when refining the facet level from here.
    pub facets_visitor: FacetsVisitor<'l, 'a, CC>,
}

impl<FC, CC> MeshVisitor for CellsVisitor<'_, '_, FC, CC>
where
    FC: FacetCriteria + ?Sized,
    CC: CellCriteria + ?Sized,
{
    fn refine_previous_level<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> Result<bool, MeshError> {
        loop {
            if self.facets.is_algorithm_done() {
                return Ok(true);
            }
            if ctx.budget_reached(complex) {
                return Ok(false);
            }
            match self.facets.one_step(complex, ctx, &self.facets_visitor)? {
                StepOutcome::Empty => return Ok(true),
                StepOutcome::BudgetReached => return Ok(false),
                StepOutcome::Inserted | StepOutcome::Discarded(_) => {}
            }
        }
    }

    fn previous_level_is_done(&self) -> bool {
        self.facets.is_algorithm_done()
    }

    fn test_point_conflict_from_superior(
        &self,
        complex: &MeshComplex,
        point: &Point,
        zone: &ConflictZone,
    ) -> ConflictStatus {
        self.facets.test_encroachment(complex, point, zone)
    }

    fn before_insertion(&self, complex: &MeshComplex, zone: &ConflictZone) {
        self.facets.before_insertion(complex, zone);
    }

    fn after_insertion<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        outcome: &InsertionOutcome,
    ) -> Result<(), MeshError> {
        self.facets.after_insertion(complex, ctx, outcome);
        Ok(())
    }

    fn insertion_rejected<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        zone: &ConflictZone,
    ) -> Result<(), MeshError> {
        self.facets.reevaluate(complex, ctx, &zone.cells);
        Ok(())
    }
}
