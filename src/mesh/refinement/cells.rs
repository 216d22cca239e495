//! Cell refinement level.
//!
//! A finite cell belongs to the complex when its circumcenter lies in a
//! subdomain; the subdomain becomes the cell's label. Bad cells are fixed
//! by inserting their circumcenter, unless it encroaches a restricted facet,
//! in which case the facet is refined first.

use rayon::prelude::*;

use crate::core::algorithms::incremental_insertion::InsertionOutcome;
use crate::core::algorithms::locate::ConflictZone;
use crate::core::collections::{CellKey, FastHashSet};
use crate::geometry::point::Point;
use crate::mesh::complex::{MeshComplex, VertexInfo};
use crate::mesh::criteria::{CellCriteria, CellView, Quality};
use crate::mesh::domain::{MeshDomain, SubdomainIndex};
use crate::mesh::error::MeshError;
use crate::mesh::observer::{DiscardReason, LevelKind};
use crate::mesh::refinement::level::LevelQueue;
use crate::mesh::refinement::visitor::MeshVisitor;
use crate::mesh::refinement::worklist::BadElement;
use crate::mesh::refinement::{
    ConflictStatus, Preparation, PreparedInsertion, RefinementContext, StepOutcome,
};

#[derive(Clone, Copy, Debug)]
struct CellEvaluation {
    cell: CellKey,
    subdomain: Option<SubdomainIndex>,
    quality: Option<Quality>,
    circumcenter: Option<Point>,
}

/// The cell level.
pub struct CellLevel<'a, CC: ?Sized> {
    criteria: &'a CC,
    queue: LevelQueue<CellKey>,
}

impl<'a, CC: CellCriteria + ?Sized> CellLevel<'a, CC> {
    /// Creates an empty level.
    #[must_use]
    pub fn new(criteria: &'a CC) -> Self {
        Self {
            criteria,
            queue: LevelQueue::default(),
        }
    }

    /// The criteria.
    #[must_use]
    pub const fn criteria(&self) -> &'a CC {
        self.criteria
    }

    /// The queue of bad cells.
    #[must_use]
    pub const fn queue(&self) -> &LevelQueue<CellKey> {
        &self.queue
    }

    /// Mutable queue, to change its partition.
    pub const fn queue_mut(&mut self) -> &mut LevelQueue<CellKey> {
        &mut self.queue
    }

    /// Number of queued cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no cell is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns `true` if no cell is queued.
    #[must_use]
    pub fn is_algorithm_done(&self) -> bool {
        self.queue.is_empty()
    }

    fn evaluate<D: MeshDomain + ?Sized>(
        &self,
        complex: &MeshComplex,
        ctx: RefinementContext<'_, D>,
        cell: CellKey,
    ) -> Result<Option<CellEvaluation>, MeshError> {
        let tr = complex.triangulation();
        let Some(c) = tr.cell(cell) else {
            return Ok(None);
        };
        if tr.is_infinite_cell(cell) {
            return Ok(Some(CellEvaluation {
                cell,
                subdomain: None,
                quality: None,
                circumcenter: None,
            }));
        }
        let (Some(circumcenter), Some(vertices)) = (tr.circumcenter(cell), tr.cell_points(cell))
        else {
            return Ok(None);
        };
        let subdomain = ctx
            .domain
            .is_in_domain_with_retries(&circumcenter, ctx.config.classification_max_retries)?;
        let quality = subdomain.and_then(|subdomain| {
            let view = CellView {
                key: cell,
                vertex_keys: *c.vertices(),
                vertices,
                circumcenter,
                subdomain,
            };
            self.criteria.is_bad(tr, &view)
        });
        Ok(Some(CellEvaluation {
            cell,
            subdomain,
            quality,
            circumcenter: Some(circumcenter),
        }))
    }

    // Returns `true` if the cell was queued.
    fn apply(&self, complex: &mut MeshComplex, evaluation: CellEvaluation) -> bool {
        match evaluation.subdomain {
            Some(subdomain) => complex.add_cell(evaluation.cell, subdomain),
            None => {
                complex.remove_cell(evaluation.cell);
            }
        }
        match (evaluation.quality, evaluation.circumcenter) {
            (Some(quality), Some(position)) => {
                self.queue
                    .push(BadElement::new(evaluation.cell, quality, position));
                true
            }
            _ => {
                self.queue.remove(&evaluation.cell);
                false
            }
        }
    }

    /// Classifies every finite cell, labels those in the complex and queues
    /// the bad ones. Returns the number queued.
    ///
    /// # Errors
    ///
    /// Returns an error if a circumcenter cannot be classified.
    pub fn scan_triangulation<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> Result<usize, MeshError> {
        self.queue.clear();
        let cells: Vec<CellKey> = complex.triangulation().finite_cells().collect();
        let evaluations: Vec<Option<CellEvaluation>> = {
            let complex = &*complex;
            if ctx.config.is_parallel() {
                cells
                    .par_iter()
                    .map(|&c| self.evaluate(complex, ctx, c))
                    .collect::<Result<_, _>>()?
            } else {
                cells
                    .iter()
                    .map(|&c| self.evaluate(complex, ctx, c))
                    .collect::<Result<_, _>>()?
            }
        };
        let queued = evaluations
            .into_iter()
            .flatten()
            .filter(|&e| self.apply(complex, e))
            .count();
        tracing::debug!(
            "Cell scan: {} cells, {} in complex, {queued} bad",
            cells.len(),
            complex.number_of_cells()
        );
        ctx.observer.scan_completed(LevelKind::Cells, queued);
        Ok(queued)
    }

    /// Number of bad cells in the complex, by fresh evaluation.
    ///
    /// # Errors
    ///
    /// Returns an error if a circumcenter cannot be classified.
    pub fn count_bad<D: MeshDomain + ?Sized>(
        &self,
        complex: &MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> Result<usize, MeshError> {
        let mut count = 0;
        for cell in complex.triangulation().finite_cells() {
            if let Some(e) = self.evaluate(complex, ctx, cell)? {
                count += usize::from(e.quality.is_some());
            }
        }
        Ok(count)
    }

    /// Re-classifies every cell of `cells` that still exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a circumcenter cannot be classified.
    pub fn reevaluate<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        cells: &[CellKey],
    ) -> Result<(), MeshError> {
        let mut seen = FastHashSet::default();
        for &cell in cells {
            if !seen.insert(cell) {
                continue;
            }
            if let Some(evaluation) = self.evaluate(complex, ctx, cell)? {
                self.apply(complex, evaluation);
            }
        }
        Ok(())
    }

    /// Drops the queued conflict cells.
    pub fn before_insertion(&self, zone: &ConflictZone) {
        for cell in &zone.cells {
            self.queue.remove(cell);
        }
    }

    /// Classifies the new cells.
    ///
    /// # Errors
    ///
    /// Returns an error if a circumcenter cannot be classified.
    pub fn after_insertion<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        outcome: &InsertionOutcome,
    ) -> Result<(), MeshError> {
        self.reevaluate(complex, ctx, &outcome.new_cells)
    }

    /// Pops the best record, starting from worksharing bin `preferred`.
    pub fn pop(&self, preferred: usize) -> Option<BadElement<CellKey>> {
        self.queue.pop(preferred)
    }

    /// Read-only phase of a step: re-validates `record`, classifies its
    /// circumcenter and runs the conflict tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the circumcenter cannot be classified.
    pub fn prepare<D, V>(
        &self,
        complex: &MeshComplex,
        ctx: RefinementContext<'_, D>,
        visitor: &V,
        record: BadElement<CellKey>,
    ) -> Result<Preparation<CellKey>, MeshError>
    where
        D: MeshDomain + ?Sized,
        V: MeshVisitor,
    {
        let cell = record.element;
        let tr = complex.triangulation();
        if !tr.contains_cell(cell) || !complex.is_cell_in_complex(cell) {
            return Ok(Preparation::Discard(DiscardReason::Stale));
        }
        let Some(point) = tr.circumcenter(cell) else {
            return Ok(Preparation::Discard(DiscardReason::Stale));
        };
        let Some(subdomain) = ctx
            .domain
            .is_in_domain_with_retries(&point, ctx.config.classification_max_retries)?
        else {
            return Ok(Preparation::Discard(DiscardReason::OutsideDomain));
        };
        let zone = match tr.find_conflicts(&point, Some(cell)) {
            Ok(zone) => zone,
            Err(e) => {
                tracing::warn!("Dropping cell {cell:?}: no conflict zone for {point}: {e}");
                return Ok(Preparation::Discard(DiscardReason::InsertionFailed));
            }
        };
        Ok(
            match visitor.test_point_conflict_from_superior(complex, &point, &zone) {
                ConflictStatus::NoConflict => Preparation::Ready(PreparedInsertion {
                    record,
                    point,
                    info: VertexInfo::volume(subdomain),
                    zone,
                }),
                ConflictStatus::ConflictButElementCanBeReconsidered
                | ConflictStatus::CouldNotLockZone => Preparation::Requeue(record),
                ConflictStatus::ConflictAndElementShouldBeDropped => {
                    Preparation::Discard(DiscardReason::OutsideDomain)
                }
            },
        )
    }

    /// Mutating phase of a step: runs the hooks around the insertion.
    ///
    /// # Errors
    ///
    /// Returns an error if a new cell cannot be classified.
    pub fn commit<D, V>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        visitor: &V,
        prepared: PreparedInsertion<CellKey>,
    ) -> Result<StepOutcome, MeshError>
    where
        D: MeshDomain + ?Sized,
        V: MeshVisitor,
    {
        let PreparedInsertion {
            record,
            point,
            info,
            zone,
        } = prepared;
        visitor.before_insertion(complex, &zone);
        self.before_insertion(&zone);
        match complex.insert_in_conflict_zone(point, &zone, info) {
            Ok(outcome) => {
                self.after_insertion(complex, ctx, &outcome)?;
                visitor.after_insertion(complex, ctx, &outcome)?;
                tracing::trace!("Refined cell {:?} at {point}", record.element);
                ctx.observer.vertex_inserted(LevelKind::Cells);
                Ok(StepOutcome::Inserted)
            }
            Err(e) => {
                tracing::warn!("Dropping cell {:?}: cannot insert {point}: {e}", record.element);
                self.reevaluate(complex, ctx, &zone.cells)?;
                visitor.insertion_rejected(complex, ctx, &zone)?;
                self.queue.remove(&record.element);
                ctx.observer
                    .record_discarded(LevelKind::Cells, DiscardReason::InsertionFailed);
                Ok(StepOutcome::Discarded(DiscardReason::InsertionFailed))
            }
        }
    }

    /// Drains the previous level, then fixes the worst queued cell.
    ///
    /// # Errors
    ///
    /// Returns an error if a cell or facet cannot be classified.
    pub fn one_step<D, V>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        visitor: &V,
    ) -> Result<StepOutcome, MeshError>
    where
        D: MeshDomain + ?Sized,
        V: MeshVisitor,
    {
        if !visitor.refine_previous_level(complex, ctx)? || ctx.budget_reached(complex) {
            return Ok(StepOutcome::BudgetReached);
        }
        let Some(record) = self.queue.pop_best() else {
            return Ok(StepOutcome::Empty);
        };
        match self.prepare(complex, ctx, visitor, record)? {
            Preparation::Ready(prepared) => self.commit(complex, ctx, visitor, prepared),
            Preparation::Discard(reason) => {
                ctx.observer.record_discarded(LevelKind::Cells, reason);
                Ok(StepOutcome::Discarded(reason))
            }
            Preparation::Requeue(record) => {
                self.queue.push(record);
                ctx.observer
                    .record_discarded(LevelKind::Cells, DiscardReason::Deferred);
                Ok(StepOutcome::Discarded(DiscardReason::Deferred))
            }
        }
    }

    /// Steps until the queue is empty. Returns `false` if the vertex budget
    /// stopped it.
    ///
    /// # Errors
    ///
    /// Returns the first step error.
    pub fn refine<D, V>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        visitor: &V,
    ) -> Result<bool, MeshError>
    where
        D: MeshDomain + ?Sized,
        V: MeshVisitor,
    {
        loop {
            match self.one_step(complex, ctx, visitor)? {
                StepOutcome::Empty => return Ok(true),
                StepOutcome::BudgetReached => return Ok(false),
                StepOutcome::Inserted | StepOutcome::Discarded(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::triangulation::Triangulation;
    use crate::geometry::point::Bbox3;
    use crate::mesh::config::{MeshTopology, MesherConfig};
    use crate::mesh::criteria::FacetView;
    use crate::mesh::domain::PatchIndex;
    use crate::mesh::domain::labeled_function::LabeledFunctionDomain;
    use crate::mesh::observer::{NullObserver, RefinementCounters};
    use crate::mesh::refinement::facets::FacetLevel;
    use crate::mesh::refinement::visitor::{CellsVisitor, FacetsVisitor, NullVisitor};

    type LabelFn = fn(&Point) -> SubdomainIndex;

    fn unit_ball(p: &Point) -> SubdomainIndex {
        SubdomainIndex(u32::from(p.squared_distance(&Point::ORIGIN) < 1.0))
    }

    fn ball() -> LabeledFunctionDomain<LabelFn> {
        LabeledFunctionDomain::new(unit_ball as LabelFn, Bbox3::new([-2.0; 3], [2.0; 3]))
            .with_relative_error_bound(1e-6)
    }

    fn octahedron_complex() -> MeshComplex {
        let mut complex = MeshComplex::default();
        for p in [
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
        ] {
            complex
                .insert_point(Point::new(p), VertexInfo::surface(PatchIndex(1)))
                .unwrap();
        }
        complex
    }

    fn never_bad_facet(_: &Triangulation, _: &FacetView) -> Option<Quality> {
        None
    }

    #[test]
    fn test_scan_labels_interior_cells() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = |_: &Triangulation, cell: &CellView| {
            assert_eq!(cell.subdomain, SubdomainIndex(1));
            Some(Quality::new(1.0))
        };
        let level = CellLevel::new(&criteria);
        let finite = complex.triangulation().number_of_finite_cells();
        assert_eq!(level.scan_triangulation(&mut complex, ctx).unwrap(), finite);
        assert_eq!(complex.number_of_cells(), finite);
        assert!(
            complex
                .cells_in_complex()
                .all(|(_, subdomain)| subdomain == SubdomainIndex(1))
        );
        assert_eq!(level.count_bad(&complex, ctx).unwrap(), finite);
    }

    #[test]
    fn test_refining_a_cell_inserts_its_circumcenter() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let counters = RefinementCounters::new();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &counters,
        };
        let facet_criteria = never_bad_facet;
        let cell_criteria = |tr: &Triangulation, _: &CellView| {
            (tr.number_of_vertices() == 6).then_some(Quality::new(1.0))
        };
        let facets = FacetLevel::new(&facet_criteria, MeshTopology::NonManifold);
        let cells = CellLevel::new(&cell_criteria);
        facets.scan_triangulation(&mut complex, ctx);
        cells.scan_triangulation(&mut complex, ctx).unwrap();
        assert!(!cells.is_algorithm_done());

        let visitor = CellsVisitor {
            facets: &facets,
            facets_visitor: FacetsVisitor::new(Some(&cells), true),
        };
        assert_eq!(
            cells.one_step(&mut complex, ctx, &visitor).unwrap(),
            StepOutcome::Inserted
        );
        let tr = complex.triangulation();
        assert_eq!(tr.number_of_vertices(), 7);
        let center = tr
            .finite_vertices()
            .find(|(_, v)| v.point().distance(&Point::ORIGIN) < 1e-9)
            .map(|(key, _)| key)
            .unwrap();
        assert_eq!(
            complex.vertex_info(center),
            Some(VertexInfo::volume(SubdomainIndex(1)))
        );
        // Every new cell is classified; none is bad any more.
        assert_eq!(complex.number_of_cells(), tr.number_of_finite_cells());
        assert!(cells.is_algorithm_done());
        assert_eq!(counters.cell_insertions.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(
            cells.one_step(&mut complex, ctx, &visitor).unwrap(),
            StepOutcome::Empty
        );
    }

    #[test]
    fn test_record_of_a_destroyed_cell_is_stale() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = |_: &Triangulation, _: &CellView| None::<Quality>;
        let level = CellLevel::new(&criteria);
        level.scan_triangulation(&mut complex, ctx).unwrap();
        let doomed = complex.triangulation().finite_cells().next().unwrap();
        complex
            .insert_point(Point::new([0.0, 0.0, 0.1]), VertexInfo::FAR)
            .unwrap();
        assert!(!complex.triangulation().contains_cell(doomed));

        level
            .queue()
            .push(BadElement::new(doomed, Quality::new(0.0), Point::ORIGIN));
        assert_eq!(
            level.one_step(&mut complex, ctx, &NullVisitor).unwrap(),
            StepOutcome::Discarded(DiscardReason::Stale)
        );
    }

    #[test]
    fn test_budget_stops_before_popping() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig {
            max_vertices: 6,
            ..MesherConfig::default()
        };
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = |_: &Triangulation, _: &CellView| Some(Quality::new(1.0));
        let level = CellLevel::new(&criteria);
        let queued = level.scan_triangulation(&mut complex, ctx).unwrap();
        assert_eq!(
            level.one_step(&mut complex, ctx, &NullVisitor).unwrap(),
            StepOutcome::BudgetReached
        );
        assert_eq!(level.len(), queued);
    }
}
