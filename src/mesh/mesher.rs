//! The mesher: drives the facet and cell levels through the refinement
//! stages.
//!
//! # Examples
//!
//! ```rust
//! use tetmesh::prelude::*;
//!
//! fn unit_ball(p: &Point) -> SubdomainIndex {
//!     SubdomainIndex(u32::from(p.squared_distance(&Point::ORIGIN) < 1.0))
//! }
//!
//! let domain = LabeledFunctionDomain::new(
//!     unit_ball as fn(&Point) -> SubdomainIndex,
//!     Bbox3::new([-2.0; 3], [2.0; 3]),
//! );
//! let mut complex = MeshComplex::with_initial_points(&domain, Some(20)).unwrap();
//! let criteria = MeshCriteria::new(
//!     MeshFacetCriteria {
//!         angle_bound: 25.0,
//!         size_bound: 0.5,
//!         distance_bound: 0.1,
//!         ..MeshFacetCriteria::default()
//!     },
//!     MeshCellCriteria {
//!         radius_edge_bound: 3.0,
//!         size_bound: 0.5,
//!     },
//! );
//! let config = MesherConfig {
//!     max_vertices: 200,
//!     ..MesherConfig::default()
//! };
//!
//! let mut mesher =
//!     Mesher::new(&mut complex, &domain, &criteria.facet, &criteria.cell, config).unwrap();
//! let report = mesher.refine_mesh().unwrap();
//! assert!(mesher.complex().triangulation().number_of_vertices() <= 200);
//! println!("{:?} in {:?}", report.status, report.elapsed);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::concurrency::lock_grid::LockGrid;
use crate::concurrency::worksharing::WorksharingGrid;
use crate::mesh::complex::MeshComplex;
use crate::mesh::config::MesherConfig;
use crate::mesh::criteria::{CellCriteria, FacetCriteria};
use crate::mesh::domain::MeshDomain;
use crate::mesh::error::MeshError;
use crate::mesh::observer::{NullObserver, RefinementObserver};
use crate::mesh::parallel::{self, ParallelPhase};
use crate::mesh::refinement::cells::CellLevel;
use crate::mesh::refinement::facets::FacetLevel;
use crate::mesh::refinement::visitor::{CellsVisitor, FacetsVisitor};
use crate::mesh::refinement::{RefinementContext, RefinementStage, StepOutcome};

/// How a refinement run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefinementStatus {
    /// Both queues are empty.
    Converged,
    /// The vertex budget stopped the run.
    MaximalNumberOfVerticesReached,
}

/// Summary of a [`Mesher::refine_mesh`] run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefinementReport {
    /// Wall time of the run.
    pub elapsed: Duration,
    /// How the run ended.
    pub status: RefinementStatus,
}

/// Progress snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MesherStatus {
    /// Vertices of the triangulation.
    pub vertices: usize,
    /// Queued facets.
    pub facet_queue: usize,
    /// Queued cells.
    pub cells_queue: usize,
}

/// Delaunay refinement mesher.
///
/// Borrows the complex mutably for its whole lifetime and refines it in
/// place. In parallel mode it owns a `rayon` pool and the lock grid it
/// attaches to the triangulation during refinement.
pub struct Mesher<'a, D: ?Sized, FC: ?Sized, CC: ?Sized> {
    complex: &'a mut MeshComplex,
    domain: &'a D,
    facets: FacetLevel<'a, FC>,
    cells: CellLevel<'a, CC>,
    config: MesherConfig,
    observer: Arc<dyn RefinementObserver>,
    stage: RefinementStage,
    facets_visitor_active: bool,
    lock_grid: Option<Arc<LockGrid>>,
    worksharing: Option<WorksharingGrid>,
    pool: Option<rayon::ThreadPool>,
}

impl<'a, D, FC, CC> Mesher<'a, D, FC, CC>
where
    D: MeshDomain + ?Sized,
    FC: FacetCriteria + ?Sized,
    CC: CellCriteria + ?Sized,
{
    /// Creates a mesher refining `complex` for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if `config` is out of range and
    /// [`MeshError::ThreadPool`] if the worker pool cannot be built.
    pub fn new(
        complex: &'a mut MeshComplex,
        domain: &'a D,
        facet_criteria: &'a FC,
        cell_criteria: &'a CC,
        config: MesherConfig,
    ) -> Result<Self, MeshError> {
        config.validate()?;
        let pool = if config.is_parallel() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .thread_name(|i| format!("tetmesh-worker-{i}"))
                .build()
                .map_err(|e| MeshError::ThreadPool {
                    message: e.to_string(),
                })?;
            Some(pool)
        } else {
            None
        };
        let bbox = domain.bbox();
        let (lock_grid, worksharing) = if config.is_parallel() {
            (
                Some(Arc::new(LockGrid::new(
                    bbox,
                    config.locking_grid_cells_per_axis,
                ))),
                Some(WorksharingGrid::new(bbox, config.worksharing_cells_per_axis)),
            )
        } else {
            (None, None)
        };
        let mut facets = FacetLevel::new(facet_criteria, config.mesh_topology);
        let mut cells = CellLevel::new(cell_criteria);
        facets.queue_mut().set_partition(worksharing.clone());
        cells.queue_mut().set_partition(worksharing.clone());
        Ok(Self {
            complex,
            domain,
            facets,
            cells,
            config,
            observer: Arc::new(NullObserver),
            stage: RefinementStage::NotInitialized,
            facets_visitor_active: false,
            lock_grid,
            worksharing,
            pool,
        })
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RefinementObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The complex being refined.
    #[must_use]
    pub fn complex(&self) -> &MeshComplex {
        &*self.complex
    }

    /// Run configuration.
    #[must_use]
    pub const fn config(&self) -> &MesherConfig {
        &self.config
    }

    /// Current stage.
    #[must_use]
    pub const fn refinement_stage(&self) -> RefinementStage {
        self.stage
    }

    /// The facet level.
    #[must_use]
    pub const fn facet_level(&self) -> &FacetLevel<'a, FC> {
        &self.facets
    }

    /// The cell level.
    #[must_use]
    pub const fn cell_level(&self) -> &CellLevel<'a, CC> {
        &self.cells
    }

    /// Worker threads used in parallel mode, `1` otherwise.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, rayon::ThreadPool::current_num_threads)
    }

    // Disjoint borrows of the complex, the context and both levels.
    fn parts(
        &mut self,
    ) -> (
        &mut MeshComplex,
        RefinementContext<'_, D>,
        &FacetLevel<'a, FC>,
        &CellLevel<'a, CC>,
    ) {
        (
            &mut *self.complex,
            RefinementContext {
                domain: self.domain,
                config: &self.config,
                observer: &*self.observer,
            },
            &self.facets,
            &self.cells,
        )
    }

    fn set_stage(&mut self, stage: RefinementStage) {
        if stage > self.stage {
            tracing::debug!("Refinement stage: {} -> {stage}", self.stage);
            self.stage = stage;
            self.observer.stage_changed(stage);
        }
    }

    fn attach_lock_grid(&mut self) {
        if let Some(grid) = &self.lock_grid {
            self.complex
                .triangulation_mut()
                .set_lock_data_structure(Some(Arc::clone(grid)));
        }
    }

    fn detach_lock_grid(&mut self) {
        self.complex
            .triangulation_mut()
            .set_lock_data_structure(None);
    }

    /// Prepares a run: fits the concurrency grids to the domain, seeds an
    /// empty triangulation, adds far points when enabled and scans the
    /// facets.
    ///
    /// # Errors
    ///
    /// Returns an error if a point cannot be inserted.
    pub fn initialize(&mut self) -> Result<(), MeshError> {
        let bbox = self.domain.bbox();
        if self.config.is_parallel() {
            self.detach_lock_grid();
            if self.lock_grid.as_ref().is_none_or(|g| *g.bbox() != bbox) {
                self.lock_grid = Some(Arc::new(LockGrid::new(
                    bbox,
                    self.config.locking_grid_cells_per_axis,
                )));
            }
            if let Some(grid) = &mut self.worksharing
                && *grid.bbox() != bbox
            {
                grid.set_bbox(bbox);
                self.facets.queue_mut().set_partition(Some(grid.clone()));
                self.cells.queue_mut().set_partition(Some(grid.clone()));
            }
        }

        if self.complex.triangulation().number_of_cells() == 0 {
            let count = self.domain.default_initial_point_count();
            self.complex.insert_initial_points(self.domain, count)?;
        }
        if self.config.wants_far_points()
            && self.complex.number_of_far_points() == 0
            && self.complex.number_of_facets() == 0
        {
            let count = self.config.far_point_count(self.workers());
            self.complex
                .add_far_points_around(self.domain, count, self.config.seed)?;
        }

        let (complex, ctx, facets, _) = self.parts();
        facets.scan_triangulation(complex, ctx);
        self.set_stage(RefinementStage::RefineFacets);
        if self.config.is_parallel() {
            self.attach_lock_grid();
        }
        Ok(())
    }

    // Scans for the next stage while the facet queue is empty. Stops once
    // the scan queued something or the cell level took over.
    fn escalate(&mut self) -> Result<(), MeshError> {
        while !self.facets_visitor_active && self.facets.is_algorithm_done() {
            match self.stage {
                RefinementStage::NotInitialized | RefinementStage::RefineFacets => {
                    self.set_stage(RefinementStage::RefineFacetsAndEdges);
                    let (complex, ctx, facets, _) = self.parts();
                    facets.scan_edges(complex, ctx);
                }
                RefinementStage::RefineFacetsAndEdges => {
                    self.set_stage(RefinementStage::RefineFacetsAndEdgesAndVertices);
                    let (complex, ctx, facets, _) = self.parts();
                    facets.scan_vertices(complex, ctx);
                }
                RefinementStage::RefineFacetsAndEdgesAndVertices | RefinementStage::RefineAll => {
                    self.start_cells()?;
                }
            }
        }
        Ok(())
    }

    fn start_cells(&mut self) -> Result<(), MeshError> {
        self.facets_visitor_active = true;
        let (complex, ctx, _, cells) = self.parts();
        cells.scan_triangulation(complex, ctx)?;
        self.set_stage(RefinementStage::RefineAll);
        Ok(())
    }

    /// Performs one refinement step, moving to the next stage when the
    /// current queue is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if an element cannot be classified or a required
    /// point cannot be inserted.
    pub fn one_step(&mut self) -> Result<StepOutcome, MeshError> {
        if self.stage == RefinementStage::NotInitialized {
            self.initialize()?;
        }
        if !self.facets_visitor_active {
            self.escalate()?;
        }
        let active = self.facets_visitor_active;
        let (complex, ctx, facets, cells) = self.parts();
        if ctx.budget_reached(complex) {
            return Ok(StepOutcome::BudgetReached);
        }
        if active {
            let visitor = CellsVisitor {
                facets,
                facets_visitor: FacetsVisitor::new(Some(cells), true),
            };
            cells.one_step(complex, ctx, &visitor)
        } else {
            facets.one_step(complex, ctx, &FacetsVisitor::new(Some(cells), false))
        }
    }

    // Drains the facet queue. Returns `false` if the budget stopped it.
    fn refine_facets(&mut self) -> Result<bool, MeshError> {
        let active = self.facets_visitor_active;
        let pool = self.pool.take();
        let (complex, ctx, facets, cells) = self.parts();
        let result = match &pool {
            Some(pool) => parallel::refine(
                pool,
                complex,
                ctx,
                facets,
                cells,
                ParallelPhase::Facets {
                    visitor_active: active,
                },
            ),
            None => facets.refine(complex, ctx, &FacetsVisitor::new(Some(cells), active)),
        };
        self.pool = pool;
        result
    }

    // Drains both queues, facets first. Returns `false` if the budget
    // stopped it.
    fn refine_cells(&mut self) -> Result<bool, MeshError> {
        let pool = self.pool.take();
        let (complex, ctx, facets, cells) = self.parts();
        let result = match &pool {
            Some(pool) => parallel::refine(pool, complex, ctx, facets, cells, ParallelPhase::All),
            None => {
                let visitor = CellsVisitor {
                    facets,
                    facets_visitor: FacetsVisitor::new(Some(cells), true),
                };
                cells.refine(complex, ctx, &visitor)
            }
        };
        self.pool = pool;
        result
    }

    /// Refines the complex until every element satisfies the criteria or
    /// the vertex budget is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if an element cannot be classified or a required
    /// point cannot be inserted.
    pub fn refine_mesh(&mut self) -> Result<RefinementReport, MeshError> {
        self.refine_mesh_with_checkpoint(|_| {})
    }

    /// Same as [`Mesher::refine_mesh`], calling `checkpoint` once the
    /// surface has converged, before cell refinement starts.
    ///
    /// # Errors
    ///
    /// Returns an error if an element cannot be classified or a required
    /// point cannot be inserted.
    pub fn refine_mesh_with_checkpoint<F>(
        &mut self,
        mut checkpoint: F,
    ) -> Result<RefinementReport, MeshError>
    where
        F: FnMut(&MeshComplex),
    {
        let start = Instant::now();
        self.complex.clear_cells_and_facets();
        self.facets.queue().clear();
        self.cells.queue().clear();
        self.facets.reset_topology_checks();
        self.stage = RefinementStage::NotInitialized;
        self.facets_visitor_active = false;

        self.initialize()?;
        let mut within_budget = self.refine_facets()?;
        for (stage, edges) in [
            (RefinementStage::RefineFacetsAndEdges, true),
            (RefinementStage::RefineFacetsAndEdgesAndVertices, false),
        ] {
            if !within_budget {
                break;
            }
            self.set_stage(stage);
            let (complex, ctx, facets, _) = self.parts();
            if edges {
                facets.scan_edges(complex, ctx);
            } else {
                facets.scan_vertices(complex, ctx);
            }
            within_budget = self.refine_facets()?;
        }

        self.facets_visitor_active = true;
        checkpoint(&*self.complex);

        let (complex, ctx, _, _) = self.parts();
        if within_budget && !ctx.budget_reached(complex) {
            self.start_cells()?;
            within_budget = self.refine_cells()?;
        } else {
            within_budget = false;
        }

        let elapsed = start.elapsed();
        let status = if within_budget {
            RefinementStatus::Converged
        } else {
            RefinementStatus::MaximalNumberOfVerticesReached
        };
        tracing::info!(
            "Refinement {status:?} in {elapsed:?}: {} vertices, {} facets, {} cells",
            self.complex.triangulation().number_of_vertices(),
            self.complex.number_of_facets(),
            self.complex.number_of_cells()
        );
        self.observer.run_finished(elapsed);
        Ok(RefinementReport { elapsed, status })
    }

    /// Returns `true` if the cell queue is empty.
    #[must_use]
    pub fn is_algorithm_done(&self) -> bool {
        self.cells.is_algorithm_done()
    }

    /// Labels the cells of the complex when refinement stopped before the
    /// cell level started.
    ///
    /// # Errors
    ///
    /// Returns an error if a circumcenter cannot be classified.
    pub fn fix_c3t3(&mut self) -> Result<(), MeshError> {
        if !self.facets_visitor_active {
            let (complex, ctx, _, cells) = self.parts();
            cells.scan_triangulation(complex, ctx)?;
        }
        Ok(())
    }

    /// Progress snapshot.
    #[must_use]
    pub fn status(&self) -> MesherStatus {
        MesherStatus {
            vertices: self.complex.triangulation().number_of_vertices(),
            facet_queue: self.facets.len(),
            cells_queue: self.cells.len(),
        }
    }

    /// Column names matching [`Mesher::debug_info`].
    #[must_use]
    pub fn debug_info_header(&self) -> String {
        "vertices,facet queue,cell queue".to_string()
    }

    /// One progress line.
    #[must_use]
    pub fn debug_info(&self) -> String {
        let status = self.status();
        format!(
            "{},{},{}",
            status.vertices, status.facet_queue, status.cells_queue
        )
    }

    /// Counts the bad facets and cells by evaluating every element, logs
    /// and returns them.
    ///
    /// # Errors
    ///
    /// Returns an error if a circumcenter cannot be classified.
    pub fn display_number_of_bad_elements(&self) -> Result<(usize, usize), MeshError> {
        let ctx = RefinementContext {
            domain: self.domain,
            config: &self.config,
            observer: &*self.observer,
        };
        let facets = self.facets.count_bad(&*self.complex, self.domain);
        let cells = self.cells.count_bad(&*self.complex, ctx)?;
        tracing::info!("Bad facets: {facets}, bad cells: {cells}");
        Ok((facets, cells))
    }
}

impl<D: ?Sized, FC: ?Sized, CC: ?Sized> Drop for Mesher<'_, D, FC, CC> {
    fn drop(&mut self) {
        self.complex
            .triangulation_mut()
            .set_lock_data_structure(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::triangulation::Triangulation;
    use crate::geometry::point::{Bbox3, Point};
    use crate::mesh::complex::VertexInfo;
    use crate::mesh::config::ConcurrencyMode;
    use crate::mesh::criteria::{CellView, FacetView, Quality};
    use crate::mesh::domain::labeled_function::LabeledFunctionDomain;
    use crate::mesh::domain::{PatchIndex, SubdomainIndex};

    type LabelFn = fn(&Point) -> SubdomainIndex;

    fn unit_ball(p: &Point) -> SubdomainIndex {
        SubdomainIndex(u32::from(p.squared_distance(&Point::ORIGIN) < 1.0))
    }

    fn ball() -> LabeledFunctionDomain<LabelFn> {
        LabeledFunctionDomain::new(unit_ball as LabelFn, Bbox3::new([-2.0; 3], [2.0; 3]))
            .with_relative_error_bound(1e-6)
    }

    fn never_bad_facet(_: &Triangulation, _: &FacetView) -> Option<Quality> {
        None
    }

    fn never_bad_cell(_: &Triangulation, _: &CellView) -> Option<Quality> {
        None
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

    #[test]
    fn test_invalid_config_is_rejected() {
        let domain = ball();
        let mut complex = MeshComplex::default();
        let config = MesherConfig {
            locking_grid_cells_per_axis: 0,
            ..MesherConfig::default()
        };
        let result = Mesher::new(
            &mut complex,
            &domain,
            &never_bad_facet,
            &never_bad_cell,
            config,
        );
        assert!(matches!(result, Err(MeshError::Config(_))));
    }

    #[test]
    fn test_one_step_walks_through_every_stage() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let mut mesher = Mesher::new(
            &mut complex,
            &domain,
            &never_bad_facet,
            &never_bad_cell,
            MesherConfig::default(),
        )
        .unwrap();
        assert_eq!(mesher.refinement_stage(), RefinementStage::NotInitialized);
        assert_eq!(mesher.one_step().unwrap(), StepOutcome::Empty);
        assert_eq!(mesher.refinement_stage(), RefinementStage::RefineAll);
        assert!(mesher.is_algorithm_done());
        assert!(mesher.is_algorithm_done());
        assert_eq!(
            mesher.status(),
            MesherStatus {
                vertices: 6,
                facet_queue: 0,
                cells_queue: 0,
            }
        );
        assert_eq!(mesher.debug_info(), "6,0,0");
        assert_eq!(mesher.debug_info_header().split(',').count(), 3);
    }

    #[test]
    fn test_fix_c3t3_labels_cells_before_cell_refinement() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let mut mesher = Mesher::new(
            &mut complex,
            &domain,
            &never_bad_facet,
            &never_bad_cell,
            MesherConfig::default(),
        )
        .unwrap();
        mesher.initialize().unwrap();
        assert_eq!(mesher.complex().number_of_cells(), 0);
        mesher.fix_c3t3().unwrap();
        assert_eq!(
            mesher.complex().number_of_cells(),
            mesher.complex().triangulation().number_of_finite_cells()
        );
        assert_eq!(mesher.display_number_of_bad_elements().unwrap(), (0, 0));
    }

    #[test]
    fn test_parallel_mesher_attaches_lock_grid_only_while_alive() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig {
            concurrency: ConcurrencyMode::Parallel,
            num_workers: 2,
            ..MesherConfig::default()
        };
        {
            let mut mesher =
                Mesher::new(&mut complex, &domain, &never_bad_facet, &never_bad_cell, config)
                    .unwrap();
            assert_eq!(mesher.workers(), 2);
            mesher.initialize().unwrap();
            assert!(
                mesher
                    .complex()
                    .triangulation()
                    .lock_data_structure()
                    .is_some()
            );
            // Far points: ceil(2 workers x 5 per core).
            assert_eq!(mesher.complex().number_of_far_points(), 10);
        }
        assert!(complex.triangulation().lock_data_structure().is_none());
    }
}
