//! Parallel refinement driver.
//!
//! Workers of a `rayon` pool share the complex through a
//! [`parking_lot::RwLock`]. A step runs its read-only phase under the read
//! lock, then locks the neighborhood it is about to modify in the
//! [`LockGrid`] attached to the triangulation: every grid cell holding a
//! finite vertex of a cell tested by the conflict search, plus the grid
//! cell of the new point. Workers whose neighborhoods overlap fail to
//! lock, put their record back and yield. The insertion itself runs under
//! the write lock after checking that the tested cells still exist.
//! Each commit is audited against the grid: the worker must hold the grid
//! cell of every point of its zone, and no held grid cell may be owned by
//! another worker. The audit goes to the observer and is asserted in debug
//! builds.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use rayon::prelude::*;

use crate::concurrency::lock_grid::{LockGrid, LockGuard};
use crate::core::collections::CellKey;
use crate::core::facet::FacetKey;
use crate::core::triangulation::Triangulation;
use crate::geometry::point::Point;
use crate::mesh::complex::MeshComplex;
use crate::mesh::criteria::{CellCriteria, FacetCriteria};
use crate::mesh::domain::MeshDomain;
use crate::mesh::error::MeshError;
use crate::mesh::observer::{DiscardReason, LevelKind};
use crate::mesh::refinement::cells::CellLevel;
use crate::mesh::refinement::facets::FacetLevel;
use crate::mesh::refinement::visitor::{CellsVisitor, FacetsVisitor};
use crate::mesh::refinement::worklist::BadElement;
use crate::mesh::refinement::{Preparation, PreparedInsertion, RefinementContext};

/// Which levels the workers drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParallelPhase {
    /// Facets only; the flag tells whether facet insertions are forwarded
    /// to the cell level.
    Facets {
        /// Forward facet insertions to the cell level.
        visitor_active: bool,
    },
    /// Facets first, then cells.
    All,
}

struct Shared<'s, 'a, D: ?Sized, FC: ?Sized, CC: ?Sized> {
    complex: RwLock<&'s mut MeshComplex>,
    grid: Option<&'s LockGrid>,
    ctx: RefinementContext<'s, D>,
    facets: &'s FacetLevel<'a, FC>,
    cells: &'s CellLevel<'a, CC>,
    phase: ParallelPhase,
    in_flight: AtomicUsize,
    stop: AtomicBool,
    budget_reached: AtomicBool,
}

/// Lock coverage of one insertion, checked right before it is committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZoneLockAudit {
    /// Grid cells held by the inserting worker.
    pub held: usize,
    /// Zone points whose grid cell the worker does not hold.
    pub uncovered: usize,
    /// Held grid cells whose recorded owner is not the worker.
    pub foreign: usize,
}

impl ZoneLockAudit {
    /// The worker holds its whole zone and nothing it holds is shared.
    #[must_use]
    pub const fn is_sound(&self) -> bool {
        self.uncovered == 0 && self.foreign == 0
    }
}

/// The new point of `prepared`, then every finite vertex of the cells its
/// conflict search tested.
fn zone_points<'c, E>(
    tr: &'c Triangulation,
    prepared: &'c PreparedInsertion<E>,
) -> impl Iterator<Item = &'c Point> + 'c {
    let vertices = prepared
        .zone
        .tested_cells
        .iter()
        .filter_map(move |&c| tr.cell(c))
        .flat_map(|cell| cell.vertices().iter().copied())
        .filter(move |&v| !tr.is_infinite_vertex(v))
        .filter_map(move |v| tr.point(v));
    std::iter::once(&prepared.point).chain(vertices)
}

/// Locks the grid cells of every zone point of `prepared` for `worker`.
/// Returns `None`, releasing what was taken, if another worker holds one.
#[must_use]
pub fn lock_zone<'g, E>(
    grid: &'g LockGrid,
    worker: usize,
    complex: &MeshComplex,
    prepared: &PreparedInsertion<E>,
) -> Option<LockGuard<'g>> {
    let mut guard = grid.guard(worker + 1);
    for p in zone_points(complex.triangulation(), prepared) {
        if !guard.try_lock_point(p) {
            return None;
        }
    }
    Some(guard)
}

/// Checks `guard` against the zone of `prepared`.
///
/// Every grid slot has a single owner, so two guards that both pass this
/// check share no grid cell.
#[must_use]
pub fn audit_zone_lock<E>(
    grid: &LockGrid,
    guard: &LockGuard<'_>,
    complex: &MeshComplex,
    prepared: &PreparedInsertion<E>,
) -> ZoneLockAudit {
    let held = guard.held();
    ZoneLockAudit {
        held: held.len(),
        uncovered: zone_points(complex.triangulation(), prepared)
            .filter(|p| !held.contains(&grid.grid_index(p)))
            .count(),
        foreign: held
            .iter()
            .filter(|&&index| grid.owner_of(index) != Some(guard.owner()))
            .count(),
    }
}

#[derive(Clone, Copy, Debug)]
enum Job {
    Facet(BadElement<FacetKey>),
    Cell(BadElement<CellKey>),
}

/// Drains the queues selected by `phase` on `pool`. Returns `false` if the
/// vertex budget stopped the workers.
///
/// # Errors
///
/// Returns the first error raised by a worker; the other workers stop
/// after their current step.
pub fn refine<D, FC, CC>(
    pool: &rayon::ThreadPool,
    complex: &mut MeshComplex,
    ctx: RefinementContext<'_, D>,
    facets: &FacetLevel<'_, FC>,
    cells: &CellLevel<'_, CC>,
    phase: ParallelPhase,
) -> Result<bool, MeshError>
where
    D: MeshDomain + ?Sized,
    FC: FacetCriteria + ?Sized,
    CC: CellCriteria + ?Sized,
{
    let grid = complex.triangulation().lock_data_structure().cloned();
    let shared = Shared {
        complex: RwLock::new(complex),
        grid: grid.as_deref(),
        ctx,
        facets,
        cells,
        phase,
        in_flight: AtomicUsize::new(0),
        stop: AtomicBool::new(false),
        budget_reached: AtomicBool::new(false),
    };
    let workers = pool.current_num_threads().max(1);
    tracing::debug!("Parallel refinement ({phase:?}) on {workers} workers");
    pool.install(|| {
        (0..workers)
            .into_par_iter()
            .try_for_each(|worker| shared.run_worker(worker))
    })?;
    Ok(!shared.budget_reached.load(Ordering::SeqCst))
}

impl<D, FC, CC> Shared<'_, '_, D, FC, CC>
where
    D: MeshDomain + ?Sized,
    FC: FacetCriteria + ?Sized,
    CC: CellCriteria + ?Sized,
{
    fn drains_cells(&self) -> bool {
        self.phase == ParallelPhase::All
    }

    fn queues_empty(&self) -> bool {
        self.facets.is_empty() && (!self.drains_cells() || self.cells.is_empty())
    }

    fn out_of_budget(&self, complex: &MeshComplex) -> bool {
        if self.ctx.budget_reached(complex) {
            self.budget_reached.store(true, Ordering::SeqCst);
            self.stop.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn run_worker(&self, worker: usize) -> Result<(), MeshError> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            if self.out_of_budget(&self.complex.read()) {
                return Ok(());
            }

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let job = self.facets.pop(worker).map(Job::Facet).or_else(|| {
                if self.drains_cells() {
                    self.cells.pop(worker).map(Job::Cell)
                } else {
                    None
                }
            });
            let Some(job) = job else {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                // Records are pushed before `in_flight` drops, so an idle
                // count of zero followed by empty queues means no more work.
                if self.in_flight.load(Ordering::SeqCst) == 0 && self.queues_empty() {
                    return Ok(());
                }
                std::thread::yield_now();
                continue;
            };

            let result = match job {
                Job::Facet(record) => self.facet_step(worker, record),
                Job::Cell(record) => self.cell_step(worker, record),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = result {
                self.stop.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
    }

    fn lock_zone<'g, E>(
        &'g self,
        worker: usize,
        complex: &MeshComplex,
        prepared: &PreparedInsertion<E>,
    ) -> Option<Option<LockGuard<'g>>> {
        match self.grid {
            Some(grid) => lock_zone(grid, worker, complex, prepared).map(Some),
            None => Some(None),
        }
    }

    fn audit<E>(
        &self,
        level: LevelKind,
        guard: Option<&LockGuard<'_>>,
        complex: &MeshComplex,
        prepared: &PreparedInsertion<E>,
    ) {
        let (Some(grid), Some(guard)) = (self.grid, guard) else {
            return;
        };
        let audit = audit_zone_lock(grid, guard, complex, prepared);
        self.ctx.observer.zone_locked(level, audit);
        debug_assert!(
            audit.is_sound(),
            "worker {} commits a {level:?} insertion with {audit:?}",
            guard.owner()
        );
    }

    fn zone_is_intact<E>(complex: &MeshComplex, prepared: &PreparedInsertion<E>) -> bool {
        let tr = complex.triangulation();
        prepared
            .zone
            .tested_cells
            .iter()
            .all(|&c| tr.contains_cell(c))
    }

    fn facet_step(
        &self,
        worker: usize,
        record: BadElement<FacetKey>,
    ) -> Result<(), MeshError> {
        let visitor_active = match self.phase {
            ParallelPhase::Facets { visitor_active } => visitor_active,
            ParallelPhase::All => true,
        };
        let visitor = FacetsVisitor::new(Some(self.cells), visitor_active);
        let (prepared, guard) = {
            let complex = self.complex.read();
            match self.facets.prepare(&complex, &visitor, record) {
                Preparation::Ready(prepared) => match self.lock_zone(worker, &complex, &prepared) {
                    Some(guard) => (prepared, guard),
                    None => {
                        drop(complex);
                        self.facets.queue().push(prepared.record);
                        std::thread::yield_now();
                        return Ok(());
                    }
                },
                Preparation::Discard(reason) => {
                    self.ctx
                        .observer
                        .record_discarded(LevelKind::Facets, reason);
                    return Ok(());
                }
                Preparation::Requeue(record) => {
                    self.facets.queue().push(record);
                    self.ctx
                        .observer
                        .record_discarded(LevelKind::Facets, DiscardReason::Deferred);
                    return Ok(());
                }
            }
        };
        let mut complex = self.complex.write();
        if self.out_of_budget(&complex) || !Self::zone_is_intact(&complex, &prepared) {
            self.facets.queue().push(prepared.record);
            return Ok(());
        }
        self.audit(LevelKind::Facets, guard.as_ref(), &complex, &prepared);
        self.facets
            .commit(&mut complex, self.ctx, &visitor, prepared)
            .map(|_| ())
    }

    fn cell_step(
        &self,
        worker: usize,
        record: BadElement<CellKey>,
    ) -> Result<(), MeshError> {
        let visitor = CellsVisitor {
            facets: self.facets,
            facets_visitor: FacetsVisitor::new(Some(self.cells), true),
        };
        let (prepared, guard) = {
            let complex = self.complex.read();
            match self.cells.prepare(&complex, self.ctx, &visitor, record)? {
                Preparation::Ready(prepared) => match self.lock_zone(worker, &complex, &prepared) {
                    Some(guard) => (prepared, guard),
                    None => {
                        drop(complex);
                        self.cells.queue().push(prepared.record);
                        std::thread::yield_now();
                        return Ok(());
                    }
                },
                Preparation::Discard(reason) => {
                    self.ctx.observer.record_discarded(LevelKind::Cells, reason);
                    return Ok(());
                }
                Preparation::Requeue(record) => {
                    self.cells.queue().push(record);
                    self.ctx
                        .observer
                        .record_discarded(LevelKind::Cells, DiscardReason::Deferred);
                    return Ok(());
                }
            }
        };
        let mut complex = self.complex.write();
        if self.out_of_budget(&complex) || !Self::zone_is_intact(&complex, &prepared) {
            self.cells.queue().push(prepared.record);
            return Ok(());
        }
        self.audit(LevelKind::Cells, guard.as_ref(), &complex, &prepared);
        self.cells
            .commit(&mut complex, self.ctx, &visitor, prepared)
            .map(|_| ())
    }
}
