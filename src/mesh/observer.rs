//! Instrumentation hooks for refinement runs.
//!
//! The mesher reports stage transitions, scans, insertions and discarded
//! records to a [`RefinementObserver`] injected at construction. Drivers
//! plug in their own sink; [`RefinementCounters`] counts events with
//! atomics and is what the tests use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::mesh::parallel::ZoneLockAudit;
use crate::mesh::refinement::RefinementStage;

/// Which refinement level an event comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LevelKind {
    /// Surface facets.
    Facets,
    /// Volume cells.
    Cells,
}

/// Why a popped record did not lead to an insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// The element no longer exists or is no longer bad.
    Stale,
    /// The refinement point lies outside every subdomain.
    OutsideDomain,
    /// The triangulation rejected the refinement point.
    InsertionFailed,
    /// The point encroaches an element of a previous level; the record was
    /// queued again behind it.
    Deferred,
}

/// Receives refinement events. All methods default to no-ops.
pub trait RefinementObserver: Send + Sync {
    /// The mesher entered `stage`.
    fn stage_changed(&self, _stage: RefinementStage) {}

    /// A full scan of `level` queued `queued` bad elements.
    fn scan_completed(&self, _level: LevelKind, _queued: usize) {}

    /// A vertex was inserted to fix an element of `level`.
    fn vertex_inserted(&self, _level: LevelKind) {}

    /// A record of `level` was popped but not refined.
    fn record_discarded(&self, _level: LevelKind, _reason: DiscardReason) {}

    /// A parallel worker is about to commit an insertion for `level` under
    /// the grid locks described by `audit`.
    fn zone_locked(&self, _level: LevelKind, _audit: ZoneLockAudit) {}

    /// A `refine_mesh` run finished after `elapsed`.
    fn run_finished(&self, _elapsed: Duration) {}
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl RefinementObserver for NullObserver {}

/// Counts refinement events.
#[derive(Debug, Default)]
pub struct RefinementCounters {
    /// Vertices inserted by the facet level.
    pub facet_insertions: AtomicUsize,
    /// Vertices inserted by the cell level.
    pub cell_insertions: AtomicUsize,
    /// Completed facet scans.
    pub facet_scans: AtomicUsize,
    /// Completed cell scans.
    pub cell_scans: AtomicUsize,
    /// Records discarded as stale.
    pub stale_records: AtomicUsize,
    /// Records dropped for any other reason.
    pub dropped_records: AtomicUsize,
    /// Parallel insertions committed under grid locks.
    pub locked_zones: AtomicUsize,
    /// Of those, insertions whose locks missed a zone point or overlapped
    /// another worker's.
    pub unsound_zone_locks: AtomicUsize,
    stages: Mutex<Vec<RefinementStage>>,
    events: Mutex<Vec<(LevelKind, &'static str)>>,
}

impl RefinementCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages entered so far, in order.
    #[must_use]
    pub fn stages(&self) -> Vec<RefinementStage> {
        self.stages.lock().clone()
    }

    /// Scan and insertion events so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<(LevelKind, &'static str)> {
        self.events.lock().clone()
    }

    /// Total vertices inserted by refinement.
    #[must_use]
    pub fn insertions(&self) -> usize {
        self.facet_insertions.load(Ordering::Relaxed) + self.cell_insertions.load(Ordering::Relaxed)
    }
}

impl RefinementObserver for RefinementCounters {
    fn stage_changed(&self, stage: RefinementStage) {
        self.stages.lock().push(stage);
    }

    fn scan_completed(&self, level: LevelKind, _queued: usize) {
        match level {
            LevelKind::Facets => self.facet_scans.fetch_add(1, Ordering::Relaxed),
            LevelKind::Cells => self.cell_scans.fetch_add(1, Ordering::Relaxed),
        };
        self.events.lock().push((level, "scan"));
    }

    fn vertex_inserted(&self, level: LevelKind) {
        match level {
            LevelKind::Facets => self.facet_insertions.fetch_add(1, Ordering::Relaxed),
            LevelKind::Cells => self.cell_insertions.fetch_add(1, Ordering::Relaxed),
        };
        self.events.lock().push((level, "insert"));
    }

    fn record_discarded(&self, _level: LevelKind, reason: DiscardReason) {
        match reason {
            DiscardReason::Stale => self.stale_records.fetch_add(1, Ordering::Relaxed),
            _ => self.dropped_records.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn zone_locked(&self, _level: LevelKind, audit: ZoneLockAudit) {
        self.locked_zones.fetch_add(1, Ordering::Relaxed);
        if !audit.is_sound() {
            self.unsound_zone_locks.fetch_add(1, Ordering::Relaxed);
        }
    }
}
