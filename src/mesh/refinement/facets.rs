//! Facet refinement level.
//!
//! A finite facet is *restricted* when its dual Voronoi edge meets the
//! domain surface: the segment between the circumcenters of its two cells,
//! or for a hull facet the ray from the finite cell's circumcenter along the
//! outward normal. The first hit is the facet's surface center, and is
//! where a bad facet gets refined.
//!
//! In the edge and vertex stages the level also repairs the topology of
//! the restricted surface according to [`MeshTopology`].

use std::sync::atomic::{AtomicU8, Ordering};

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::core::algorithms::incremental_insertion::InsertionOutcome;
use crate::core::algorithms::locate::ConflictZone;
use crate::core::collections::{CellKey, FastHashMap, FastHashSet, VertexKey};
use crate::core::facet::{EdgeKey, Facet, FacetKey};
use crate::core::triangulation::Triangulation;
use crate::geometry::point::Point;
use crate::mesh::complex::{MeshComplex, SurfaceFacet, VertexInfo};
use crate::mesh::config::MeshTopology;
use crate::mesh::criteria::{FacetCriteria, FacetView, Quality};
use crate::mesh::domain::{MeshDomain, SurfaceIntersection};
use crate::mesh::error::MeshError;
use crate::mesh::observer::{DiscardReason, LevelKind};
use crate::mesh::refinement::level::LevelQueue;
use crate::mesh::refinement::visitor::MeshVisitor;
use crate::mesh::refinement::worklist::BadElement;
use crate::mesh::refinement::{
    ConflictStatus, Preparation, PreparedInsertion, RefinementContext, StepOutcome,
};

const CHECK_NOTHING: u8 = 0;
const CHECK_EDGES: u8 = 1;
const CHECK_EDGES_AND_VERTICES: u8 = 2;

/// Priority of facets queued to repair the topology.
const TOPOLOGY_QUALITY: Quality = Quality::new(0.0);

/// Surface facet of the dual of `facet`, if the facet is restricted.
#[must_use]
pub fn restricted_facet<D: MeshDomain + ?Sized>(
    tr: &Triangulation,
    domain: &D,
    facet: Facet,
) -> Option<SurfaceFacet> {
    if tr.is_infinite_facet(facet) {
        return None;
    }
    let mirror = tr.mirror_facet(facet)?;
    // Orient the dual from the smaller cell key so both sides agree.
    let (first, second) = if facet.cell() <= mirror.cell() {
        (facet, mirror)
    } else {
        (mirror, facet)
    };
    let hit = match (
        tr.is_infinite_cell(first.cell()),
        tr.is_infinite_cell(second.cell()),
    ) {
        (false, false) => {
            let a = tr.circumcenter(first.cell())?;
            let b = tr.circumcenter(second.cell())?;
            domain.intersect_segment(&a, &b)?
        }
        (false, true) => dual_ray(tr, domain, first)?,
        (true, false) => dual_ray(tr, domain, second)?,
        (true, true) => return None,
    };
    Some(SurfaceFacet {
        patch: hit.patch,
        surface_center: hit.point,
    })
}

/// Criteria view of the restricted facet `key`.
#[must_use]
pub fn facet_view(complex: &MeshComplex, key: FacetKey, surface: &SurfaceFacet) -> Option<FacetView> {
    let tr = complex.triangulation();
    let [a, b, c] = *key.vertices();
    Some(FacetView {
        key,
        vertices: [*tr.point(a)?, *tr.point(b)?, *tr.point(c)?],
        surface_center: surface.surface_center,
        patch: surface.patch,
        vertex_patches: (*key.vertices())
            .map(|v| complex.vertex_info(v).and_then(|info| info.surface_patch())),
    })
}

fn dual_ray<D: MeshDomain + ?Sized>(
    tr: &Triangulation,
    domain: &D,
    finite: Facet,
) -> Option<SurfaceIntersection> {
    let origin = tr.circumcenter(finite.cell())?;
    let dir = tr.facet_outward_normal(finite)?;
    domain.intersect_ray(&origin, &dir)
}

/// What the criteria and the domain say about one facet.
#[derive(Clone, Copy, Debug)]
struct FacetEvaluation {
    key: FacetKey,
    surface: Option<SurfaceFacet>,
    quality: Option<Quality>,
}

/// The facet level.
pub struct FacetLevel<'a, FC: ?Sized> {
    criteria: &'a FC,
    queue: LevelQueue<FacetKey>,
    topology: MeshTopology,
    topology_checks: AtomicU8,
}

impl<'a, FC: FacetCriteria + ?Sized> FacetLevel<'a, FC> {
    /// Creates an empty level.
    #[must_use]
    pub fn new(criteria: &'a FC, topology: MeshTopology) -> Self {
        Self {
            criteria,
            queue: LevelQueue::default(),
            topology,
            topology_checks: AtomicU8::new(CHECK_NOTHING),
        }
    }

    /// The criteria.
    #[must_use]
    pub const fn criteria(&self) -> &'a FC {
        self.criteria
    }

    /// The queue of bad facets.
    #[must_use]
    pub const fn queue(&self) -> &LevelQueue<FacetKey> {
        &self.queue
    }

    /// Mutable queue, to change its partition.
    pub const fn queue_mut(&mut self) -> &mut LevelQueue<FacetKey> {
        &mut self.queue
    }

    /// Number of queued facets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no facet is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns `true` if no facet is queued.
    #[must_use]
    pub fn is_algorithm_done(&self) -> bool {
        self.queue.is_empty()
    }

    /// Stops the topology repairs enabled by the edge and vertex scans.
    pub fn reset_topology_checks(&self) {
        self.topology_checks.store(CHECK_NOTHING, Ordering::Relaxed);
    }

    fn evaluate<D: MeshDomain + ?Sized>(
        &self,
        complex: &MeshComplex,
        domain: &D,
        facet: Facet,
    ) -> Option<FacetEvaluation> {
        let tr = complex.triangulation();
        if tr.is_infinite_facet(facet) {
            return None;
        }
        let key = tr.facet_key(facet)?;
        let surface = restricted_facet(tr, domain, facet);
        let quality = surface.and_then(|s| {
            let view = facet_view(complex, key, &s)?;
            self.criteria.is_bad(tr, &view)
        });
        Some(FacetEvaluation {
            key,
            surface,
            quality,
        })
    }

    // Returns `true` if the facet was queued.
    fn apply(&self, complex: &mut MeshComplex, evaluation: FacetEvaluation) -> bool {
        let FacetEvaluation {
            key,
            surface,
            quality,
        } = evaluation;
        match surface {
            Some(s) => complex.add_facet(key, s),
            None => {
                complex.remove_facet(&key);
            }
        }
        match (surface, quality) {
            (Some(s), Some(q)) => {
                self.queue.push(BadElement::new(key, q, s.surface_center));
                true
            }
            _ => {
                self.queue.remove(&key);
                false
            }
        }
    }

    /// Evaluates every finite facet, labels restricted ones in the complex
    /// and queues the bad ones. Returns the number queued.
    pub fn scan_triangulation<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> usize {
        self.queue.clear();
        let facets: Vec<Facet> = complex.triangulation().finite_facets().collect();
        let evaluations: Vec<FacetEvaluation> = {
            let complex = &*complex;
            if ctx.config.is_parallel() {
                facets
                    .par_iter()
                    .filter_map(|&f| self.evaluate(complex, ctx.domain, f))
                    .collect()
            } else {
                facets
                    .iter()
                    .filter_map(|&f| self.evaluate(complex, ctx.domain, f))
                    .collect()
            }
        };
        let queued = evaluations
            .into_iter()
            .filter(|&e| self.apply(complex, e))
            .count();
        tracing::debug!(
            "Facet scan: {} facets, {} restricted, {queued} bad",
            facets.len(),
            complex.number_of_facets()
        );
        ctx.observer.scan_completed(LevelKind::Facets, queued);
        queued
    }

    /// Number of bad restricted facets, by fresh evaluation.
    #[must_use]
    pub fn count_bad<D: MeshDomain + ?Sized>(&self, complex: &MeshComplex, domain: &D) -> usize {
        complex
            .triangulation()
            .finite_facets()
            .filter_map(|f| self.evaluate(complex, domain, f))
            .filter(|e| e.quality.is_some())
            .count()
    }

    // -------------------------------------------------------------------------
    // Topology
    // -------------------------------------------------------------------------

    const fn edge_violates(&self, restricted: usize) -> bool {
        match self.topology {
            MeshTopology::NonManifold => false,
            MeshTopology::ManifoldWithBoundary => restricted > 2,
            MeshTopology::Manifold => restricted != 2,
        }
    }

    fn umbrella_is_valid(&self, v: VertexKey, facets: &[FacetKey]) -> bool {
        let mut link: FastHashMap<VertexKey, SmallVec<[VertexKey; 2]>> = FastHashMap::default();
        for key in facets {
            let mut others = key.vertices().iter().copied().filter(|&w| w != v);
            let (Some(a), Some(b)) = (others.next(), others.next()) else {
                return false;
            };
            link.entry(a).or_default().push(b);
            link.entry(b).or_default().push(a);
        }
        if link.values().any(|n| n.len() > 2) {
            return false;
        }
        let ends = link.values().filter(|n| n.len() == 1).count();
        let shape_ok = match (ends, self.topology) {
            (0, _) | (2, MeshTopology::ManifoldWithBoundary) => true,
            (_, MeshTopology::NonManifold) => return true,
            _ => false,
        };
        if !shape_ok {
            return false;
        }

        // The link must be a single cycle or path.
        let Some(&start) = link.keys().next() else {
            return true;
        };
        let mut seen: FastHashSet<VertexKey> = FastHashSet::default();
        let mut stack = vec![start];
        while let Some(w) = stack.pop() {
            if seen.insert(w) {
                stack.extend(link[&w].iter().copied());
            }
        }
        seen.len() == link.len()
    }

    // Returns `true` if a facet was queued.
    fn queue_largest(&self, complex: &MeshComplex, facets: &[FacetKey]) -> bool {
        let tr = complex.triangulation();
        let largest = facets
            .iter()
            .filter_map(|key| {
                let surface = complex.surface_facet(key)?;
                let p = tr.point(key.vertices()[0])?;
                Some((key, surface, surface.surface_center.squared_distance(p)))
            })
            .max_by(|a, b| a.2.total_cmp(&b.2));
        match largest {
            Some((key, surface, _)) if !self.queue.contains(key) => {
                self.queue
                    .push(BadElement::new(*key, TOPOLOGY_QUALITY, surface.surface_center));
                true
            }
            _ => false,
        }
    }

    /// Queues, for every restricted edge with a wrong number of restricted
    /// facets, its incident facet with the largest surface ball. Enables
    /// the same check after every later insertion.
    pub fn scan_edges<D: MeshDomain + ?Sized>(
        &self,
        complex: &MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> usize {
        self.topology_checks.fetch_max(CHECK_EDGES, Ordering::Relaxed);
        let mut around: FastHashMap<EdgeKey, SmallVec<[FacetKey; 4]>> = FastHashMap::default();
        if self.topology != MeshTopology::NonManifold {
            for (key, _) in complex.facets_in_complex() {
                for edge in key.edges() {
                    around.entry(edge).or_default().push(*key);
                }
            }
        }
        let queued = around
            .values()
            .filter(|facets| self.edge_violates(facets.len()))
            .filter(|facets| self.queue_largest(complex, facets))
            .count();
        tracing::debug!("Edge scan ({:?}): {queued} facets queued", self.topology);
        ctx.observer.scan_completed(LevelKind::Facets, queued);
        queued
    }

    /// Queues, for every surface vertex whose restricted facets do not form
    /// a valid umbrella, its incident facet with the largest surface ball.
    /// Enables the same check after every later insertion.
    pub fn scan_vertices<D: MeshDomain + ?Sized>(
        &self,
        complex: &MeshComplex,
        ctx: RefinementContext<'_, D>,
    ) -> usize {
        self.topology_checks
            .fetch_max(CHECK_EDGES_AND_VERTICES, Ordering::Relaxed);
        let mut around: FastHashMap<VertexKey, Vec<FacetKey>> = FastHashMap::default();
        if self.topology != MeshTopology::NonManifold {
            for (key, _) in complex.facets_in_complex() {
                for &v in key.vertices() {
                    around.entry(v).or_default().push(*key);
                }
            }
        }
        let queued = around
            .iter()
            .filter(|(v, facets)| !self.umbrella_is_valid(**v, facets))
            .filter(|(_, facets)| self.queue_largest(complex, facets))
            .count();
        tracing::debug!("Vertex scan ({:?}): {queued} facets queued", self.topology);
        ctx.observer.scan_completed(LevelKind::Facets, queued);
        queued
    }

    fn restricted_facets_around_vertex(complex: &MeshComplex, v: VertexKey) -> Vec<FacetKey> {
        let tr = complex.triangulation();
        let mut keys = FastHashSet::default();
        for c in tr.incident_cells(v) {
            let Some(cell) = tr.cell(c) else {
                continue;
            };
            for i in 0..4u8 {
                if cell.vertex(usize::from(i)) == v {
                    continue;
                }
                let key = FacetKey::new(cell.facet_vertices(i));
                if complex.is_facet_in_complex(&key) {
                    keys.insert(key);
                }
            }
        }
        keys.into_iter().collect()
    }

    fn check_topology_around(&self, complex: &MeshComplex, keys: &[FacetKey]) {
        let checks = self.topology_checks.load(Ordering::Relaxed);
        if checks == CHECK_NOTHING || self.topology == MeshTopology::NonManifold {
            return;
        }
        let tr = complex.triangulation();
        let mut edges = FastHashSet::default();
        let mut vertices = FastHashSet::default();
        for key in keys {
            edges.extend(key.edges());
            vertices.extend(key.vertices().iter().copied());
        }
        for edge in edges {
            let [a, b] = *edge.vertices();
            let restricted: Vec<FacetKey> = tr
                .edge_facet_keys(a, b)
                .into_iter()
                .filter(|k| complex.is_facet_in_complex(k))
                .collect();
            if self.edge_violates(restricted.len()) {
                self.queue_largest(complex, &restricted);
            }
        }
        if checks >= CHECK_EDGES_AND_VERTICES {
            for v in vertices {
                let restricted = Self::restricted_facets_around_vertex(complex, v);
                if !self.umbrella_is_valid(v, &restricted) {
                    self.queue_largest(complex, &restricted);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Hooks
    // -------------------------------------------------------------------------

    /// Re-evaluates every facet of `cells` that still exists.
    pub fn reevaluate<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        cells: &[CellKey],
    ) {
        let tr = complex.triangulation();
        let mut seen = FastHashSet::default();
        let facets: Vec<Facet> = cells
            .iter()
            .filter(|&&c| tr.contains_cell(c))
            .flat_map(|&c| (0..4u8).map(move |i| Facet::new(c, i)))
            .filter(|&f| tr.facet_key(f).is_some_and(|k| seen.insert(k)))
            .collect();
        let evaluations: Vec<FacetEvaluation> = facets
            .into_iter()
            .filter_map(|f| self.evaluate(complex, ctx.domain, f))
            .collect();
        let restricted: Vec<FacetKey> = evaluations
            .iter()
            .filter(|e| e.surface.is_some())
            .map(|e| e.key)
            .collect();
        for evaluation in evaluations {
            self.apply(complex, evaluation);
        }
        self.check_topology_around(complex, &restricted);
    }

    /// Drops the queued facets of the conflict cells.
    pub fn before_insertion(&self, complex: &MeshComplex, zone: &ConflictZone) {
        let tr = complex.triangulation();
        for cell in zone.cells.iter().filter_map(|&c| tr.cell(c)) {
            for i in 0..4u8 {
                self.queue.remove(&FacetKey::new(cell.facet_vertices(i)));
            }
        }
    }

    /// Re-evaluates every facet of the new cells.
    pub fn after_insertion<D: MeshDomain + ?Sized>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        outcome: &InsertionOutcome,
    ) {
        self.reevaluate(complex, ctx, &outcome.new_cells);
    }

    /// Queues as encroached every restricted facet of `zone` whose surface
    /// Delaunay ball strictly contains `point`.
    pub fn test_encroachment(
        &self,
        complex: &MeshComplex,
        point: &Point,
        zone: &ConflictZone,
    ) -> ConflictStatus {
        let tr = complex.triangulation();
        let mut encroached = false;
        let mut seen = FastHashSet::default();
        for cell in zone.cells.iter().filter_map(|&c| tr.cell(c)) {
            for i in 0..4u8 {
                let key = FacetKey::new(cell.facet_vertices(i));
                if !seen.insert(key) {
                    continue;
                }
                let Some(surface) = complex.surface_facet(&key) else {
                    continue;
                };
                let Some(p) = tr.point(key.vertices()[0]) else {
                    continue;
                };
                let radius2 = surface.surface_center.squared_distance(p);
                if point.squared_distance(&surface.surface_center) < radius2 {
                    self.queue
                        .push(BadElement::encroached(key, surface.surface_center));
                    encroached = true;
                }
            }
        }
        if encroached {
            ConflictStatus::ConflictButElementCanBeReconsidered
        } else {
            ConflictStatus::NoConflict
        }
    }

    // -------------------------------------------------------------------------
    // Steps
    // -------------------------------------------------------------------------

    /// Pops the best record, starting from worksharing bin `preferred`.
    pub fn pop(&self, preferred: usize) -> Option<BadElement<FacetKey>> {
        self.queue.pop(preferred)
    }

    /// Read-only phase of a step: re-validates `record`, computes its
    /// refinement point and conflict zone and runs the conflict tests.
    pub fn prepare<V: MeshVisitor>(
        &self,
        complex: &MeshComplex,
        visitor: &V,
        record: BadElement<FacetKey>,
    ) -> Preparation<FacetKey> {
        let tr = complex.triangulation();
        let (Some(facet), Some(surface)) = (
            tr.facet_from_key(&record.element),
            complex.surface_facet(&record.element),
        ) else {
            return Preparation::Discard(DiscardReason::Stale);
        };
        let point = surface.surface_center;
        let zone = match tr.find_conflicts(&point, Some(facet.cell())) {
            Ok(zone) => zone,
            Err(e) => {
                tracing::warn!("Dropping facet {}: no conflict zone for {point}: {e}", record.element);
                return Preparation::Discard(DiscardReason::InsertionFailed);
            }
        };
        match visitor.test_point_conflict_from_superior(complex, &point, &zone) {
            ConflictStatus::NoConflict => {}
            ConflictStatus::ConflictButElementCanBeReconsidered
            | ConflictStatus::CouldNotLockZone => return Preparation::Requeue(record),
            ConflictStatus::ConflictAndElementShouldBeDropped => {
                return Preparation::Discard(DiscardReason::OutsideDomain);
            }
        }
        Preparation::Ready(PreparedInsertion {
            record,
            point,
            info: VertexInfo::surface(surface.patch),
            zone,
        })
    }

    /// Mutating phase of a step: runs the hooks around the insertion.
    ///
    /// # Errors
    ///
    /// Returns an error if the visitor fails to classify new elements.
    pub fn commit<D, V>(
        &self,
        complex: &mut MeshComplex,
        ctx: RefinementContext<'_, D>,
        visitor: &V,
        prepared: PreparedInsertion<FacetKey>,
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
        self.before_insertion(complex, &zone);
        match complex.insert_in_conflict_zone(point, &zone, info) {
            Ok(outcome) => {
                self.after_insertion(complex, ctx, &outcome);
                visitor.after_insertion(complex, ctx, &outcome)?;
                tracing::trace!("Refined facet {} at {point}", record.element);
                ctx.observer.vertex_inserted(LevelKind::Facets);
                Ok(StepOutcome::Inserted)
            }
            Err(e) => {
                tracing::warn!("Dropping facet {}: cannot insert {point}: {e}", record.element);
                self.reevaluate(complex, ctx, &zone.cells);
                visitor.insertion_rejected(complex, ctx, &zone)?;
                self.queue.remove(&record.element);
                ctx.observer
                    .record_discarded(LevelKind::Facets, DiscardReason::InsertionFailed);
                Ok(StepOutcome::Discarded(DiscardReason::InsertionFailed))
            }
        }
    }

    /// Fixes the worst queued facet.
    ///
    /// # Errors
    ///
    /// Returns an error if the visitor fails to classify new elements.
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
        if !visitor.refine_previous_level(complex, ctx)? {
            return Ok(StepOutcome::BudgetReached);
        }
        let Some(record) = self.queue.pop_best() else {
            return Ok(StepOutcome::Empty);
        };
        match self.prepare(complex, visitor, record) {
            Preparation::Ready(prepared) => self.commit(complex, ctx, visitor, prepared),
            Preparation::Discard(reason) => {
                ctx.observer.record_discarded(LevelKind::Facets, reason);
                Ok(StepOutcome::Discarded(reason))
            }
            Preparation::Requeue(record) => {
                self.queue.push(record);
                ctx.observer
                    .record_discarded(LevelKind::Facets, DiscardReason::Deferred);
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
            if ctx.budget_reached(complex) {
                return Ok(false);
            }
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
    use crate::geometry::point::Bbox3;
    use crate::mesh::config::MesherConfig;
    use crate::mesh::domain::labeled_function::LabeledFunctionDomain;
    use crate::mesh::domain::{PatchIndex, SubdomainIndex};
    use crate::mesh::observer::NullObserver;
    use crate::mesh::refinement::visitor::NullVisitor;

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

    fn never_bad(_: &Triangulation, _: &FacetView) -> Option<Quality> {
        None
    }

    fn always_bad(_: &Triangulation, _: &FacetView) -> Option<Quality> {
        Some(Quality::new(0.5))
    }

    #[test]
    fn test_octahedron_hull_facets_are_restricted() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = never_bad;
        let level = FacetLevel::new(&criteria, MeshTopology::NonManifold);
        assert_eq!(level.scan_triangulation(&mut complex, ctx), 0);
        // The eight hull facets cut the sphere along their outward normals.
        assert_eq!(complex.number_of_facets(), 8);
        for (key, surface) in complex.facets_in_complex() {
            assert_eq!(surface.patch, PatchIndex(1));
            approx::assert_relative_eq!(
                surface.surface_center.distance(&Point::ORIGIN),
                1.0,
                epsilon = 1e-5
            );
            let view = facet_view(&complex, *key, surface).unwrap();
            assert_eq!(view.vertex_patches, [Some(PatchIndex(1)); 3]);
        }
        assert!(level.is_algorithm_done());
    }

    #[test]
    fn test_refining_one_facet_inserts_its_surface_center() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = always_bad;
        let level = FacetLevel::new(&criteria, MeshTopology::NonManifold);
        assert_eq!(level.scan_triangulation(&mut complex, ctx), 8);

        let outcome = level.one_step(&mut complex, ctx, &NullVisitor).unwrap();
        assert_eq!(outcome, StepOutcome::Inserted);
        assert_eq!(complex.triangulation().number_of_vertices(), 7);
        assert!(complex.triangulation().is_delaunay());
        let surface_vertices = complex
            .triangulation()
            .finite_vertices()
            .filter(|(v, _)| complex.vertex_info(*v) == Some(VertexInfo::surface(PatchIndex(1))))
            .count();
        assert_eq!(surface_vertices, 7);
        // Restricted facets stay labeled and queued after the insertion.
        assert_eq!(level.len(), complex.number_of_facets());
    }

    #[test]
    fn test_stale_record_is_discarded() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = never_bad;
        let level = FacetLevel::new(&criteria, MeshTopology::NonManifold);
        level.scan_triangulation(&mut complex, ctx);

        let vertices: Vec<VertexKey> = complex
            .triangulation()
            .finite_vertices()
            .map(|(v, _)| v)
            .take(2)
            .collect();
        let bogus = FacetKey::new([vertices[0], vertices[1], vertices[1]]);
        level
            .queue()
            .push(BadElement::new(bogus, Quality::new(0.1), Point::ORIGIN));
        let outcome = level.one_step(&mut complex, ctx, &NullVisitor).unwrap();
        assert_eq!(outcome, StepOutcome::Discarded(DiscardReason::Stale));
        assert_eq!(complex.triangulation().number_of_vertices(), 6);
        assert_eq!(
            level.one_step(&mut complex, ctx, &NullVisitor).unwrap(),
            StepOutcome::Empty
        );
    }

    #[test]
    fn test_encroachment_queues_restricted_facets() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = never_bad;
        let level = FacetLevel::new(&criteria, MeshTopology::NonManifold);
        level.scan_triangulation(&mut complex, ctx);

        let point = Point::new([0.5, 0.5, 0.5]);
        let zone = complex.triangulation().find_conflicts(&point, None).unwrap();
        assert_eq!(
            level.test_encroachment(&complex, &point, &zone),
            ConflictStatus::ConflictButElementCanBeReconsidered
        );
        let records = level.queue().records();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.encroached && r.quality == Quality::ENCROACHED));

        let center = Point::new([0.0, 0.0, 0.01]);
        let zone = complex.triangulation().find_conflicts(&center, None).unwrap();
        level.queue().clear();
        assert_eq!(
            level.test_encroachment(&complex, &center, &zone),
            ConflictStatus::NoConflict
        );
    }

    #[test]
    fn test_manifold_vertex_scan_accepts_closed_octahedron() {
        let domain = ball();
        let mut complex = octahedron_complex();
        let config = MesherConfig::default();
        let ctx = RefinementContext {
            domain: &domain,
            config: &config,
            observer: &NullObserver,
        };
        let criteria = never_bad;
        let level = FacetLevel::new(&criteria, MeshTopology::Manifold);
        level.scan_triangulation(&mut complex, ctx);
        assert_eq!(level.scan_edges(&complex, ctx), 0);
        assert_eq!(level.scan_vertices(&complex, ctx), 0);
    }
}
