//! Domain bounded by a complex of triangulated polyhedral surfaces.
//!
//! Each input polyhedron is an indexed triangle surface separating two
//! subdomains: `first` on the side opposite to the triangle normals,
//! `second` on the side they point to. Polyhedron `i` starts as patch
//! `i + 1`; feature detection may split it into several patches.
//!
//! Points are classified by shooting a random ray and looking at the side
//! of the first triangle hit. Rays grazing an edge, or a query point lying
//! in the plane of the hit triangle, are retried with a new direction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::algorithms::locate::ConflictError;
use crate::core::algorithms::incremental_insertion::InsertionError;
use crate::core::collections::{FastHashMap, FastHashSet};
use crate::core::triangulation::Triangulation;
use crate::geometry::aabb_tree::{AabbTree, RayHit, Triangle};
use crate::geometry::point::{Bbox3, Point};
use crate::geometry::predicates::{Orientation, orientation};
use crate::geometry::util::{angle_between_degrees, random_unit_vector, triangle_normal};
use crate::mesh::complex::{MeshComplex, VertexInfo};
use crate::mesh::domain::{MeshDomain, PatchIndex, SubdomainIndex, SurfaceIntersection};
use crate::mesh::error::{DomainError, MeshError};

/// Default cap on classification attempts.
pub const DEFAULT_MAX_RETRIES: usize = 64;

/// Maximum number of vertices seeded per patch without feature edges.
const MAX_SEEDS_PER_PATCH: usize = 20;

/// Indexed triangle surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Polyhedron {
    /// Vertex positions.
    pub vertices: Vec<Point>,
    /// Triangles as triples of vertex indices.
    pub faces: Vec<[usize; 3]>,
}

impl Polyhedron {
    /// Creates a polyhedron from vertices and faces.
    #[must_use]
    pub const fn new(vertices: Vec<Point>, faces: Vec<[usize; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Surface of `bbox`, two triangles per side, normals pointing out.
    #[must_use]
    pub fn axis_aligned_box(bbox: &Bbox3) -> Self {
        // Vertex i has coordinate bit k of i selecting min or max on axis k.
        let vertices = (0..8)
            .map(|i: usize| {
                Point::new(std::array::from_fn(|k| {
                    if (i >> k) & 1 == 0 {
                        bbox.min[k]
                    } else {
                        bbox.max[k]
                    }
                }))
            })
            .collect();
        let faces = vec![
            [0, 2, 1],
            [1, 2, 3],
            [4, 5, 6],
            [5, 7, 6],
            [0, 1, 4],
            [1, 5, 4],
            [2, 6, 3],
            [3, 6, 7],
            [0, 4, 2],
            [2, 4, 6],
            [1, 3, 5],
            [3, 7, 5],
        ];
        Self { vertices, faces }
    }

    /// Points of face `f`.
    #[must_use]
    pub fn face_points(&self, f: usize) -> [Point; 3] {
        self.faces[f].map(|v| self.vertices[v])
    }

    /// Non-normalized normal of face `f`.
    #[must_use]
    pub fn face_normal(&self, f: usize) -> Vector3<f64> {
        let [a, b, c] = self.face_points(f);
        triangle_normal(&a, &b, &c)
    }

    /// Undirected edges mapped to their incident faces.
    fn edge_faces(&self) -> BTreeMap<(usize, usize), SmallVec<[usize; 2]>> {
        let mut map: BTreeMap<(usize, usize), SmallVec<[usize; 2]>> = BTreeMap::new();
        for (f, face) in self.faces.iter().enumerate() {
            for i in 0..3 {
                let (a, b) = (face[i], face[(i + 1) % 3]);
                map.entry((a.min(b), a.max(b))).or_default().push(f);
            }
        }
        map
    }

    fn validate(&self, polyhedron: usize) -> Result<(), DomainError> {
        for (face, vertices) in self.faces.iter().enumerate() {
            if let Some(&vertex) = vertices.iter().find(|&&v| v >= self.vertices.len()) {
                return Err(DomainError::InvalidFace {
                    polyhedron,
                    face,
                    vertex,
                });
            }
        }
        Ok(())
    }
}

/// A chain of feature edges and the patches along it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeaturePolyline {
    /// Consecutive points; closed loops repeat their first point.
    pub points: Vec<Point>,
    /// Patches incident to the polyline's edges.
    pub adjacent_patches: BTreeSet<PatchIndex>,
}

impl FeaturePolyline {
    /// Number of segments.
    #[must_use]
    pub fn number_of_segments(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    /// Returns `true` if the polyline is a closed loop.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.points.len() > 2 && self.points.first() == self.points.last()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct FaceRef {
    polyhedron: usize,
    face: usize,
}

/// Domain bounded by several polyhedral surfaces.
#[derive(Clone, Debug)]
pub struct PolyhedralComplexDomain {
    polyhedra: Vec<Polyhedron>,
    subdomain_pairs: Vec<(SubdomainIndex, SubdomainIndex)>,
    face_patches: Vec<Vec<PatchIndex>>,
    // Indexed by patch; slot 0 is unused.
    patch_to_polyhedron: Vec<Option<usize>>,
    patch_has_feature_edges: Vec<bool>,
    feature_vertices: Vec<Vec<bool>>,
    boundary_patches: Vec<PatchIndex>,
    inside_polyhedra: Vec<usize>,
    boundary_polyhedra: Vec<usize>,
    features: Vec<FeaturePolyline>,
    features_detected: bool,
    tree: AabbTree<FaceRef>,
    bbox: Bbox3,
    seed: u64,
    max_retries: usize,
}

impl PolyhedralComplexDomain {
    /// Builds the domain from polyhedra and their `(first, second)`
    /// subdomain pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the counts differ, a face references a missing
    /// vertex, or there is no triangle at all.
    pub fn new(
        polyhedra: Vec<Polyhedron>,
        subdomain_pairs: Vec<(SubdomainIndex, SubdomainIndex)>,
    ) -> Result<Self, DomainError> {
        if polyhedra.len() != subdomain_pairs.len() {
            return Err(DomainError::MismatchedSubdomainPairs {
                polyhedra: polyhedra.len(),
                pairs: subdomain_pairs.len(),
            });
        }
        for (i, polyhedron) in polyhedra.iter().enumerate() {
            polyhedron.validate(i)?;
        }

        let mut triangles = Vec::new();
        for (p, polyhedron) in polyhedra.iter().enumerate() {
            for f in 0..polyhedron.faces.len() {
                let [a, b, c] = polyhedron.face_points(f);
                triangles.push((
                    Triangle::new(a, b, c),
                    FaceRef {
                        polyhedron: p,
                        face: f,
                    },
                ));
            }
        }
        if triangles.is_empty() {
            return Err(DomainError::EmptyDomain);
        }
        let tree = AabbTree::new(triangles);
        let bbox = tree.bbox();
        if bbox.is_empty() || bbox.min.iter().chain(&bbox.max).any(|c| !c.is_finite()) {
            return Err(DomainError::InvalidBoundingBox);
        }

        let face_patches = polyhedra
            .iter()
            .enumerate()
            .map(|(p, polyhedron)| vec![patch_of(p + 1); polyhedron.faces.len()])
            .collect();
        let patch_to_polyhedron = std::iter::once(None)
            .chain((0..polyhedra.len()).map(Some))
            .collect();
        let feature_vertices = polyhedra
            .iter()
            .map(|polyhedron| vec![false; polyhedron.vertices.len()])
            .collect();

        let mut domain = Self {
            patch_has_feature_edges: vec![false; polyhedra.len() + 1],
            polyhedra,
            subdomain_pairs,
            face_patches,
            patch_to_polyhedron,
            feature_vertices,
            boundary_patches: Vec::new(),
            inside_polyhedra: Vec::new(),
            boundary_polyhedra: Vec::new(),
            features: Vec::new(),
            features_detected: false,
            tree,
            bbox,
            seed: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        };
        domain.compute_boundary_patches();
        tracing::debug!(
            "Built polyhedral complex domain: {} polyhedra, {} triangles",
            domain.polyhedra.len(),
            domain.tree.len()
        );
        Ok(domain)
    }

    /// Sets the seed of the random ray directions.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the cap on classification attempts used by
    /// [`MeshDomain::is_in_domain`].
    ///
    /// The mesher does not use it: refinement classifies through
    /// [`MeshDomain::is_in_domain_with_retries`] with
    /// [`MesherConfig::classification_max_retries`].
    ///
    /// [`MesherConfig::classification_max_retries`]: crate::mesh::config::MesherConfig::classification_max_retries
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The input polyhedra.
    #[must_use]
    pub fn polyhedra(&self) -> &[Polyhedron] {
        &self.polyhedra
    }

    /// Number of patch slots in use (patch indices are `1..=n`).
    #[must_use]
    pub fn number_of_patches(&self) -> usize {
        self.patch_to_polyhedron.len().saturating_sub(1)
    }

    /// Patch of face `face` of polyhedron `polyhedron`.
    #[must_use]
    pub fn face_patch(&self, polyhedron: usize, face: usize) -> Option<PatchIndex> {
        self.face_patches.get(polyhedron)?.get(face).copied()
    }

    /// Subdomains on the negative and positive side of `patch`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::UnknownPatch`] for patch `0` or an index the
    /// domain never assigned.
    pub fn incident_subdomains_indices(
        &self,
        patch: PatchIndex,
    ) -> Result<(SubdomainIndex, SubdomainIndex), DomainError> {
        self.patch_to_polyhedron
            .get(patch.0 as usize)
            .copied()
            .flatten()
            .map(|p| self.subdomain_pairs[p])
            .ok_or(DomainError::UnknownPatch { patch })
    }

    /// Patches with the exterior on one side.
    #[must_use]
    pub fn boundary_patches(&self) -> &[PatchIndex] {
        &self.boundary_patches
    }

    /// Polyhedra separating two interior subdomains.
    #[must_use]
    pub fn inside_polyhedra(&self) -> &[usize] {
        &self.inside_polyhedra
    }

    /// Polyhedra with the exterior on one side.
    #[must_use]
    pub fn boundary_polyhedra(&self) -> &[usize] {
        &self.boundary_polyhedra
    }

    /// Recomputes [`Self::boundary_patches`], [`Self::inside_polyhedra`]
    /// and [`Self::boundary_polyhedra`].
    pub fn compute_boundary_patches(&mut self) {
        self.boundary_patches = (1..self.patch_to_polyhedron.len())
            .filter_map(|i| {
                let p = self.patch_to_polyhedron[i]?;
                let (first, second) = self.subdomain_pairs[p];
                (first.is_exterior() || second.is_exterior()).then(|| patch_of(i))
            })
            .collect();
        (self.boundary_polyhedra, self.inside_polyhedra) = (0..self.polyhedra.len())
            .partition(|&p| {
                let (first, second) = self.subdomain_pairs[p];
                first.is_exterior() || second.is_exterior()
            });
    }

    /// Detected feature polylines.
    #[must_use]
    pub fn features(&self) -> &[FeaturePolyline] {
        &self.features
    }

    /// Returns `true` if `patch` touches a feature edge.
    #[must_use]
    pub fn patch_has_feature_edges(&self, patch: PatchIndex) -> bool {
        self.patch_has_feature_edges
            .get(patch.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Returns `true` if vertex `vertex` of polyhedron `polyhedron` lies on
    /// a feature edge.
    #[must_use]
    pub fn is_feature_vertex(&self, polyhedron: usize, vertex: usize) -> bool {
        self.feature_vertices
            .get(polyhedron)
            .and_then(|flags| flags.get(vertex))
            .copied()
            .unwrap_or(false)
    }

    /// Detects borders only.
    pub fn detect_borders(&mut self) {
        self.detect_features(180.0);
    }

    /// Splits polyhedra into patches along sharp edges and extracts the
    /// feature polylines.
    ///
    /// An edge is a feature if it is a border, is shared by more than two
    /// faces, or the normals of its two faces make an angle larger than
    /// `angle_bound_degrees`. Only the first call has an effect.
    pub fn detect_features(&mut self, angle_bound_degrees: f64) {
        if self.features_detected {
            return;
        }
        self.features_detected = true;

        let mut patch_to_polyhedron = vec![None];
        let mut graph = FeatureGraph::default();
        let mut patch_has_feature_edges = vec![false];

        for (p, polyhedron) in self.polyhedra.iter().enumerate() {
            let edges = polyhedron.edge_faces();
            let is_feature = |faces: &[usize]| match faces {
                [f, g] => {
                    angle_between_degrees(&polyhedron.face_normal(*f), &polyhedron.face_normal(*g))
                        > angle_bound_degrees
                }
                _ => true,
            };

            // Flood-fill faces across non-feature edges.
            let mut face_neighbors = vec![SmallVec::<[usize; 3]>::new(); polyhedron.faces.len()];
            for faces in edges.values() {
                if let [f, g] = faces.as_slice() {
                    if !is_feature(faces.as_slice()) {
                        face_neighbors[*f].push(*g);
                        face_neighbors[*g].push(*f);
                    }
                }
            }
            let patches = &mut self.face_patches[p];
            let mut assigned = vec![false; polyhedron.faces.len()];
            for start in 0..polyhedron.faces.len() {
                if assigned[start] {
                    continue;
                }
                let patch = patch_of(patch_to_polyhedron.len());
                patch_to_polyhedron.push(Some(p));
                patch_has_feature_edges.push(false);
                assigned[start] = true;
                let mut queue = VecDeque::from([start]);
                while let Some(f) = queue.pop_front() {
                    patches[f] = patch;
                    for &g in &face_neighbors[f] {
                        if !assigned[g] {
                            assigned[g] = true;
                            queue.push_back(g);
                        }
                    }
                }
            }

            for (&(a, b), faces) in &edges {
                if !is_feature(faces.as_slice()) {
                    continue;
                }
                self.feature_vertices[p][a] = true;
                self.feature_vertices[p][b] = true;
                let adjacent: BTreeSet<PatchIndex> = faces.iter().map(|&f| patches[f]).collect();
                for patch in &adjacent {
                    patch_has_feature_edges[patch.0 as usize] = true;
                }
                graph.add_edge(polyhedron.vertices[a], polyhedron.vertices[b], adjacent);
            }
        }

        self.patch_to_polyhedron = patch_to_polyhedron;
        self.patch_has_feature_edges = patch_has_feature_edges;
        self.features = graph.into_polylines();
        self.compute_boundary_patches();
        tracing::debug!(
            "Detected {} patches and {} feature polylines (angle bound {angle_bound_degrees})",
            self.number_of_patches(),
            self.features.len()
        );
    }

    /// Renames every patch `i` to `map[i]`; indices outside `map` are kept.
    pub fn reindex_patches(&mut self, map: &[PatchIndex]) {
        let remap = |patch: PatchIndex| map.get(patch.0 as usize).copied().unwrap_or(patch);

        for patches in &mut self.face_patches {
            for patch in patches.iter_mut() {
                *patch = remap(*patch);
            }
        }
        let size = self
            .patch_to_polyhedron
            .len()
            .max(map.iter().map(|p| p.0 as usize + 1).max().unwrap_or(0));
        let mut patch_to_polyhedron = vec![None; size];
        let mut patch_has_feature_edges = vec![false; size];
        for old in 1..self.patch_to_polyhedron.len() {
            let new = remap(patch_of(old)).0 as usize;
            if patch_to_polyhedron[new].is_none() {
                patch_to_polyhedron[new] = self.patch_to_polyhedron[old];
            }
            patch_has_feature_edges[new] |= self.patch_has_feature_edges[old];
        }
        self.patch_to_polyhedron = patch_to_polyhedron;
        self.patch_has_feature_edges = patch_has_feature_edges;
        for feature in &mut self.features {
            feature.adjacent_patches = feature.adjacent_patches.iter().map(|&p| remap(p)).collect();
        }
        self.compute_boundary_patches();
    }

    /// Gives one patch index to all patches of a polyhedron meeting at any
    /// of `points`, then reindexes.
    pub fn merge_duplicated_points(&mut self, points: &FastHashSet<Point>) {
        let n = self.patch_to_polyhedron.len();
        let mut parent: Vec<usize> = (0..n).collect();

        for (p, polyhedron) in self.polyhedra.iter().enumerate() {
            let mut around: FastHashMap<usize, SmallVec<[usize; 8]>> = FastHashMap::default();
            for (f, face) in polyhedron.faces.iter().enumerate() {
                for &v in face {
                    if points.contains(&polyhedron.vertices[v]) {
                        around
                            .entry(v)
                            .or_default()
                            .push(self.face_patches[p][f].0 as usize);
                    }
                }
            }
            for patches in around.values() {
                for pair in patches.windows(2) {
                    union(&mut parent, pair[0], pair[1]);
                }
            }
        }

        let map: Vec<PatchIndex> = (0..n).map(|i| patch_of(find(&mut parent, i))).collect();
        self.reindex_patches(&map);
    }

    /// Inserts polyhedron vertices into `complex` so that patches not
    /// touched by any feature edge get sampled.
    ///
    /// Up to 20 non-feature vertices per patch are picked at random among
    /// those not already in the triangulation. A patch with feature edges
    /// only gets the candidate farthest from the triangulation; other
    /// patches get every candidate. Returns the number of vertices added.
    ///
    /// # Errors
    ///
    /// Returns an error if a vertex cannot be inserted.
    pub fn add_vertices_on_patches_without_feature_edges(
        &self,
        complex: &mut MeshComplex,
    ) -> Result<usize, MeshError> {
        let tolerance = 1e-12 * self.bbox.diagonal() * self.bbox.diagonal();
        let n = self.patch_to_polyhedron.len();
        let mut rng = StdRng::seed_from_u64(0);
        let mut seen = vec![0usize; n];
        let mut samples: Vec<Vec<Point>> = vec![Vec::new(); n];

        for (p, polyhedron) in self.polyhedra.iter().enumerate() {
            let mut vertex_patch: Vec<Option<PatchIndex>> = vec![None; polyhedron.vertices.len()];
            for (f, face) in polyhedron.faces.iter().enumerate() {
                for &v in face {
                    vertex_patch[v].get_or_insert(self.face_patches[p][f]);
                }
            }
            for (v, point) in polyhedron.vertices.iter().enumerate() {
                let Some(patch) = vertex_patch[v] else {
                    continue;
                };
                if self.is_feature_vertex(p, v)
                    || squared_distance_to_triangulation(complex.triangulation(), point)
                        <= tolerance
                {
                    continue;
                }
                let slot = patch.0 as usize;
                seen[slot] += 1;
                if samples[slot].len() < MAX_SEEDS_PER_PATCH {
                    samples[slot].push(*point);
                } else {
                    let j = rng.random_range(0..seen[slot]);
                    if j < MAX_SEEDS_PER_PATCH {
                        samples[slot][j] = *point;
                    }
                }
            }
        }

        let mut added = 0;
        for (slot, candidates) in samples.into_iter().enumerate().skip(1) {
            let patch = patch_of(slot);
            let chosen: Vec<Point> = if self.patch_has_feature_edges(patch) {
                let tr = complex.triangulation();
                candidates
                    .into_iter()
                    .max_by(|a, b| {
                        squared_distance_to_triangulation(tr, a)
                            .total_cmp(&squared_distance_to_triangulation(tr, b))
                    })
                    .into_iter()
                    .collect()
            } else {
                candidates
            };
            for point in chosen {
                match complex.insert_point(point, VertexInfo::surface(patch)) {
                    Ok(_) => added += 1,
                    Err(InsertionError::ConflictRegion(ConflictError::DuplicateVertex {
                        ..
                    })) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tracing::debug!("Added {added} vertices on patches without feature edges");
        Ok(added)
    }

    fn classify(
        &self,
        p: &Point,
        max_retries: usize,
    ) -> Result<Option<SubdomainIndex>, DomainError> {
        if !self.bbox.contains(p) {
            return Ok(None);
        }
        let mut hasher = FxHasher::default();
        self.seed.hash(&mut hasher);
        p.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        for _ in 0..max_retries {
            let dir = random_unit_vector(&mut rng);
            match self.tree.first_ray_hit(p, &dir) {
                RayHit::Miss => return Ok(None),
                RayHit::Degenerate => {}
                RayHit::Hit { id, .. } => {
                    let [a, b, c] = self.polyhedra[id.polyhedron].face_points(id.face);
                    let (first, second) = self.subdomain_pairs[id.polyhedron];
                    let index = match orientation(&a, &b, &c, p) {
                        Orientation::NEGATIVE => first,
                        Orientation::POSITIVE => second,
                        Orientation::DEGENERATE => continue,
                    };
                    return Ok((!index.is_exterior()).then_some(index));
                }
            }
        }
        Err(DomainError::ClassificationRetriesExhausted {
            point: *p,
            retries: max_retries,
        })
    }

    fn surface_intersection(&self, hit: Option<(Point, FaceRef)>) -> Option<SurfaceIntersection> {
        let (point, face) = hit?;
        Some(SurfaceIntersection {
            point,
            patch: self.face_patch(face.polyhedron, face.face)?,
        })
    }
}

impl MeshDomain for PolyhedralComplexDomain {
    fn bbox(&self) -> Bbox3 {
        self.bbox
    }

    fn is_in_domain(&self, p: &Point) -> Result<Option<SubdomainIndex>, DomainError> {
        self.classify(p, self.max_retries)
    }

    fn is_in_domain_with_retries(
        &self,
        p: &Point,
        max_retries: usize,
    ) -> Result<Option<SubdomainIndex>, DomainError> {
        self.classify(p, max_retries)
    }

    fn intersect_segment(&self, a: &Point, b: &Point) -> Option<SurfaceIntersection> {
        self.surface_intersection(self.tree.first_segment_intersection(a, b))
    }

    fn intersect_ray(&self, origin: &Point, dir: &Vector3<f64>) -> Option<SurfaceIntersection> {
        self.surface_intersection(self.tree.first_ray_intersection(origin, dir))
    }

    fn construct_initial_points(&self, n: usize) -> Vec<SurfaceIntersection> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let center = self.bbox.center();
        let mut points = Vec::with_capacity(n);
        for _ in 0..n.saturating_mul(50) {
            if points.len() >= n {
                break;
            }
            let dir = random_unit_vector(&mut rng);
            if let Some(hit) = self.intersect_ray(&center, &dir) {
                points.push(hit);
            }
        }
        points
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn patch_of(slot: usize) -> PatchIndex {
    PatchIndex(slot as u32)
}

fn squared_distance_to_triangulation(tr: &Triangulation, p: &Point) -> f64 {
    tr.nearest_vertex(p)
        .and_then(|v| tr.point(v))
        .map_or(f64::INFINITY, |q| q.squared_distance(p))
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

// Smallest index represents the set.
fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

/// Feature edges merged by point position.
#[derive(Default)]
struct FeatureGraph {
    points: Vec<Point>,
    index: FastHashMap<Point, usize>,
    edges: Vec<(usize, usize, BTreeSet<PatchIndex>)>,
    edge_index: FastHashMap<(usize, usize), usize>,
    incident: Vec<SmallVec<[usize; 2]>>,
}

impl FeatureGraph {
    fn node(&mut self, p: Point) -> usize {
        if let Some(&i) = self.index.get(&p) {
            return i;
        }
        let i = self.points.len();
        self.points.push(p);
        self.incident.push(SmallVec::new());
        self.index.insert(p, i);
        i
    }

    fn add_edge(&mut self, a: Point, b: Point, patches: BTreeSet<PatchIndex>) {
        let (a, b) = (self.node(a), self.node(b));
        if a == b {
            return;
        }
        let key = (a.min(b), a.max(b));
        if let Some(&e) = self.edge_index.get(&key) {
            self.edges[e].2.extend(patches);
            return;
        }
        let e = self.edges.len();
        self.edges.push((a, b, patches));
        self.edge_index.insert(key, e);
        self.incident[a].push(e);
        self.incident[b].push(e);
    }

    fn is_terminal(&self, node: usize) -> bool {
        let [e, f] = self.incident[node].as_slice() else {
            return true;
        };
        let other = |e: usize| {
            let (a, b, _) = &self.edges[e];
            if *a == node { *b } else { *a }
        };
        let p = self.points[node];
        let u = self.points[other(*e)] - p;
        let v = self.points[other(*f)] - p;
        // Acute corner.
        u.dot(&v) > 0.0
    }

    fn into_polylines(self) -> Vec<FeaturePolyline> {
        let terminal: Vec<bool> = (0..self.points.len()).map(|n| self.is_terminal(n)).collect();
        let mut visited = vec![false; self.edges.len()];
        let mut polylines = Vec::new();

        let starts = (0..self.points.len())
            .filter(|&n| terminal[n])
            .flat_map(|n| self.incident[n].iter().map(move |&e| (n, e)))
            .collect::<Vec<_>>()
            .into_iter()
            .chain((0..self.edges.len()).map(|e| (self.edges[e].0, e)));

        for (start, first_edge) in starts {
            if visited[first_edge] {
                continue;
            }
            let mut points = vec![self.points[start]];
            let mut adjacent_patches = BTreeSet::new();
            let (mut node, mut edge) = (start, first_edge);
            loop {
                visited[edge] = true;
                let (a, b, patches) = &self.edges[edge];
                adjacent_patches.extend(patches.iter().copied());
                node = if *a == node { *b } else { *a };
                points.push(self.points[node]);
                if terminal[node] || node == start {
                    break;
                }
                match self.incident[node].iter().find(|&&e| !visited[e]) {
                    Some(&next) => edge = next,
                    None => break,
                }
            }
            if points.len() >= 2 {
                polylines.push(FeaturePolyline {
                    points,
                    adjacent_patches,
                });
            }
        }
        polylines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> Polyhedron {
        Polyhedron::axis_aligned_box(&Bbox3::new([0.0; 3], [1.0; 3]))
    }

    fn cube_domain() -> PolyhedralComplexDomain {
        PolyhedralComplexDomain::new(
            vec![unit_cube()],
            vec![(SubdomainIndex(1), SubdomainIndex::EXTERIOR)],
        )
        .unwrap()
    }

    #[test]
    fn test_box_normals_point_outward() {
        let cube = unit_cube();
        let center = Point::new([0.5; 3]);
        for f in 0..cube.faces.len() {
            let [a, ..] = cube.face_points(f);
            assert!(cube.face_normal(f).dot(&(a - center)) > 0.0);
        }
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(
            PolyhedralComplexDomain::new(vec![unit_cube()], vec![]).unwrap_err(),
            DomainError::MismatchedSubdomainPairs {
                polyhedra: 1,
                pairs: 0
            }
        );
        let broken = Polyhedron::new(vec![Point::ORIGIN], vec![[0, 1, 2]]);
        assert!(matches!(
            PolyhedralComplexDomain::new(vec![broken], vec![(SubdomainIndex(1), SubdomainIndex(0))]),
            Err(DomainError::InvalidFace { vertex: 1, .. })
        ));
        assert_eq!(
            PolyhedralComplexDomain::new(vec![], vec![]).unwrap_err(),
            DomainError::EmptyDomain
        );
    }

    #[test]
    fn test_cube_classification() {
        let domain = cube_domain();
        for p in [[0.5, 0.5, 0.5], [0.1, 0.9, 0.2], [0.99, 0.01, 0.5]] {
            assert_eq!(
                domain.is_in_domain(&Point::new(p)).unwrap(),
                Some(SubdomainIndex(1)),
                "{p:?}"
            );
        }
        for p in [[1.5, 0.5, 0.5], [-0.1, 0.5, 0.5], [5.0, 5.0, 5.0]] {
            assert_eq!(domain.is_in_domain(&Point::new(p)).unwrap(), None, "{p:?}");
        }
    }

    #[test]
    fn test_nested_polyhedra_classification() {
        let outer = unit_cube();
        let inner = Polyhedron::axis_aligned_box(&Bbox3::new([0.25; 3], [0.75; 3]));
        let domain = PolyhedralComplexDomain::new(
            vec![outer, inner],
            vec![
                (SubdomainIndex(1), SubdomainIndex::EXTERIOR),
                (SubdomainIndex(2), SubdomainIndex(1)),
            ],
        )
        .unwrap();
        assert_eq!(
            domain.is_in_domain(&Point::new([0.5; 3])).unwrap(),
            Some(SubdomainIndex(2))
        );
        assert_eq!(
            domain.is_in_domain(&Point::new([0.1; 3])).unwrap(),
            Some(SubdomainIndex(1))
        );
        assert_eq!(domain.boundary_patches(), &[PatchIndex(1)]);
        assert_eq!(domain.boundary_polyhedra(), &[0]);
        assert_eq!(domain.inside_polyhedra(), &[1]);
        assert_eq!(
            domain.incident_subdomains_indices(PatchIndex(2)).unwrap(),
            (SubdomainIndex(2), SubdomainIndex(1))
        );
        assert!(domain.incident_subdomains_indices(PatchIndex(0)).is_err());
    }

    #[test]
    fn test_zero_retries_is_an_error() {
        let domain = cube_domain();
        assert!(matches!(
            domain.is_in_domain_with_retries(&Point::new([0.5; 3]), 0),
            Err(DomainError::ClassificationRetriesExhausted { retries: 0, .. })
        ));
    }

    #[test]
    fn test_explicit_retry_cap_overrides_the_domain_cap() {
        let domain = cube_domain().with_max_retries(0);
        let center = Point::new([0.5; 3]);
        assert!(matches!(
            domain.is_in_domain(&center),
            Err(DomainError::ClassificationRetriesExhausted { retries: 0, .. })
        ));
        assert_eq!(
            domain.is_in_domain_with_retries(&center, 64).unwrap(),
            Some(SubdomainIndex(1))
        );

        let domain = cube_domain().with_max_retries(64);
        assert_eq!(domain.is_in_domain(&center).unwrap(), Some(SubdomainIndex(1)));
        assert!(domain.is_in_domain_with_retries(&center, 0).is_err());
    }

    #[test]
    fn test_cube_feature_detection() {
        let mut domain = cube_domain();
        domain.detect_features(60.0);
        assert_eq!(domain.number_of_patches(), 6);
        assert_eq!(domain.features().len(), 12);
        for feature in domain.features() {
            assert_eq!(feature.number_of_segments(), 1);
            assert_eq!(feature.adjacent_patches.len(), 2);
        }
        assert_eq!(domain.boundary_patches().len(), 6);
        assert!((1..=6).all(|i| domain.patch_has_feature_edges(PatchIndex(i))));

        // Runs once.
        domain.detect_features(10.0);
        assert_eq!(domain.number_of_patches(), 6);
    }

    #[test]
    fn test_closed_smooth_surface_has_no_border() {
        let mut domain = cube_domain();
        domain.detect_borders();
        assert_eq!(domain.number_of_patches(), 1);
        assert!(domain.features().is_empty());
        assert!(!domain.patch_has_feature_edges(PatchIndex(1)));
    }

    #[test]
    fn test_open_square_border_is_a_closed_polyline() {
        let square = Polyhedron::new(
            vec![
                Point::new([0.0, 0.0, 0.0]),
                Point::new([1.0, 0.0, 0.0]),
                Point::new([1.0, 1.0, 0.0]),
                Point::new([0.0, 1.0, 0.0]),
                Point::new([0.5, 0.5, 0.0]),
            ],
            vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]],
        );
        let mut domain =
            PolyhedralComplexDomain::new(vec![square], vec![(SubdomainIndex(1), SubdomainIndex(0))])
                .unwrap();
        domain.detect_borders();
        // Square corners are right angles, not acute, so the loop stays whole.
        assert_eq!(domain.features().len(), 1);
        assert!(domain.features()[0].is_closed());
        assert_eq!(domain.features()[0].number_of_segments(), 4);
        assert!(!domain.is_feature_vertex(0, 4));
        assert!(domain.is_feature_vertex(0, 0));
    }

    #[test]
    fn test_merge_duplicated_points_joins_patches() {
        let mut domain = cube_domain();
        domain.detect_features(60.0);
        let corner: FastHashSet<Point> = [Point::ORIGIN].into_iter().collect();
        domain.merge_duplicated_points(&corner);
        // The three sides meeting at the origin now share one patch.
        let patches: BTreeSet<PatchIndex> = (0..12)
            .filter(|&f| domain.polyhedra()[0].faces[f].contains(&0))
            .filter_map(|f| domain.face_patch(0, f))
            .collect();
        assert_eq!(patches.len(), 1);
        for feature in domain.features() {
            assert!(!feature.adjacent_patches.is_empty());
        }
    }

    #[test]
    fn test_segment_and_ray_intersections() {
        let domain = cube_domain();
        let hit = domain
            .intersect_segment(&Point::new([0.5; 3]), &Point::new([2.0, 0.5, 0.5]))
            .unwrap();
        approx::assert_relative_eq!(hit.point.x(), 1.0, epsilon = 1e-12);
        assert_eq!(hit.patch, PatchIndex(1));
        assert!(
            domain
                .intersect_segment(&Point::new([0.2; 3]), &Point::new([0.4; 3]))
                .is_none()
        );
        let ray = domain
            .intersect_ray(&Point::new([0.5, 0.3, 0.4]), &Vector3::new(0.0, 0.0, -1.0))
            .unwrap();
        approx::assert_relative_eq!(ray.point.z(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_initial_points_are_on_the_surface() {
        let domain = cube_domain().with_seed(7);
        let points = domain.construct_initial_points(16);
        assert_eq!(points.len(), 16);
        for sp in points {
            let on_side = sp
                .point
                .coords()
                .iter()
                .any(|c| c.abs() < 1e-9 || (c - 1.0).abs() < 1e-9);
            assert!(on_side, "{}", sp.point);
        }
    }

    #[test]
    fn test_add_vertices_on_patches_without_feature_edges() {
        let domain = cube_domain();
        let mut complex = MeshComplex::default();
        let added = domain
            .add_vertices_on_patches_without_feature_edges(&mut complex)
            .unwrap();
        // Single smooth patch: every cube corner is a candidate.
        assert_eq!(added, 8);
        assert_eq!(complex.triangulation().number_of_vertices(), 8);
        for (v, _) in complex.triangulation().finite_vertices() {
            assert_eq!(complex.vertex_info(v), Some(VertexInfo::surface(PatchIndex(1))));
        }

        // Already covered vertices are skipped.
        let again = domain
            .add_vertices_on_patches_without_feature_edges(&mut complex)
            .unwrap();
        assert_eq!(again, 0);

        let mut sharp = cube_domain();
        sharp.detect_features(60.0);
        let mut complex = MeshComplex::default();
        assert_eq!(
            sharp
                .add_vertices_on_patches_without_feature_edges(&mut complex)
                .unwrap(),
            0
        );
    }
}
