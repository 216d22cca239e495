//! The mesh complex: a triangulation with a labeling overlay.
//!
//! Cells carry the subdomain containing their circumcenter, restricted
//! facets carry their patch and surface center, vertices carry their
//! dimension (`-1` far point, `2` surface, `3` volume) and an index.
//! An element is in the complex iff it carries a label.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::core::algorithms::incremental_insertion::{InsertionError, InsertionOutcome};
use crate::core::algorithms::locate::{ConflictError, ConflictZone};
use crate::core::collections::{
    CellKey, CellSecondaryMap, FastHashMap, VertexKey, VertexSecondaryMap,
};
use crate::core::facet::FacetKey;
use crate::core::triangulation::Triangulation;
use crate::geometry::point::Point;
use crate::geometry::util::random_point_on_sphere;
use crate::mesh::domain::{MeshDomain, PatchIndex, SubdomainIndex};
use crate::mesh::error::MeshError;

/// Label of a restricted facet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceFacet {
    /// Patch the facet approximates.
    pub patch: PatchIndex,
    /// Intersection of the facet dual with the surface.
    pub surface_center: Point,
}

/// Label of a vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInfo {
    /// `-1` for far points, `2` for surface points, `3` for volume points.
    pub dimension: i8,
    /// Patch index for surface points, subdomain index for volume points.
    pub index: u32,
}

impl VertexInfo {
    /// A far point.
    pub const FAR: Self = Self {
        dimension: -1,
        index: 0,
    };

    /// A point on `patch`.
    #[must_use]
    pub const fn surface(patch: PatchIndex) -> Self {
        Self {
            dimension: 2,
            index: patch.0,
        }
    }

    /// A point inside `subdomain`.
    #[must_use]
    pub const fn volume(subdomain: SubdomainIndex) -> Self {
        Self {
            dimension: 3,
            index: subdomain.0,
        }
    }

    /// Patch of a surface point.
    #[must_use]
    pub const fn surface_patch(&self) -> Option<PatchIndex> {
        if self.dimension == 2 {
            Some(PatchIndex(self.index))
        } else {
            None
        }
    }
}

/// Triangulation plus the cells and facets of the mesh.
#[derive(Clone, Debug, Default)]
pub struct MeshComplex {
    triangulation: Triangulation,
    cells: CellSecondaryMap<SubdomainIndex>,
    facets: FastHashMap<FacetKey, SurfaceFacet>,
    vertex_info: VertexSecondaryMap<VertexInfo>,
    far_vertices: Vec<VertexKey>,
}

impl MeshComplex {
    /// Wraps a triangulation with an empty labeling.
    #[must_use]
    pub fn new(triangulation: Triangulation) -> Self {
        Self {
            triangulation,
            ..Self::default()
        }
    }

    /// Seeds an empty triangulation with `n` boundary points of `domain`
    /// (the domain's default count when `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if a point cannot be inserted.
    pub fn with_initial_points<D: MeshDomain + ?Sized>(
        domain: &D,
        n: Option<usize>,
    ) -> Result<Self, MeshError> {
        let mut complex = Self::default();
        let count = n.unwrap_or_else(|| domain.default_initial_point_count());
        complex.insert_initial_points(domain, count)?;
        Ok(complex)
    }

    /// Inserts up to `count` boundary points of `domain` as surface
    /// vertices, skipping duplicates. Returns the number inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if a point cannot be inserted.
    pub fn insert_initial_points<D: MeshDomain + ?Sized>(
        &mut self,
        domain: &D,
        count: usize,
    ) -> Result<usize, MeshError> {
        let mut inserted = 0;
        for sp in domain.construct_initial_points(count) {
            match self.insert_point(sp.point, VertexInfo::surface(sp.patch)) {
                Ok(_) => inserted += 1,
                Err(InsertionError::ConflictRegion(ConflictError::DuplicateVertex { .. })) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(
            "Seeded complex with {inserted} initial points ({} vertices)",
            self.triangulation.number_of_vertices()
        );
        Ok(inserted)
    }

    /// The triangulation.
    #[must_use]
    pub const fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    /// Mutable access to the triangulation.
    ///
    /// Insertions made through it bypass the labeling; use
    /// [`MeshComplex::insert_point`] to keep labels consistent.
    pub const fn triangulation_mut(&mut self) -> &mut Triangulation {
        &mut self.triangulation
    }

    // -------------------------------------------------------------------------
    // Cells
    // -------------------------------------------------------------------------

    /// Puts `cell` in the complex.
    pub fn add_cell(&mut self, cell: CellKey, subdomain: SubdomainIndex) {
        self.cells.insert(cell, subdomain);
    }

    /// Takes `cell` out of the complex.
    pub fn remove_cell(&mut self, cell: CellKey) -> Option<SubdomainIndex> {
        self.cells.remove(cell)
    }

    /// Subdomain of `cell`, if it is in the complex.
    #[must_use]
    pub fn subdomain_index(&self, cell: CellKey) -> Option<SubdomainIndex> {
        self.cells.get(cell).copied()
    }

    /// Returns `true` if `cell` is in the complex.
    #[must_use]
    pub fn is_cell_in_complex(&self, cell: CellKey) -> bool {
        self.cells.contains_key(cell)
    }

    /// Number of cells in the complex.
    #[must_use]
    pub fn number_of_cells(&self) -> usize {
        self.cells.len()
    }

    /// Cells in the complex with their subdomains.
    pub fn cells_in_complex(&self) -> impl Iterator<Item = (CellKey, SubdomainIndex)> + '_ {
        self.cells.iter().map(|(k, s)| (k, *s))
    }

    // -------------------------------------------------------------------------
    // Facets
    // -------------------------------------------------------------------------

    /// Puts the facet `key` in the complex.
    pub fn add_facet(&mut self, key: FacetKey, facet: SurfaceFacet) {
        self.facets.insert(key, facet);
    }

    /// Takes the facet `key` out of the complex.
    pub fn remove_facet(&mut self, key: &FacetKey) -> Option<SurfaceFacet> {
        self.facets.remove(key)
    }

    /// Label of the facet `key`, if it is in the complex.
    #[must_use]
    pub fn surface_facet(&self, key: &FacetKey) -> Option<&SurfaceFacet> {
        self.facets.get(key)
    }

    /// Returns `true` if the facet `key` is in the complex.
    #[must_use]
    pub fn is_facet_in_complex(&self, key: &FacetKey) -> bool {
        self.facets.contains_key(key)
    }

    /// Number of facets in the complex.
    #[must_use]
    pub fn number_of_facets(&self) -> usize {
        self.facets.len()
    }

    /// Facets in the complex with their labels.
    pub fn facets_in_complex(&self) -> impl Iterator<Item = (&FacetKey, &SurfaceFacet)> {
        self.facets.iter()
    }

    /// Empties the cell and facet labeling; vertices keep theirs.
    pub fn clear_cells_and_facets(&mut self) {
        self.cells.clear();
        self.facets.clear();
    }

    // -------------------------------------------------------------------------
    // Vertices
    // -------------------------------------------------------------------------

    /// Label of `v`.
    #[must_use]
    pub fn vertex_info(&self, v: VertexKey) -> Option<VertexInfo> {
        self.vertex_info.get(v).copied()
    }

    /// Sets the label of `v`.
    pub fn set_vertex_info(&mut self, v: VertexKey, info: VertexInfo) {
        self.vertex_info.insert(v, info);
    }

    /// Far vertices.
    #[must_use]
    pub fn far_vertices(&self) -> &[VertexKey] {
        &self.far_vertices
    }

    /// Number of far vertices.
    #[must_use]
    pub fn number_of_far_points(&self) -> usize {
        self.far_vertices.len()
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Inserts `p` with label `info`, taking destroyed cells and facets out
    /// of the complex.
    ///
    /// # Errors
    ///
    /// Returns the triangulation's error; the complex is then unchanged.
    pub fn insert_point(
        &mut self,
        p: Point,
        info: VertexInfo,
    ) -> Result<InsertionOutcome, InsertionError> {
        if self.triangulation.number_of_cells() == 0 {
            let outcome = self.triangulation.insert(p)?;
            self.vertex_info.insert(outcome.vertex, info);
            return Ok(outcome);
        }
        let zone = self.triangulation.find_conflicts(&p, None)?;
        self.insert_in_conflict_zone(p, &zone, info)
    }

    /// Inserts `p` into the precomputed conflict zone `zone`.
    ///
    /// # Errors
    ///
    /// Returns the triangulation's error; the complex is then unchanged.
    pub fn insert_in_conflict_zone(
        &mut self,
        p: Point,
        zone: &ConflictZone,
        info: VertexInfo,
    ) -> Result<InsertionOutcome, InsertionError> {
        let destroyed: Vec<FacetKey> = zone
            .cells
            .iter()
            .filter_map(|&c| self.triangulation.cell(c))
            .flat_map(|cell| (0..4u8).map(|i| FacetKey::new(cell.facet_vertices(i))))
            .collect();
        let outcome = self.triangulation.insert_in_conflict_zone(p, zone)?;
        for &c in &outcome.removed_cells {
            self.cells.remove(c);
        }
        for key in &destroyed {
            self.facets.remove(key);
        }
        self.vertex_info.insert(outcome.vertex, info);
        Ok(outcome)
    }

    /// Adds a far point at `p`.
    ///
    /// # Errors
    ///
    /// Returns the triangulation's error.
    pub fn add_far_point(&mut self, p: Point) -> Result<VertexKey, InsertionError> {
        let outcome = self.insert_point(p, VertexInfo::FAR)?;
        self.far_vertices.push(outcome.vertex);
        Ok(outcome.vertex)
    }

    /// Adds `count` far points on the sphere centered on the domain's box
    /// with radius five times its diagonal.
    ///
    /// # Errors
    ///
    /// Returns an error if a far point cannot be inserted.
    pub fn add_far_points_around<D: MeshDomain + ?Sized>(
        &mut self,
        domain: &D,
        count: usize,
        seed: u64,
    ) -> Result<(), MeshError> {
        let bbox = domain.bbox();
        let radius = 5.0 * bbox.diagonal();
        let center = bbox.center();
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..count {
            let p = random_point_on_sphere(&mut rng, &center, radius);
            match self.add_far_point(p) {
                Ok(_) => {}
                Err(InsertionError::ConflictRegion(ConflictError::DuplicateVertex { .. })) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!("Added {count} far points (radius = {radius})");
        Ok(())
    }
}
