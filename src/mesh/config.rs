//! Mesher configuration.
//!
//! [`MesherConfig`] is plain data: it can be built with
//! [`MesherConfigBuilder`], deserialized from JSON, or taken from
//! [`Default`]. It is fixed for the lifetime of a [`Mesher`](crate::mesh::mesher::Mesher).
//!
//! # Examples
//!
//! ```rust
//! use tetmesh::mesh::config::{ConcurrencyMode, MesherConfig, MesherConfigBuilder};
//!
//! let config = MesherConfigBuilder::default()
//!     .concurrency(ConcurrencyMode::Parallel)
//!     .max_vertices(10_000_usize)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.locking_grid_cells_per_axis, 50);
//!
//! let json = r#"{ "max_vertices": 500, "seed": 7 }"#;
//! let parsed = MesherConfig::from_json_str(json).unwrap();
//! assert_eq!(parsed.max_vertices, 500);
//! assert_eq!(parsed.concurrency, ConcurrencyMode::Sequential);
//! ```

use serde::{Deserialize, Serialize};

/// Execution mode, fixed at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcurrencyMode {
    /// Everything runs on the calling thread.
    #[default]
    Sequential,
    /// Steps run on a `rayon` pool under the lock grid.
    Parallel,
}

/// Topological requirement on the restricted surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshTopology {
    /// No requirement beyond the facet criteria.
    #[default]
    NonManifold,
    /// Edges have one or two restricted facets; vertices have a disk or
    /// half-disk umbrella.
    ManifoldWithBoundary,
    /// Edges have exactly two restricted facets; vertices have a disk umbrella.
    Manifold,
}

/// When to seed the triangulation with far points on a bounding sphere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FarPointPolicy {
    /// Only in parallel mode.
    #[default]
    Auto,
    /// In both modes.
    Always,
    /// Never.
    Never,
}

/// Error building or parsing a [`MesherConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field has an unusable value.
    #[error("Invalid mesher configuration: {message}")]
    Invalid {
        /// What is wrong
        message: String,
    },
    /// The JSON document could not be parsed.
    #[error("Failed to parse mesher configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters of a refinement run.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct MesherConfig {
    /// Sequential or parallel execution.
    pub concurrency: ConcurrencyMode,
    /// Vertex budget; `0` means unlimited.
    pub max_vertices: usize,
    /// Topological requirement on the restricted surface.
    pub mesh_topology: MeshTopology,
    /// Lock grid resolution.
    pub locking_grid_cells_per_axis: usize,
    /// Worksharing bin grid resolution.
    pub worksharing_cells_per_axis: usize,
    /// Far points per worker in parallel mode.
    pub pseudo_infinite_vertices_per_core: f64,
    /// Far points in sequential mode.
    pub sequential_far_points: usize,
    /// Far point policy.
    pub add_far_points: FarPointPolicy,
    /// Worker threads; `0` uses the `rayon` default.
    pub num_workers: usize,
    /// Ray directions tried before point classification gives up.
    ///
    /// Passed to [`MeshDomain::is_in_domain_with_retries`] on every
    /// classification made during refinement; a cap stored in the domain
    /// only applies to direct [`MeshDomain::is_in_domain`] calls.
    ///
    /// [`MeshDomain::is_in_domain_with_retries`]: crate::mesh::domain::MeshDomain::is_in_domain_with_retries
    /// [`MeshDomain::is_in_domain`]: crate::mesh::domain::MeshDomain::is_in_domain
    pub classification_max_retries: usize,
    /// Seed of every random choice made by the mesher.
    pub seed: u64,
}

impl Default for MesherConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyMode::Sequential,
            max_vertices: 0,
            mesh_topology: MeshTopology::NonManifold,
            locking_grid_cells_per_axis: 50,
            worksharing_cells_per_axis: 8,
            pseudo_infinite_vertices_per_core: 5.0,
            sequential_far_points: 24,
            add_far_points: FarPointPolicy::Auto,
            num_workers: 0,
            classification_max_retries: 64,
            seed: 0,
        }
    }
}

impl MesherConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.locking_grid_cells_per_axis == Some(0) {
            return Err("locking_grid_cells_per_axis must be positive".to_string());
        }
        if self.worksharing_cells_per_axis == Some(0) {
            return Err("worksharing_cells_per_axis must be positive".to_string());
        }
        if self.classification_max_retries == Some(0) {
            return Err("classification_max_retries must be positive".to_string());
        }
        if let Some(per_core) = self.pseudo_infinite_vertices_per_core
            && !(per_core.is_finite() && per_core >= 0.0)
        {
            return Err(format!(
                "pseudo_infinite_vertices_per_core must be finite and non-negative, got {per_core}"
            ));
        }
        Ok(())
    }
}

impl MesherConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed input and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the value ranges enforced by the builder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        MesherConfigBuilder::default()
            .locking_grid_cells_per_axis(self.locking_grid_cells_per_axis)
            .worksharing_cells_per_axis(self.worksharing_cells_per_axis)
            .classification_max_retries(self.classification_max_retries)
            .pseudo_infinite_vertices_per_core(self.pseudo_infinite_vertices_per_core)
            .validate()
            .map_err(|message| ConfigError::Invalid { message })
    }

    /// Returns `true` in parallel mode.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.concurrency == ConcurrencyMode::Parallel
    }

    /// Returns `true` if far points are added for this mode.
    #[must_use]
    pub fn wants_far_points(&self) -> bool {
        match self.add_far_points {
            FarPointPolicy::Auto => self.is_parallel(),
            FarPointPolicy::Always => true,
            FarPointPolicy::Never => false,
        }
    }

    /// Number of far points to add for `workers` worker threads.
    #[must_use]
    pub fn far_point_count(&self, workers: usize) -> usize {
        if self.is_parallel() {
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let count = (workers as f64 * self.pseudo_infinite_vertices_per_core).ceil() as usize;
            count
        } else {
            self.sequential_far_points
        }
    }
}
