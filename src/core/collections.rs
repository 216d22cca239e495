//! High-performance collection types used throughout the crate.
//!
//! Slotmap keys identify vertices and cells; `rustc_hash` maps and
//! `smallvec` buffers hold the short-lived per-insertion data.

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use smallvec::SmallVec;

// =============================================================================
// KEY TYPES
// =============================================================================

new_key_type! {
    /// Key type for accessing vertices in the triangulation storage.
    ///
    /// Keys are versioned: a key of a removed vertex never aliases a later one.
    pub struct VertexKey;
}

new_key_type! {
    /// Key type for accessing cells in the triangulation storage.
    ///
    /// Keys are versioned, so a queued key of a cell destroyed by an
    /// insertion is detected as stale instead of aliasing a new cell.
    pub struct CellKey;
}

/// Index of a facet within its cell (`0..4`), equal to the index of the
/// opposite vertex.
pub type FacetIndex = u8;

// =============================================================================
// STORAGE AND MAPS
// =============================================================================

/// Primary storage for vertices and cells.
pub type StorageMap<K, V> = SlotMap<K, V>;

/// Optimized `HashMap` for internal, non-adversarial keys.
///
/// # Examples
///
/// ```rust
/// use tetmesh::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u64, usize> = FastHashMap::default();
/// map.insert(123, 456);
/// assert_eq!(map.get(&123), Some(&456));
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// Optimized `HashSet` for internal, non-adversarial keys.
pub type FastHashSet<T> = FxHashSet<T>;

/// Stack-allocated buffer spilling to the heap past `N` elements.
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

/// Dense per-cell side table.
pub type CellSecondaryMap<V> = SecondaryMap<CellKey, V>;

/// Dense per-vertex side table.
pub type VertexSecondaryMap<V> = SecondaryMap<VertexKey, V>;

/// Inline capacity covering typical conflict zones in 3D.
pub const CONFLICT_ZONE_BUFFER_SIZE: usize = 32;

/// Buffer of cell keys sized for a typical insertion.
pub type CellKeyBuffer = SmallBuffer<CellKey, CONFLICT_ZONE_BUFFER_SIZE>;

/// Creates a [`FastHashMap`] with the given capacity.
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}

/// Creates a [`FastHashSet`] with the given capacity.
#[must_use]
pub fn fast_hash_set_with_capacity<T>(capacity: usize) -> FastHashSet<T> {
    FastHashSet::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}
