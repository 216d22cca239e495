//! Queue of one refinement level.
//!
//! Sequential runs use a single worklist. Parallel runs split the queue in
//! one worklist per worksharing bin, chosen from each record's position, so
//! workers starting from different bins tend to work far from each other.

use std::hash::Hash;

use parking_lot::Mutex;

use crate::concurrency::worksharing::WorksharingGrid;
use crate::core::collections::FastHashMap;
use crate::mesh::refinement::worklist::{BadElement, Worklist};

#[derive(Debug)]
struct Bins<E> {
    worklists: Vec<Worklist<E>>,
    bin_of: FastHashMap<E, usize>,
}

impl<E: Copy + Eq + Hash> Bins<E> {
    fn new(count: usize) -> Self {
        Self {
            worklists: (0..count.max(1)).map(|_| Worklist::new()).collect(),
            bin_of: FastHashMap::default(),
        }
    }

    fn remove(&mut self, element: &E) -> Option<BadElement<E>> {
        let bin = self.bin_of.remove(element)?;
        self.worklists[bin].remove(element)
    }
}

/// Thread-safe, optionally partitioned queue of bad elements.
#[derive(Debug)]
pub struct LevelQueue<E> {
    bins: Mutex<Bins<E>>,
    grid: Option<WorksharingGrid>,
}

impl<E: Copy + Eq + Hash> Default for LevelQueue<E> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<E: Copy + Eq + Hash> LevelQueue<E> {
    /// A queue with one worklist per bin of `grid`, or a single worklist.
    #[must_use]
    pub fn new(grid: Option<WorksharingGrid>) -> Self {
        let count = grid.as_ref().map_or(1, WorksharingGrid::num_bins);
        Self {
            bins: Mutex::new(Bins::new(count)),
            grid,
        }
    }

    /// Replaces the partition. Queued records are dropped.
    pub fn set_partition(&mut self, grid: Option<WorksharingGrid>) {
        *self = Self::new(grid);
    }

    /// Number of worklists.
    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.bins.lock().worklists.len()
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.lock().bin_of.len()
    }

    /// Returns `true` if no record is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.lock().bin_of.is_empty()
    }

    /// Returns `true` if `element` is queued.
    #[must_use]
    pub fn contains(&self, element: &E) -> bool {
        self.bins.lock().bin_of.contains_key(element)
    }

    /// Queues `record`, replacing any record of the same element.
    pub fn push(&self, record: BadElement<E>) {
        let bin = self.grid.as_ref().map_or(0, |g| g.bin_of(&record.position));
        let mut bins = self.bins.lock();
        bins.remove(&record.element);
        bins.bin_of.insert(record.element, bin);
        bins.worklists[bin].insert(record);
    }

    /// Drops the record of `element`.
    pub fn remove(&self, element: &E) -> Option<BadElement<E>> {
        self.bins.lock().remove(element)
    }

    /// Pops the best record of bin `preferred`, or of the next non-empty
    /// bin after it.
    pub fn pop(&self, preferred: usize) -> Option<BadElement<E>> {
        let mut bins = self.bins.lock();
        let count = bins.worklists.len();
        for offset in 0..count {
            let bin = (preferred + offset) % count;
            if let Some(record) = bins.worklists[bin].pop_best() {
                bins.bin_of.remove(&record.element);
                return Some(record);
            }
        }
        None
    }

    /// Pops the best record over all bins.
    pub fn pop_best(&self) -> Option<BadElement<E>> {
        let mut bins = self.bins.lock();
        let bin = (0..bins.worklists.len())
            .filter_map(|b| Some((bins.worklists[b].best_quality()?, b)))
            .min()?
            .1;
        let record = bins.worklists[bin].pop_best()?;
        bins.bin_of.remove(&record.element);
        Some(record)
    }

    /// Drops every record.
    pub fn clear(&self) {
        let mut bins = self.bins.lock();
        for worklist in &mut bins.worklists {
            worklist.clear();
        }
        bins.bin_of.clear();
    }

    /// Copies of the queued records.
    #[must_use]
    pub fn records(&self) -> Vec<BadElement<E>> {
        self.bins
            .lock()
            .worklists
            .iter()
            .flat_map(Worklist::iter)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::{Bbox3, Point};
    use crate::mesh::criteria::Quality;

    fn record(element: u32, quality: f64, x: f64) -> BadElement<u32> {
        BadElement::new(element, Quality::new(quality), Point::new([x, 0.5, 0.5]))
    }

    #[test]
    fn test_single_bin_behaves_like_a_worklist() {
        let queue = LevelQueue::default();
        assert_eq!(queue.num_bins(), 1);
        queue.push(record(1, 0.4, 0.0));
        queue.push(record(2, 0.2, 0.0));
        queue.push(record(1, 0.1, 0.0));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(0).map(|r| r.element), Some(1));
        assert_eq!(queue.pop(3).map(|r| r.element), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partitioned_queue() {
        let grid = WorksharingGrid::new(Bbox3::new([0.0; 3], [1.0; 3]), 2);
        let queue = LevelQueue::new(Some(grid));
        assert_eq!(queue.num_bins(), 8);
        queue.push(record(1, 0.9, 0.1));
        queue.push(record(2, 0.5, 0.9));
        queue.push(record(3, 0.1, 0.9));

        // Moving an element to another bin keeps one record.
        queue.push(record(1, 0.3, 0.8));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.records().len(), 3);

        assert_eq!(queue.pop_best().map(|r| r.element), Some(3));
        assert!(queue.remove(&1).is_some());
        assert!(!queue.contains(&1));
        assert_eq!(queue.pop(0).map(|r| r.element), Some(2));
        assert_eq!(queue.pop(0), None);
    }
}
