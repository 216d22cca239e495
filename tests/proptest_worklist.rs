//! Property-based tests for the bad-element worklists.
//!
//! Records leave a [`Worklist`] by non-decreasing quality, oldest first
//! among equals, and an element never has more than one live record.

use proptest::prelude::*;
use tetmesh::concurrency::worksharing::WorksharingGrid;
use tetmesh::mesh::refinement::level::LevelQueue;
use tetmesh::mesh::refinement::worklist::{BadElement, Worklist};
use tetmesh::prelude::*;

// =============================================================================
// STRATEGIES
// =============================================================================

/// Small element ids so that pushes collide often; small integer qualities
/// so that ties are common.
fn record_strategy() -> impl Strategy<Value = (u32, i32)> {
    (0u32..24, -4i32..4)
}

fn record(element: u32, quality: i32) -> BadElement<u32> {
    BadElement::new(element, Quality::new(f64::from(quality)), Point::ORIGIN)
}

// =============================================================================
// WORKLIST PROPERTIES
// =============================================================================

proptest! {
    /// Pops come out by quality, then by insertion order, and match the last
    /// record pushed for each element.
    #[test]
    fn prop_worklist_pops_lowest_quality_first(
        pushes in prop::collection::vec(record_strategy(), 0..64)
    ) {
        let mut list = Worklist::new();
        let mut last: Vec<(u32, i32, usize)> = Vec::new();
        for (sequence, &(element, quality)) in pushes.iter().enumerate() {
            list.insert(record(element, quality));
            last.retain(|&(e, _, _)| e != element);
            last.push((element, quality, sequence));
        }
        prop_assert_eq!(list.len(), last.len());

        last.sort_by_key(|&(_, quality, sequence)| (quality, sequence));
        for &(element, quality, _) in &last {
            let popped = list.pop_best().unwrap();
            prop_assert_eq!(popped.element, element);
            prop_assert_eq!(popped.quality, Quality::new(f64::from(quality)));
        }
        prop_assert!(list.pop_best().is_none());
        prop_assert!(list.is_empty());
    }

    /// Removed elements never surface again.
    #[test]
    fn prop_worklist_remove_hides_records(
        pushes in prop::collection::vec(record_strategy(), 1..64),
        removed in prop::collection::vec(0u32..24, 0..12),
    ) {
        let mut list = Worklist::new();
        for &(element, quality) in &pushes {
            list.insert(record(element, quality));
        }
        for element in &removed {
            list.remove(element);
            prop_assert!(!list.contains(element));
        }
        let mut previous = Quality::ENCROACHED;
        while let Some(best) = list.best_quality() {
            let popped = list.pop_best().unwrap();
            prop_assert_eq!(popped.quality, best);
            prop_assert!(!removed.contains(&popped.element));
            prop_assert!(popped.quality >= previous);
            previous = popped.quality;
        }
    }

    /// Encroached records precede every regular record.
    #[test]
    fn prop_encroached_records_come_first(
        pushes in prop::collection::vec(record_strategy(), 1..32),
        encroached in 100u32..110,
    ) {
        let mut list = Worklist::new();
        for &(element, quality) in &pushes {
            list.insert(record(element, quality));
        }
        list.insert(BadElement::encroached(encroached, Point::ORIGIN));
        let first = list.pop_best().unwrap();
        prop_assert_eq!(first.element, encroached);
        prop_assert!(first.encroached);
    }
}

// =============================================================================
// LEVEL QUEUE PROPERTIES
// =============================================================================

proptest! {
    /// A partitioned queue hands out every live record exactly once,
    /// whichever bin the caller prefers.
    #[test]
    fn prop_level_queue_drains_every_record(
        points in prop::collection::vec(prop::array::uniform3(-1.0f64..1.0), 1..48),
        preferred in 0usize..16,
    ) {
        let grid = WorksharingGrid::new(Bbox3::new([-1.0; 3], [1.0; 3]), 2);
        let queue = LevelQueue::new(Some(grid));
        for (i, p) in points.iter().enumerate() {
            let element = u32::try_from(i).unwrap();
            queue.push(BadElement::new(element, Quality::new(0.0), Point::new(*p)));
        }
        prop_assert_eq!(queue.len(), points.len());

        let mut seen = vec![false; points.len()];
        while let Some(popped) = queue.pop(preferred) {
            let i = popped.element as usize;
            prop_assert!(!seen[i]);
            seen[i] = true;
        }
        prop_assert!(seen.iter().all(|&s| s));
        prop_assert!(queue.is_empty());
    }
}
