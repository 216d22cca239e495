//! Priority worklist of bad elements.
//!
//! A binary heap ordered by quality, lowest first, with FIFO order among
//! equal qualities. Each element has at most one live record: pushing an
//! element again replaces its record and removing it is O(1). Replaced and
//! removed records stay in the heap and are skipped when they surface.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::hash::Hash;

use crate::core::collections::FastHashMap;
use crate::geometry::point::Point;
use crate::mesh::criteria::Quality;

/// A queued bad element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BadElement<E> {
    /// The element.
    pub element: E,
    /// Its priority; lower is refined first.
    pub quality: Quality,
    /// Representative position, used to pick a worksharing bin.
    pub position: Point,
    /// Queued because a point of a higher level encroaches it.
    pub encroached: bool,
}

impl<E> BadElement<E> {
    /// A record for an element found bad by the criteria.
    #[must_use]
    pub const fn new(element: E, quality: Quality, position: Point) -> Self {
        Self {
            element,
            quality,
            position,
            encroached: false,
        }
    }

    /// A record for an element encroached by a higher level's point.
    #[must_use]
    pub const fn encroached(element: E, position: Point) -> Self {
        Self {
            element,
            quality: Quality::ENCROACHED,
            position,
            encroached: true,
        }
    }
}

#[derive(Debug)]
struct HeapEntry<E> {
    quality: Quality,
    sequence: u64,
    element: E,
}

impl<E> PartialEq for HeapEntry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for HeapEntry<E> {}

impl<E> PartialOrd for HeapEntry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for HeapEntry<E> {
    // Reversed: the max-heap yields the lowest quality, then the oldest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .quality
            .cmp(&self.quality)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of [`BadElement`]s with lazy invalidation.
#[derive(Debug)]
pub struct Worklist<E> {
    heap: BinaryHeap<HeapEntry<E>>,
    live: FastHashMap<E, (u64, BadElement<E>)>,
    next_sequence: u64,
}

impl<E> Default for Worklist<E> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: FastHashMap::default(),
            next_sequence: 0,
        }
    }
}

impl<E: Copy + Eq + Hash> Worklist<E> {
    /// Creates an empty worklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` if no live record is left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns `true` if `element` has a live record.
    #[must_use]
    pub fn contains(&self, element: &E) -> bool {
        self.live.contains_key(element)
    }

    /// The live record of `element`.
    #[must_use]
    pub fn get(&self, element: &E) -> Option<&BadElement<E>> {
        self.live.get(element).map(|(_, record)| record)
    }

    /// Queues `record`, returning the record it replaces.
    pub fn insert(&mut self, record: BadElement<E>) -> Option<BadElement<E>> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(HeapEntry {
            quality: record.quality,
            sequence,
            element: record.element,
        });
        let previous = self
            .live
            .insert(record.element, (sequence, record))
            .map(|(_, r)| r);
        self.compact_if_needed();
        previous
    }

    /// Removes the record of `element`.
    pub fn remove(&mut self, element: &E) -> Option<BadElement<E>> {
        self.live.remove(element).map(|(_, record)| record)
    }

    /// Removes and returns the record with the lowest quality.
    pub fn pop_best(&mut self) -> Option<BadElement<E>> {
        while let Some(entry) = self.heap.pop() {
            match self.live.get(&entry.element) {
                Some(&(sequence, _)) if sequence == entry.sequence => {
                    return self.live.remove(&entry.element).map(|(_, record)| record);
                }
                _ => {}
            }
        }
        None
    }

    /// Quality of the record [`Self::pop_best`] would return.
    pub fn best_quality(&mut self) -> Option<Quality> {
        while let Some(entry) = self.heap.peek() {
            match self.live.get(&entry.element) {
                Some(&(sequence, _)) if sequence == entry.sequence => return Some(entry.quality),
                _ => {
                    self.heap.pop();
                }
            }
        }
        None
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    /// Live records in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &BadElement<E>> {
        self.live.values().map(|(_, record)| record)
    }

    fn compact_if_needed(&mut self) {
        if self.heap.len() <= 2 * self.live.len() + 64 {
            return;
        }
        let live = &self.live;
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        entries.retain(|e| matches!(live.get(&e.element), Some(&(s, _)) if s == e.sequence));
        self.heap = BinaryHeap::from(entries);
    }
}
