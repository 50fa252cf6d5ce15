//! Per-track chunk queue.
//!
//! The queue is always sorted by [`ChunkKey`]; insertion places a chunk at its
//! ordered position instead of appending and re-sorting.

use std::collections::VecDeque;

use crate::chunk::{ChunkKey, SegmentChunk};

/// Ordered queue of fetched chunks awaiting the decode sink.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<SegmentChunk>,
}

impl ChunkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk at its ordered position.
    ///
    /// Returns the new queue length, or `None` when an identical fetch is
    /// already queued.
    pub fn enqueue(&mut self, chunk: SegmentChunk) -> Option<usize> {
        if self.chunks.iter().any(|c| c.is_duplicate_of(&chunk)) {
            return None;
        }
        let key = chunk.key();
        let position = self.chunks.partition_point(|c| c.key() <= key);
        self.chunks.insert(position, chunk);
        Some(self.chunks.len())
    }

    /// First chunk in order.
    pub fn front(&self) -> Option<&SegmentChunk> {
        self.chunks.front()
    }

    /// Remove and return the first chunk.
    pub fn pop_front(&mut self) -> Option<SegmentChunk> {
        self.chunks.pop_front()
    }

    /// Chunk at `index`.
    pub fn get(&self, index: usize) -> Option<&SegmentChunk> {
        self.chunks.get(index)
    }

    /// Mutable chunk at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut SegmentChunk> {
        self.chunks.get_mut(index)
    }

    /// Find a chunk by key.
    pub fn find_mut(&mut self, key: &ChunkKey) -> Option<&mut SegmentChunk> {
        self.chunks.iter_mut().find(|c| c.key() == *key)
    }

    /// Index of the first chunk fetched for `request_time`.
    pub fn position_of_request(&self, request_time: f64, epsilon: f64) -> Option<usize> {
        self.chunks
            .iter()
            .position(|c| (c.request_start_time - request_time).abs() <= epsilon)
    }

    /// Drop leading chunks matching `stale`, returning how many were dropped.
    pub fn drop_leading_while<F>(&mut self, mut stale: F) -> usize
    where
        F: FnMut(&SegmentChunk) -> bool,
    {
        let mut dropped = 0;
        while let Some(front) = self.chunks.front() {
            if front.appending || !stale(front) {
                break;
            }
            self.chunks.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Drop leading chunks that are fully handed to the sink.
    pub fn pop_drained(&mut self) -> usize {
        let mut popped = 0;
        while self.chunks.front().is_some_and(|c| c.is_drained()) {
            self.chunks.pop_front();
            popped += 1;
        }
        popped
    }

    /// Iterate in order.
    pub fn iter(&self) -> impl Iterator<Item = &SegmentChunk> {
        self.chunks.iter()
    }

    /// Iterate mutably in order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SegmentChunk> {
        self.chunks.iter_mut()
    }

    /// Remove every chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether the queue satisfies its ordering invariant.
    pub fn is_sorted(&self) -> bool {
        self.chunks
            .iter()
            .zip(self.chunks.iter().skip(1))
            .all(|(a, b)| a.key() <= b.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(period: f64, request: f64) -> SegmentChunk {
        SegmentChunk::new(period, request, 2.0, vec![0u8; 4]).with_quality(0, 1)
    }

    #[test]
    fn test_enqueue_sorts() {
        let mut queue = ChunkQueue::new();
        assert_eq!(queue.enqueue(chunk(0.0, 10.0)), Some(1));
        assert_eq!(queue.enqueue(chunk(0.0, 8.0)), Some(2));
        assert_eq!(queue.enqueue(chunk(30.0, 30.0)), Some(3));
        assert_eq!(queue.enqueue(chunk(0.0, 12.0)), Some(4));

        let order: Vec<f64> = queue.iter().map(|c| c.request_start_time).collect();
        assert_eq!(order, vec![8.0, 10.0, 12.0, 30.0]);
        assert!(queue.is_sorted());
    }

    #[test]
    fn test_enqueue_rejects_duplicates() {
        let mut queue = ChunkQueue::new();
        assert!(queue.enqueue(chunk(0.0, 8.0)).is_some());
        assert!(queue.enqueue(chunk(0.0, 8.0)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_divisions_ordered_within_fetch() {
        let mut queue = ChunkQueue::new();
        queue.enqueue(chunk(0.0, 8.0).with_division(2));
        queue.enqueue(chunk(0.0, 8.0).with_division(0));
        queue.enqueue(chunk(0.0, 8.0).with_division(1));
        let order: Vec<u32> = queue.iter().map(|c| c.division_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_drop_leading_while_stops_at_appending() {
        let mut queue = ChunkQueue::new();
        let mut partial = chunk(0.0, 2.0);
        partial.mark_consumed(0);
        queue.enqueue(partial);
        queue.enqueue(chunk(0.0, 4.0));
        assert_eq!(queue.drop_leading_while(|_| true), 0);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_position_of_request() {
        let mut queue = ChunkQueue::new();
        queue.enqueue(chunk(0.0, 8.0));
        queue.enqueue(chunk(0.0, 10.0));
        assert_eq!(queue.position_of_request(10.0, 1e-3), Some(1));
        assert_eq!(queue.position_of_request(9.0, 1e-3), None);
    }

    #[test]
    fn test_pop_drained() {
        let mut queue = ChunkQueue::new();
        queue.enqueue(chunk(0.0, 8.0));
        queue.enqueue(chunk(0.0, 10.0));
        if let Some(front) = queue.get_mut(0) {
            front.mark_consumed(1);
        }
        assert_eq!(queue.pop_drained(), 1);
        assert_eq!(queue.front().map(|c| c.request_start_time), Some(10.0));
    }
}
