//! Per-entity ring of timestamped positions
//!
//! Fed from snapshots (non-host) or position relays (host) and sampled by the
//! interpolator once per render frame. Pure data structure, no I/O.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::game::constants::sync::POSITION_BUFFER_CAPACITY;
use crate::game::interpolation::interpolate;
use crate::game::state::{EntityId, Timestamp};
use crate::util::vec2::Vec2;

/// (x, y, timestamp) triple
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub position: Vec2,
    pub timestamp: Timestamp,
}

impl PositionSample {
    pub fn new(position: Vec2, timestamp: Timestamp) -> Self {
        Self { position, timestamp }
    }
}

/// Timestamp-sorted, capped sample history
///
/// Inline storage covers the default capacity so steady-state pushes never allocate.
#[derive(Debug, Clone)]
pub struct PositionBuffer {
    samples: SmallVec<[PositionSample; POSITION_BUFFER_CAPACITY]>,
    capacity: usize,
}

impl PositionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: SmallVec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a sample keeping timestamp order.
    ///
    /// A sample with a timestamp already present replaces the stored one, so
    /// re-applying the same snapshot does not grow the buffer. On overflow the
    /// oldest sample is evicted.
    pub fn push(&mut self, sample: PositionSample) {
        match self
            .samples
            .binary_search_by_key(&sample.timestamp, |s| s.timestamp)
        {
            Ok(idx) => self.samples[idx] = sample,
            Err(idx) => {
                self.samples.insert(idx, sample);
                if self.samples.len() > self.capacity {
                    self.samples.remove(0);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<&PositionSample> {
        self.samples.first()
    }

    pub fn newest(&self) -> Option<&PositionSample> {
        self.samples.last()
    }

    /// Samples in ascending timestamp order
    pub fn samples(&self) -> &[PositionSample] {
        &self.samples
    }
}

impl Default for PositionBuffer {
    fn default() -> Self {
        Self::new(POSITION_BUFFER_CAPACITY)
    }
}

/// One buffer per remotely-driven entity
#[derive(Debug, Clone, Default)]
pub struct PositionBuffers {
    buffers: HashMap<EntityId, PositionBuffer>,
    capacity: usize,
}

impl PositionBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            capacity,
        }
    }

    pub fn push(&mut self, entity: EntityId, sample: PositionSample) {
        let capacity = self.capacity;
        self.buffers
            .entry(entity)
            .or_insert_with(|| PositionBuffer::new(capacity))
            .push(sample);
    }

    pub fn get(&self, entity: EntityId) -> Option<&PositionBuffer> {
        self.buffers.get(&entity)
    }

    /// Drop history for one entity (control changed hands)
    pub fn clear(&mut self, entity: EntityId) {
        if let Some(buffer) = self.buffers.get_mut(&entity) {
            buffer.clear();
        }
    }

    pub fn remove(&mut self, entity: EntityId) {
        self.buffers.remove(&entity);
    }

    pub fn clear_all(&mut self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Interpolated position of `entity` at `render_time`
    pub fn sample(&self, entity: EntityId, render_time: Timestamp) -> Option<Vec2> {
        self.buffers
            .get(&entity)
            .and_then(|buffer| interpolate(buffer, render_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f32, ts: Timestamp) -> PositionSample {
        PositionSample::new(Vec2::new(x, 0.0), ts)
    }

    #[test]
    fn test_push_keeps_order() {
        let mut buffer = PositionBuffer::new(10);
        buffer.push(sample(1.0, 100));
        buffer.push(sample(3.0, 300));
        buffer.push(sample(2.0, 200));

        let stamps: Vec<Timestamp> = buffer.samples().iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let capacity = 10;
        let mut buffer = PositionBuffer::new(capacity);
        for i in 0..=capacity as u64 {
            buffer.push(sample(i as f32, i * 50));
        }

        assert_eq!(buffer.len(), capacity);
        assert_eq!(buffer.oldest().unwrap().timestamp, 50);
        assert_eq!(buffer.newest().unwrap().timestamp, capacity as u64 * 50);
    }

    #[test]
    fn test_bound_holds_for_any_capacity() {
        for capacity in 1..16usize {
            let mut buffer = PositionBuffer::new(capacity);
            for i in 0..=capacity as u64 {
                buffer.push(sample(0.0, 1000 + i));
            }
            assert_eq!(buffer.len(), capacity);
            assert_eq!(buffer.oldest().unwrap().timestamp, 1001);
        }
    }

    #[test]
    fn test_duplicate_timestamp_replaces() {
        let mut buffer = PositionBuffer::new(10);
        buffer.push(sample(1.0, 100));
        buffer.push(sample(1.0, 100));
        assert_eq!(buffer.len(), 1);

        buffer.push(sample(5.0, 100));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.newest().unwrap().position.x, 5.0);
    }

    #[test]
    fn test_late_arrival_older_than_full_buffer_is_dropped() {
        let mut buffer = PositionBuffer::new(3);
        buffer.push(sample(1.0, 100));
        buffer.push(sample(2.0, 200));
        buffer.push(sample(3.0, 300));
        buffer.push(sample(0.0, 50));

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.oldest().unwrap().timestamp, 100);
    }

    #[test]
    fn test_clear() {
        let mut buffer = PositionBuffer::default();
        buffer.push(sample(1.0, 1));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), POSITION_BUFFER_CAPACITY);
    }

    #[test]
    fn test_buffer_set_per_entity() {
        let mut buffers = PositionBuffers::new(4);
        buffers.push(1, sample(0.0, 100));
        buffers.push(1, sample(10.0, 200));
        buffers.push(2, sample(50.0, 100));

        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers.sample(1, 150).unwrap().x, 5.0);
        assert_eq!(buffers.get(1).unwrap().capacity(), 4);

        buffers.clear(1);
        assert!(buffers.sample(1, 150).is_none());
        assert_eq!(buffers.sample(2, 150).unwrap().x, 50.0);
    }
}
