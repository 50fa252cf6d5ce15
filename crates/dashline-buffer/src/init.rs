//! Initialization segments.
//!
//! Each `(period, adaptation set, quality)` identity has its own init segment.
//! The engine prepends it whenever the identity of the next appended chunk
//! differs from the last one appended.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Identity of an init segment.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct InitSegmentKey {
    pub period_start: f64,
    pub adaptation_set_index: usize,
    pub quality: usize,
}

impl InitSegmentKey {
    /// Create a new key.
    pub fn new(period_start: f64, adaptation_set_index: usize, quality: usize) -> Self {
        Self {
            period_start,
            adaptation_set_index,
            quality,
        }
    }
}

// Period starts are compared bitwise so the key can live in a hash map.
impl PartialEq for InitSegmentKey {
    fn eq(&self, other: &Self) -> bool {
        self.period_start.to_bits() == other.period_start.to_bits()
            && self.adaptation_set_index == other.adaptation_set_index
            && self.quality == other.quality
    }
}

impl Eq for InitSegmentKey {}

impl Hash for InitSegmentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.period_start.to_bits().hash(state);
        self.adaptation_set_index.hash(state);
        self.quality.hash(state);
    }
}

impl std::fmt::Display for InitSegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "period@{:.3}/as{}/q{}",
            self.period_start, self.adaptation_set_index, self.quality
        )
    }
}

/// Init segments known to one track.
#[derive(Debug, Default)]
pub struct InitSegmentStore {
    entries: HashMap<InitSegmentKey, Bytes>,
}

impl InitSegmentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an init segment, replacing any previous one for the key.
    pub fn insert(&mut self, key: InitSegmentKey, data: Bytes) {
        self.entries.insert(key, data);
    }

    /// Get the init segment for a key.
    pub fn get(&self, key: &InitSegmentKey) -> Option<&Bytes> {
        self.entries.get(key)
    }

    /// Whether an init segment is stored for a key.
    pub fn contains(&self, key: &InitSegmentKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop all init segments of periods starting before `period_start`.
    pub fn retain_from(&mut self, period_start: f64) {
        self.entries.retain(|key, _| key.period_start >= period_start);
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored init segments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
