//! Buffered time ranges.
//!
//! Decode sinks report buffered data as a list of intervals. Intervals whose
//! gap is within a tolerance are treated as one range; intervals further apart
//! are never merged, which is what makes a gap observable.

/// Default merge tolerance in seconds.
pub const DEFAULT_TOLERANCE: f64 = 0.15;

/// A buffered interval in presentation seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferedRange {
    /// Start in seconds.
    pub start: f64,
    /// End in seconds (exclusive).
    pub end: f64,
}

impl BufferedRange {
    /// Create a new range.
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Length of the range in seconds.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Whether `time` falls inside the range, widened by `tolerance` on both sides.
    pub fn contains(&self, time: f64, tolerance: f64) -> bool {
        time >= self.start - tolerance && time <= self.end + tolerance
    }
}

/// Sort and merge ranges whose gap does not exceed `tolerance`.
pub fn merge(ranges: &[BufferedRange], tolerance: f64) -> Vec<BufferedRange> {
    let mut sorted: Vec<BufferedRange> = ranges
        .iter()
        .copied()
        .filter(|r| r.end > r.start)
        .collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<BufferedRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start - last.end <= tolerance => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Find the merged range covering `target`, if any.
pub fn range_at(
    ranges: &[BufferedRange],
    target: f64,
    tolerance: f64,
) -> Option<BufferedRange> {
    merge(ranges, tolerance)
        .into_iter()
        .find(|r| r.contains(target, tolerance))
}

/// Start of the first merged range beginning at or after `from`.
pub fn next_start(ranges: &[BufferedRange], from: f64, tolerance: f64) -> Option<f64> {
    merge(ranges, tolerance)
        .into_iter()
        .find(|r| r.start >= from - tolerance)
        .map(|r| r.start)
}

/// Remove `[start, end)` from `ranges`.
pub fn subtract(ranges: &[BufferedRange], start: f64, end: f64) -> Vec<BufferedRange> {
    let mut out = Vec::with_capacity(ranges.len() + 1);
    for r in ranges {
        if r.end <= start || r.start >= end {
            out.push(*r);
            continue;
        }
        if r.start < start {
            out.push(BufferedRange::new(r.start, start));
        }
        if r.end > end {
            out.push(BufferedRange::new(end, r.end));
        }
    }
    out
}

/// Intervals covered by every list in `lists`.
pub fn intersect_all(lists: &[Vec<BufferedRange>], tolerance: f64) -> Vec<BufferedRange> {
    let mut iter = lists.iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };

    let mut acc = merge(first, tolerance);
    for list in iter {
        let other = merge(list, tolerance);
        let mut out = Vec::new();
        for a in &acc {
            for b in &other {
                let start = a.start.max(b.start);
                let end = a.end.min(b.end);
                if end > start {
                    out.push(BufferedRange::new(start, end));
                }
            }
        }
        acc = out;
    }
    acc
}
