//! Queued segment chunks.
//!
//! A [`SegmentChunk`] is one fetched media fragment waiting in a track's
//! queue. Its payload is either the whole fetched body ([`Payload::Whole`]) or,
//! in progressive mode, a growing list of [`SubChunk`]s appended as they
//! arrive ([`Payload::Chunked`]). The engine treats both through the
//! [`Appendable`] trait, so queue, gap and threshold logic are shared.

use bytes::Bytes;
use std::cmp::Ordering;

use crate::init::InitSegmentKey;

static EMPTY: Bytes = Bytes::new();

/// A unit of media that can be handed to a decode sink.
pub trait Appendable {
    /// Presentation start in seconds.
    fn start(&self) -> f64;
    /// Duration in seconds.
    fn duration(&self) -> f64;
    /// Raw media bytes.
    fn data(&self) -> &Bytes;

    /// Presentation end in seconds.
    fn end(&self) -> f64 {
        self.start() + self.duration()
    }
}

/// A byte sub-range of a progressively delivered segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SubChunk {
    /// Presentation start in seconds.
    pub start: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Media bytes.
    pub data: Bytes,
}

impl SubChunk {
    /// Create a new sub-chunk.
    pub fn new(start: f64, duration: f64, data: impl Into<Bytes>) -> Self {
        Self {
            start,
            duration,
            data: data.into(),
        }
    }
}

impl Appendable for SubChunk {
    fn start(&self) -> f64 {
        self.start
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn data(&self) -> &Bytes {
        &self.data
    }
}

/// How a chunk's bytes are delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The entire fetched body, appended at once.
    Whole(Bytes),
    /// Sub-ranges appended incrementally as they arrive.
    Chunked(Vec<SubChunk>),
}

/// Total ordering key of a chunk within one track's queue.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkKey {
    pub period_start: f64,
    pub request_start_time: f64,
    pub division_index: u32,
}

impl Eq for ChunkKey {}

impl PartialOrd for ChunkKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.period_start
            .total_cmp(&other.period_start)
            .then(self.request_start_time.total_cmp(&other.request_start_time))
            .then(self.division_index.cmp(&other.division_index))
    }
}

/// One fetched media fragment queued for a track.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentChunk {
    /// Start of the period the segment belongs to.
    pub period_start: f64,
    /// Adaptation set the segment was fetched from.
    pub adaptation_set_index: usize,
    /// Representation index within the adaptation set.
    pub quality: usize,
    /// Presentation time this fetch was issued for.
    pub request_start_time: f64,
    /// Where the media lands on the sink timeline.
    pub presentation_start: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Timestamp offset applied by the sink for this chunk.
    pub timestamp_offset: f64,
    /// Order of this piece within one fetch.
    pub division_index: u32,
    /// Media bytes.
    pub payload: Payload,
    /// Whether all bytes of the fetch have arrived.
    pub done: bool,
    /// Whether part of the chunk was already handed to the sink.
    pub appending: bool,
    /// Whether this is the final segment of its period.
    pub last_in_period: bool,
    consumed: usize,
}

impl SegmentChunk {
    /// Create a whole-segment chunk whose presentation starts at its request time.
    pub fn new(
        period_start: f64,
        request_start_time: f64,
        duration: f64,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            period_start,
            adaptation_set_index: 0,
            quality: 0,
            request_start_time,
            presentation_start: request_start_time,
            duration,
            timestamp_offset: 0.0,
            division_index: 0,
            payload: Payload::Whole(data.into()),
            done: true,
            appending: false,
            last_in_period: false,
            consumed: 0,
        }
    }

    /// Create a progressive chunk whose pieces arrive later.
    pub fn progressive(period_start: f64, request_start_time: f64, duration: f64) -> Self {
        Self {
            payload: Payload::Chunked(Vec::new()),
            done: false,
            ..Self::new(period_start, request_start_time, duration, Bytes::new())
        }
    }

    /// Set the adaptation set and quality.
    #[must_use]
    pub fn with_quality(mut self, adaptation_set_index: usize, quality: usize) -> Self {
        self.adaptation_set_index = adaptation_set_index;
        self.quality = quality;
        self
    }

    /// Set where the media lands and the offset the sink applies.
    #[must_use]
    pub fn with_timing(mut self, presentation_start: f64, timestamp_offset: f64) -> Self {
        let delta = presentation_start - self.presentation_start;
        self.presentation_start = presentation_start;
        self.timestamp_offset = timestamp_offset;
        if let Payload::Chunked(pieces) = &mut self.payload {
            for piece in pieces {
                piece.start += delta;
            }
        }
        self
    }

    /// Set the division index.
    #[must_use]
    pub fn with_division(mut self, division_index: u32) -> Self {
        self.division_index = division_index;
        self
    }

    /// Mark this chunk as the last of its period.
    #[must_use]
    pub fn last_in_period(mut self) -> Self {
        self.last_in_period = true;
        self
    }

    /// Queue ordering key.
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            period_start: self.period_start,
            request_start_time: self.request_start_time,
            division_index: self.division_index,
        }
    }

    /// Init segment identity of this chunk.
    pub fn identity(&self) -> InitSegmentKey {
        InitSegmentKey::new(self.period_start, self.adaptation_set_index, self.quality)
    }

    /// Whether `other` describes the same fetch.
    pub fn is_duplicate_of(&self, other: &SegmentChunk) -> bool {
        self.period_start == other.period_start
            && self.request_start_time == other.request_start_time
            && self.duration == other.duration
            && self.quality == other.quality
            && self.adaptation_set_index == other.adaptation_set_index
            && self.division_index == other.division_index
    }

    /// Number of units already handed to the sink.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Units not yet handed to the sink, in presentation order.
    pub fn pending_units(&self) -> Vec<&dyn Appendable> {
        match &self.payload {
            Payload::Whole(_) if self.consumed == 0 => vec![self as &dyn Appendable],
            Payload::Whole(_) => Vec::new(),
            Payload::Chunked(pieces) => pieces
                .iter()
                .skip(self.consumed)
                .map(|p| p as &dyn Appendable)
                .collect(),
        }
    }

    /// Record that `count` more units were handed to the sink.
    pub fn mark_consumed(&mut self, count: usize) {
        self.consumed += count;
        self.appending = true;
    }

    /// Whether every unit has arrived and been handed to the sink.
    pub fn is_drained(&self) -> bool {
        let total = match &self.payload {
            Payload::Whole(_) => 1,
            Payload::Chunked(pieces) => pieces.len(),
        };
        self.done && self.consumed >= total
    }

    /// Add a progressively delivered piece. Ignored for whole payloads.
    pub fn push_piece(&mut self, piece: SubChunk) -> bool {
        match &mut self.payload {
            Payload::Chunked(pieces) => {
                pieces.push(piece);
                true
            }
            Payload::Whole(_) => false,
        }
    }

    /// Move the chunk on the sink timeline by `delta` seconds.
    pub fn shift(&mut self, delta: f64) {
        self.presentation_start += delta;
        self.timestamp_offset += delta;
        if let Payload::Chunked(pieces) = &mut self.payload {
            for piece in pieces {
                piece.start += delta;
            }
        }
    }
}

impl Appendable for SegmentChunk {
    fn start(&self) -> f64 {
        self.presentation_start
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    /// The whole body; progressive chunks keep their bytes in pieces.
    fn data(&self) -> &Bytes {
        match &self.payload {
            Payload::Whole(data) => data,
            Payload::Chunked(_) => &EMPTY,
        }
    }
}
