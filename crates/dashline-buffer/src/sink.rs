//! Decode sink interface.
//!
//! A decode sink accepts appended media bytes for one track and reports what
//! it has buffered. Appends may complete asynchronously: while an append is
//! being processed the sink reports [`DecodeSink::is_busy`] and the engine
//! waits for the owner to signal completion.
//!
//! [`MemorySink`] keeps everything in memory. It is used by the simulator and
//! by tests; with [`MemorySink::instant`] every append lands immediately.

use std::sync::Arc;

use bytes::Bytes;
use dashline_common::{Error, Generation, Result, TrackKind};
use parking_lot::Mutex;

use crate::range::{self, BufferedRange};

/// Lifecycle of a decode sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum SinkReadyState {
    /// Accepting appends.
    Open,
    /// End of stream was signalled.
    Ended,
    /// Detached; no further operations are possible.
    Closed,
}

/// One append handed to a decode sink.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    /// Track the bytes belong to.
    pub track: TrackKind,
    /// Seek generation the append was issued in.
    pub generation: Generation,
    /// Buffers in append order; an init segment comes first when present.
    pub data: Vec<Bytes>,
    /// Timestamp offset the sink applies.
    pub timestamp_offset: f64,
    /// Presentation interval covered by the media.
    pub start: f64,
    pub end: f64,
}

impl AppendRequest {
    /// Total byte length of all buffers.
    pub fn byte_len(&self) -> usize {
        self.data.iter().map(Bytes::len).sum()
    }

    /// Presentation interval covered by the media.
    pub fn range(&self) -> BufferedRange {
        BufferedRange::new(self.start, self.end)
    }
}

/// A per-track decode and render sink.
pub trait DecodeSink: Send {
    /// Hand media bytes to the sink.
    fn append(&mut self, request: AppendRequest) -> Result<()>;

    /// Whether an append is still being processed.
    fn is_busy(&self) -> bool;

    /// Buffered intervals as reported by the sink.
    fn buffered(&self) -> Vec<BufferedRange>;

    /// Remove buffered media in `[start, end)`.
    fn remove(&mut self, start: f64, end: f64) -> Result<()>;

    /// Abort the append in progress, if any.
    fn abort(&mut self);

    /// Signal that no more media will be appended.
    fn end_of_stream(&mut self) -> Result<()>;

    /// Current lifecycle state.
    fn ready_state(&self) -> SinkReadyState;
}

/// Record of one accepted append.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRecord {
    pub generation: Generation,
    pub start: f64,
    pub end: f64,
    pub timestamp_offset: f64,
    pub buffers: usize,
    pub bytes: usize,
    /// First buffer, usually the init segment when one was prepended.
    pub head: Bytes,
}

/// In-memory decode sink.
#[derive(Debug)]
pub struct MemorySink {
    track: TrackKind,
    ranges: Arc<Mutex<Vec<BufferedRange>>>,
    pending: Option<BufferedRange>,
    instant: bool,
    state: SinkReadyState,
    appends: Vec<AppendRecord>,
    fail_next: Option<Error>,
    end_of_stream_calls: usize,
}

impl MemorySink {
    /// Create a sink whose appends stay busy until [`finish_update`](Self::finish_update).
    pub fn new(track: TrackKind) -> Self {
        Self {
            track,
            ranges: Arc::new(Mutex::new(Vec::new())),
            pending: None,
            instant: false,
            state: SinkReadyState::Open,
            appends: Vec::new(),
            fail_next: None,
            end_of_stream_calls: 0,
        }
    }

    /// Create a sink whose appends land immediately.
    pub fn instant(track: TrackKind) -> Self {
        Self {
            instant: true,
            ..Self::new(track)
        }
    }

    /// Shared view of the buffered ranges, readable from other tasks.
    pub fn ranges_handle(&self) -> Arc<Mutex<Vec<BufferedRange>>> {
        Arc::clone(&self.ranges)
    }

    /// Complete the append in progress, returning the interval it added.
    pub fn finish_update(&mut self) -> Option<BufferedRange> {
        let landed = self.pending.take()?;
        self.land(landed);
        Some(landed)
    }

    /// Make the next append fail with `error`.
    pub fn fail_next_append(&mut self, error: Error) {
        self.fail_next = Some(error);
    }

    /// Detach the sink.
    pub fn close(&mut self) {
        self.pending = None;
        self.state = SinkReadyState::Closed;
    }

    /// Accepted appends, oldest first.
    pub fn appends(&self) -> &[AppendRecord] {
        &self.appends
    }

    /// How many times end of stream was signalled.
    pub fn end_of_stream_calls(&self) -> usize {
        self.end_of_stream_calls
    }

    fn land(&mut self, interval: BufferedRange) {
        let mut ranges = self.ranges.lock();
        let mut all = ranges.clone();
        all.push(interval);
        // Adjacent appends join exactly; the tolerance belongs to readers.
        *ranges = range::merge(&all, 1e-6);
    }
}

impl DecodeSink for MemorySink {
    fn append(&mut self, request: AppendRequest) -> Result<()> {
        match self.state {
            SinkReadyState::Closed => {
                return Err(Error::decode_sink(self.track, "append on a closed sink"));
            }
            // Appending after end of stream reopens the sink.
            SinkReadyState::Ended => self.state = SinkReadyState::Open,
            SinkReadyState::Open => {}
        }
        if self.pending.is_some() {
            return Err(Error::append(self.track, "append while an update is in progress"));
        }
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }

        self.appends.push(AppendRecord {
            generation: request.generation,
            start: request.start,
            end: request.end,
            timestamp_offset: request.timestamp_offset,
            buffers: request.data.len(),
            bytes: request.byte_len(),
            head: request.data.first().cloned().unwrap_or_default(),
        });

        let interval = request.range();
        if self.instant {
            self.land(interval);
        } else {
            self.pending = Some(interval);
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        self.ranges.lock().clone()
    }

    fn remove(&mut self, start: f64, end: f64) -> Result<()> {
        if self.state == SinkReadyState::Closed {
            return Err(Error::decode_sink(self.track, "remove on a closed sink"));
        }
        let mut ranges = self.ranges.lock();
        *ranges = range::subtract(&ranges, start, end);
        Ok(())
    }

    fn abort(&mut self) {
        self.pending = None;
    }

    fn end_of_stream(&mut self) -> Result<()> {
        if self.state != SinkReadyState::Open {
            return Err(Error::decode_sink(self.track, "end of stream on a sink that is not open"));
        }
        if let Some(pending) = self.pending.take() {
            self.land(pending);
        }
        self.end_of_stream_calls += 1;
        self.state = SinkReadyState::Ended;
        Ok(())
    }

    fn ready_state(&self) -> SinkReadyState {
        self.state
    }
}
