//! Per-track buffer controller.
//!
//! Pairs one track's [`SegmentAppendEngine`] with the decode sink it feeds
//! and the adaptation set it currently buffers from.

use dashline_buffer::{
    BufferedRange, DecodeSink, EngineConfig, SegmentAppendEngine, SinkReadyState, TickContext,
    TickOutcome,
};
use dashline_common::{AdaptationSet, Result, TrackKind};
use serde::Serialize;

/// Creates decode sinks when a presentation is loaded.
pub trait SinkFactory: Send {
    /// Create the sink for `kind`.
    ///
    /// `Error::UnsupportedCodec` skips the track; any other error fails the
    /// load.
    fn create(&mut self, kind: TrackKind, adaptation: &AdaptationSet)
        -> Result<Box<dyn DecodeSink>>;
}

/// Per-track view reported in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub kind: TrackKind,
    pub adaptation_set: usize,
    /// Seconds buffered in the sink ahead of the playhead.
    pub lookahead: f64,
    pub queued: usize,
    pub finished_period: bool,
}

pub struct BufferController {
    kind: TrackKind,
    adaptation: AdaptationSet,
    engine: SegmentAppendEngine,
    sink: Box<dyn DecodeSink>,
}

impl BufferController {
    pub fn new(
        kind: TrackKind,
        adaptation: AdaptationSet,
        config: EngineConfig,
        sink: Box<dyn DecodeSink>,
    ) -> Self {
        Self {
            kind,
            adaptation,
            engine: SegmentAppendEngine::new(kind, config),
            sink,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn adaptation(&self) -> &AdaptationSet {
        &self.adaptation
    }

    pub fn set_adaptation(&mut self, adaptation: AdaptationSet) {
        self.adaptation = adaptation;
    }

    pub fn engine(&self) -> &SegmentAppendEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SegmentAppendEngine {
        &mut self.engine
    }

    pub fn sink(&self) -> &dyn DecodeSink {
        self.sink.as_ref()
    }

    pub fn tick(&mut self, ctx: &TickContext) -> TickOutcome {
        self.engine.tick(self.sink.as_mut(), ctx)
    }

    pub fn lookahead(&self, current_time: f64) -> f64 {
        self.engine.sink_lookahead(self.sink.as_ref(), current_time)
    }

    pub fn buffered_duration(&self, current_time: f64) -> f64 {
        self.engine.buffered_duration(self.sink.as_ref(), current_time)
    }

    /// Whether this track has everything up to `until`, either buffered
    /// from `current_time` or because it appended its period's last chunk.
    pub fn is_complete_to(&self, current_time: f64, until: f64) -> bool {
        self.engine.finished_period()
            || self
                .engine
                .is_buffered_to(self.sink.as_ref(), current_time, until)
    }

    pub fn prune(&mut self, current_time: f64, keep: f64) -> Result<Option<BufferedRange>> {
        self.engine
            .prune_back_buffer(self.sink.as_mut(), current_time, keep)
    }

    /// The sink finished an append; removes it again when it went stale.
    pub fn sink_updated(&mut self) -> Result<Option<BufferedRange>> {
        match self.engine.on_sink_updated() {
            Some(stale) => {
                self.sink.remove(stale.start, stale.end)?;
                Ok(Some(stale))
            }
            None => Ok(None),
        }
    }

    /// Signal end of stream unless the sink already left the open state.
    pub fn end_of_stream(&mut self) -> Result<bool> {
        if self.sink.ready_state() != SinkReadyState::Open {
            return Ok(false);
        }
        self.sink.end_of_stream()?;
        Ok(true)
    }

    /// Detach from the sink, dropping the append in progress.
    pub fn detach(&mut self) {
        self.sink.abort();
    }

    pub fn snapshot(&self, current_time: f64) -> TrackSnapshot {
        TrackSnapshot {
            kind: self.kind,
            adaptation_set: self.adaptation.index,
            lookahead: self.lookahead(current_time),
            queued: self.engine.queue().len(),
            finished_period: self.engine.finished_period(),
        }
    }
}
