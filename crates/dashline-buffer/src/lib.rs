//! Dashline-Buffer: the segment append engine.
//!
//! This crate decides, once per scheduling tick, which fetched media bytes are
//! handed to a track's decode sink and when.
//!
//! # Modules
//!
//! - `range` - Buffered range merging with a tolerance (the gap primitive)
//! - `chunk` - Queued segment chunks, whole or progressive payloads
//! - `init` - Initialization segments keyed by period/adaptation/quality
//! - `queue` - The per-track queue, sorted by `(period, request time, division)`
//! - `sink` - The decode sink interface and an in-memory implementation
//! - `engine` - The per-track append engine (`tick`, thresholds, gaps)
//! - `sync` - The post-seek alignment barrier across tracks
//!
//! # Architecture
//!
//! Each track owns one [`SegmentAppendEngine`] and one [`DecodeSink`]. Chunks
//! arrive from the fetch scheduler and are enqueued; every tick the engine:
//!
//! 1. Drops chunks that fell behind the playhead
//! 2. Checks the next chunk joins the buffered edge, signalling a gap otherwise
//! 3. Prepends the init segment when period, adaptation set or quality changed
//! 4. Appends a contiguous run of pieces once the lookahead threshold is met
//!
//! After a seek, engines run in sync mode until every track located its anchor
//! chunk, then [`sync::align`] shifts all tracks by the same amount at once.

pub mod chunk;
pub mod engine;
pub mod init;
pub mod queue;
pub mod range;
pub mod sink;
pub mod sync;

pub use chunk::{Appendable, ChunkKey, Payload, SegmentChunk, SubChunk};
pub use engine::{
    AppendReport, EngineConfig, Enqueued, GapSignal, IdleReason, SegmentAppendEngine,
    TickContext, TickOutcome,
};
pub use init::{InitSegmentKey, InitSegmentStore};
pub use queue::ChunkQueue;
pub use range::{BufferedRange, DEFAULT_TOLERANCE};
pub use sink::{AppendRequest, DecodeSink, MemorySink, SinkReadyState};
pub use sync::{Alignment, SyncAnchor};
