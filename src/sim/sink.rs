//! Simulated decode sinks.
//!
//! Appends take a configurable time to land and report completion through
//! the session mailbox, the way a platform media buffer fires its update
//! event.

use std::sync::Arc;
use std::time::Duration;

use dashline_buffer::{AppendRequest, BufferedRange, DecodeSink, MemorySink, SinkReadyState};
use dashline_common::{AdaptationSet, Error, Result, TrackKind};
use parking_lot::Mutex;
use tracing::debug;

use super::element::SinkRegistry;
use crate::session::{SessionHandle, SessionMessage};
use crate::timeline::SinkFactory;

/// Codec families the simulated platform can decode.
pub const DEFAULT_CODECS: &[&str] = &["avc1", "mp4a"];

pub struct SimSinkFactory {
    supported: Vec<String>,
    latency: Duration,
    registry: SinkRegistry,
    handle: SessionHandle,
}

impl SimSinkFactory {
    pub fn new(registry: SinkRegistry, handle: SessionHandle, latency: Duration) -> Self {
        Self {
            supported: DEFAULT_CODECS.iter().map(|c| c.to_string()).collect(),
            latency,
            registry,
            handle,
        }
    }

    /// Restrict the decodable codec families.
    pub fn with_codecs(mut self, supported: &[&str]) -> Self {
        self.supported = supported.iter().map(|c| c.to_string()).collect();
        self
    }
}

impl SinkFactory for SimSinkFactory {
    fn create(&mut self, kind: TrackKind, adaptation: &AdaptationSet) -> Result<Box<dyn DecodeSink>> {
        let codec = adaptation.codecs().unwrap_or_default();
        if !self.supported.iter().any(|c| codec.starts_with(c.as_str())) {
            return Err(Error::unsupported_codec(kind, codec));
        }

        let inner = MemorySink::new(kind);
        let ranges = inner.ranges_handle();
        self.registry.register(Arc::clone(&ranges));
        debug!(track = %kind, codec, "Sink created");
        Ok(Box::new(SimSink {
            track: kind,
            inner: Arc::new(Mutex::new(inner)),
            ranges,
            latency: self.latency,
            registry: self.registry.clone(),
            handle: self.handle.clone(),
        }))
    }
}

struct SimSink {
    track: TrackKind,
    inner: Arc<Mutex<MemorySink>>,
    ranges: Arc<Mutex<Vec<BufferedRange>>>,
    latency: Duration,
    registry: SinkRegistry,
    handle: SessionHandle,
}

impl DecodeSink for SimSink {
    fn append(&mut self, request: AppendRequest) -> Result<()> {
        self.inner.lock().append(request)?;

        let inner = Arc::clone(&self.inner);
        let handle = self.handle.clone();
        let (track, latency) = (self.track, self.latency);
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            inner.lock().finish_update();
            handle.send(SessionMessage::SinkUpdated { track });
        });
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.inner.lock().is_busy()
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        self.inner.lock().buffered()
    }

    fn remove(&mut self, start: f64, end: f64) -> Result<()> {
        self.inner.lock().remove(start, end)
    }

    fn abort(&mut self) {
        self.inner.lock().abort();
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.inner.lock().end_of_stream()
    }

    fn ready_state(&self) -> SinkReadyState {
        self.inner.lock().ready_state()
    }
}

impl Drop for SimSink {
    fn drop(&mut self) {
        self.registry.unregister(&self.ranges);
    }
}
