//! Simulated playback element.

use std::sync::Arc;

use dashline_buffer::{range, BufferedRange};
use dashline_common::ReadyState;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::clock::{ClockEvent, PlaybackElement};
use crate::session::{SessionHandle, SessionMessage};

/// Buffered ranges of every live sink, as the element sees them.
#[derive(Debug, Clone, Default)]
pub struct SinkRegistry {
    sinks: Arc<Mutex<Vec<Arc<Mutex<Vec<BufferedRange>>>>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ranges: Arc<Mutex<Vec<BufferedRange>>>) {
        self.sinks.lock().push(ranges);
    }

    pub fn unregister(&self, ranges: &Arc<Mutex<Vec<BufferedRange>>>) {
        self.sinks.lock().retain(|r| !Arc::ptr_eq(r, ranges));
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ranges buffered in every registered sink.
    pub fn playable(&self, tolerance: f64) -> Vec<BufferedRange> {
        let lists: Vec<Vec<BufferedRange>> = self
            .sinks
            .lock()
            .iter()
            .map(|ranges| ranges.lock().clone())
            .collect();
        range::intersect_all(&lists, tolerance)
    }
}

#[derive(Debug)]
struct ElementState {
    position: f64,
    anchor: Instant,
    duration: f64,
    paused: bool,
    ended_sent: bool,
}

/// A playback element whose clock runs on tokio time.
///
/// The playhead only advances through data buffered in every sink, so an
/// empty buffer stalls it exactly like a real element would.
pub struct SimulatedElement {
    state: Mutex<ElementState>,
    registry: SinkRegistry,
    handle: SessionHandle,
    rate: f64,
    tolerance: f64,
}

impl SimulatedElement {
    pub fn new(registry: SinkRegistry, handle: SessionHandle, rate: f64, tolerance: f64) -> Self {
        Self {
            state: Mutex::new(ElementState {
                position: 0.0,
                anchor: Instant::now(),
                duration: 0.0,
                paused: true,
                ended_sent: false,
            }),
            registry,
            handle,
            rate,
            tolerance,
        }
    }

    /// Move the playhead to now and return it.
    fn advance(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.anchor).as_secs_f64();
        state.anchor = now;
        if state.paused || elapsed == 0.0 {
            return state.position;
        }

        let playable = self.registry.playable(self.tolerance);
        let Some(current) = range::range_at(&playable, state.position, self.tolerance) else {
            return state.position;
        };
        let limit = current.end.min(state.duration);
        let next = (state.position + elapsed * self.rate).min(limit);
        if next > state.position {
            state.position = next;
        }

        if state.duration > 0.0
            && state.position >= state.duration - 1e-6
            && !state.ended_sent
        {
            state.ended_sent = true;
            self.handle.send(SessionMessage::Clock(ClockEvent::Ended));
        }
        state.position
    }
}

impl PlaybackElement for SimulatedElement {
    fn current_time(&self) -> f64 {
        self.advance()
    }

    fn set_current_time(&mut self, time: f64) {
        {
            let mut state = self.state.lock();
            state.position = time;
            state.anchor = Instant::now();
            if time < state.duration {
                state.ended_sent = false;
            }
        }
        trace!(time, "Element seeking");
        self.handle
            .send(SessionMessage::Clock(ClockEvent::Seeking { time }));
        self.handle
            .send(SessionMessage::Clock(ClockEvent::Seeked { time }));
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn set_duration(&mut self, duration: f64) {
        self.state.lock().duration = duration;
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        self.registry.playable(self.tolerance)
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn play(&mut self) {
        self.advance();
        self.state.lock().paused = false;
    }

    fn pause(&mut self) {
        self.advance();
        self.state.lock().paused = true;
    }

    fn ready_state(&self) -> ReadyState {
        let position = self.advance();
        let playable = self.registry.playable(self.tolerance);
        match range::range_at(&playable, position, self.tolerance) {
            None => ReadyState::HaveMetadata,
            Some(r) if r.end - position < self.tolerance => ReadyState::HaveCurrentData,
            Some(r) if r.end - position < 2.0 => ReadyState::HaveFutureData,
            Some(_) => ReadyState::HaveEnoughData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::session::{Session, SessionContext};
    use std::time::Duration;

    fn element() -> (SimulatedElement, Arc<Mutex<Vec<BufferedRange>>>, crate::session::Mailbox) {
        let ctx = SessionContext::new(Arc::new(Config::default()), Arc::new(EventBus::default()));
        let (handle, mailbox) = Session::channel(&ctx);
        let registry = SinkRegistry::new();
        let ranges = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::clone(&ranges));
        let mut element = SimulatedElement::new(registry, handle, 1.0, 0.15);
        element.set_duration(10.0);
        (element, ranges, mailbox)
    }

    #[tokio::test(start_paused = true)]
    async fn test_advances_through_buffered_data_only() {
        let (mut element, ranges, _mailbox) = element();
        *ranges.lock() = vec![BufferedRange::new(0.0, 3.0)];
        element.play();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!((element.current_time() - 2.0).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(element.current_time(), 3.0);
        assert_eq!(element.ready_state(), ReadyState::HaveCurrentData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_element_holds_position() {
        let (element, ranges, _mailbox) = element();
        *ranges.lock() = vec![BufferedRange::new(0.0, 3.0)];
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(element.current_time(), 0.0);
        assert_eq!(element.ready_state(), ReadyState::HaveEnoughData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_reports_events() {
        let (mut element, _ranges, mut mailbox) = element();
        element.set_current_time(4.0);
        assert_eq!(element.current_time(), 4.0);

        let names: Vec<&str> = std::iter::from_fn(|| mailbox.try_recv())
            .map(|m| match m {
                SessionMessage::Clock(ClockEvent::Seeking { .. }) => "seeking",
                SessionMessage::Clock(ClockEvent::Seeked { .. }) => "seeked",
                _ => "other",
            })
            .collect();
        assert_eq!(names, vec!["seeking", "seeked"]);
    }

    #[test]
    fn test_registry_intersects_sinks() {
        let registry = SinkRegistry::new();
        let video = Arc::new(Mutex::new(vec![BufferedRange::new(0.0, 6.0)]));
        let audio = Arc::new(Mutex::new(vec![BufferedRange::new(0.0, 4.0)]));
        registry.register(Arc::clone(&video));
        registry.register(Arc::clone(&audio));
        assert_eq!(registry.playable(0.15), vec![BufferedRange::new(0.0, 4.0)]);

        registry.unregister(&audio);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.playable(0.15), vec![BufferedRange::new(0.0, 6.0)]);
    }
}
