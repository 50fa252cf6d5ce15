//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a short synthetic presentation,
//! spawns a session on the simulated platform and keeps the [`EventBus`]
//! around for assertions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dashline::config::Config;
use dashline::events::EventBus;
use dashline::sim::{Simulation, SimulationOptions};
use dashline::timeline::Snapshot;

/// Virtual time budget for a whole playback.
pub const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// How often tests look at the published snapshot.
pub const POLL: Duration = Duration::from_millis(100);

/// Two four-second periods with two-second segments.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.simulation.period_durations = vec![4.0, 4.0];
    config.simulation.segment_duration = 2.0;
    config.simulation.fetch_latency_ms = 20;
    config.simulation.append_latency_ms = 5;
    config.buffer.video.prefetch_threshold = 6.0;
    config.buffer.video.append_enable_threshold = 4.0;
    config.buffer.audio.prefetch_threshold = 6.0;
    config.buffer.audio.append_enable_threshold = 4.0;
    config.buffer.back_buffer = 10.0;
    config
}

/// Test harness wrapping a running [`Simulation`].
pub struct TestHarness {
    pub events: Arc<EventBus>,
    pub simulation: Simulation,
}

impl TestHarness {
    /// Spawn a session with the fast configuration.
    pub fn new() -> Self {
        Self::with_config(fast_config(), SimulationOptions::default())
    }

    /// Spawn a session with a custom configuration and options.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_config(config: Config, options: SimulationOptions) -> Self {
        let events = Arc::new(EventBus::default());
        let simulation = Simulation::spawn(Arc::new(config), Arc::clone(&events), options)
            .expect("failed to spawn simulation");
        Self { events, simulation }
    }

    /// Load the first period and play until the session ends.
    pub async fn play_to_end(&self) -> Snapshot {
        self.simulation.start();
        self.simulation.wait_for_end(PLAYBACK_TIMEOUT, POLL).await
    }

    /// Poll until `done` holds for the published snapshot or the budget runs out.
    pub async fn wait_for(&self, mut done: impl FnMut(&Snapshot) -> bool) -> Snapshot {
        let deadline = tokio::time::Instant::now() + PLAYBACK_TIMEOUT;
        loop {
            let snapshot = self.simulation.handle.snapshot();
            if done(&snapshot) || tokio::time::Instant::now() >= deadline {
                return snapshot;
            }
            tokio::time::sleep(POLL).await;
        }
    }

    /// Number of published events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.events.count(name)
    }
}
