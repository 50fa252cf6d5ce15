//! Simulated platform.
//!
//! Stand-ins for the collaborators a real player provides: a playback
//! element whose clock runs on tokio time, decode sinks that take time to
//! append, a key system and a segment scheduler serving a synthetic
//! presentation. Used by `dashline simulate` and the integration tests.

pub mod drm;
pub mod element;
pub mod scheduler;
pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::events::EventBus;
use crate::manifest::Manifest;
use crate::session::{Session, SessionContext, SessionHandle, SessionParts};
use crate::timeline::{Phase, Snapshot};

pub use drm::SimulatedDrm;
pub use element::{SimulatedElement, SinkRegistry};
pub use scheduler::SyntheticScheduler;
pub use sink::SimSinkFactory;

/// Options that have no place in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct SimulationOptions {
    /// Segments skipped on their first fetch, as `(track, time)`.
    pub missing: Vec<(dashline_common::TrackKind, f64)>,
    /// Codec families the sinks accept; `None` accepts the defaults.
    pub codecs: Option<Vec<String>>,
    /// Simulate a platform without a key system.
    pub no_key_system: bool,
    /// Simulate a license server that rejects every request.
    pub reject_keys: bool,
}

/// A running simulated session.
pub struct Simulation {
    pub handle: SessionHandle,
    pub manifest: Arc<Manifest>,
    task: JoinHandle<dashline_common::Result<()>>,
}

impl Simulation {
    /// Build the simulated platform and spawn a session on it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: Arc<Config>, events: Arc<EventBus>, options: SimulationOptions) -> Result<Self> {
        let sim = config.simulation.clone();
        let manifest = Arc::new(
            Manifest::synthetic(&sim.period_durations, sim.protected)
                .context("Failed to build the synthetic presentation")?,
        );

        let ctx = SessionContext::new(Arc::clone(&config), events);
        let (handle, mailbox) = Session::channel(&ctx);
        let registry = SinkRegistry::new();

        let element = SimulatedElement::new(
            registry.clone(),
            handle.clone(),
            sim.playback_rate,
            config.buffer.tolerance,
        );
        let scheduler = options.missing.iter().fold(
            SyntheticScheduler::new(
                Arc::clone(&manifest),
                handle.clone(),
                sim.clone(),
                &config.buffer,
            ),
            |scheduler, (track, time)| scheduler.with_missing(*track, *time),
        );
        let mut drm = SimulatedDrm::new(handle.clone(), sim.drm_key_latency());
        if options.no_key_system {
            drm = drm.unsupported();
        }
        if options.reject_keys {
            drm = drm.rejecting();
        }
        let mut sinks = SimSinkFactory::new(registry, handle.clone(), sim.append_latency());
        if let Some(codecs) = &options.codecs {
            let codecs: Vec<&str> = codecs.iter().map(String::as_str).collect();
            sinks = sinks.with_codecs(&codecs);
        }

        let session = Session::new(
            ctx,
            mailbox,
            SessionParts {
                element: Box::new(element),
                scheduler: Arc::new(scheduler),
                drm: Arc::new(drm),
                sinks: Box::new(sinks),
            },
        );
        let task = tokio::spawn(session.run());

        info!(
            session = %handle.id(),
            periods = sim.period_durations.len(),
            duration = sim.total_duration(),
            "Simulation started"
        );
        Ok(Self {
            handle,
            manifest,
            task,
        })
    }

    /// Load the presentation from its first period and start playing.
    pub fn start(&self) {
        self.handle.load(self.manifest.clone(), 0);
        self.handle.play();
    }

    /// Poll the session until it ended or `timeout` elapsed.
    pub async fn wait_for_end(&self, timeout: Duration, poll: Duration) -> Snapshot {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.handle.snapshot();
            if snapshot.phase == Phase::Ended || tokio::time::Instant::now() >= deadline {
                return snapshot;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stop the session and return how playback ended.
    pub async fn shutdown(self) -> Result<dashline_common::Result<()>> {
        self.handle.shutdown();
        self.task.await.context("Session task panicked")
    }
}
