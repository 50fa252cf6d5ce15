//! Simulated key system.

use std::time::Duration;

use async_trait::async_trait;
use dashline_common::{AdaptationSet, Error, Result};
use tracing::{debug, info};

use crate::drm::DrmAgent;
use crate::session::{SessionHandle, SessionMessage};

pub struct SimulatedDrm {
    supports: bool,
    /// Delay before the key is added; `None` never adds it.
    latency: Option<Duration>,
    reject: bool,
    handle: SessionHandle,
}

impl SimulatedDrm {
    pub fn new(handle: SessionHandle, latency: Option<Duration>) -> Self {
        Self {
            supports: true,
            latency,
            reject: false,
            handle,
        }
    }

    /// Platform without a key system.
    pub fn unsupported(mut self) -> Self {
        self.supports = false;
        self
    }

    /// License server that refuses every request.
    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }
}

#[async_trait]
impl DrmAgent for SimulatedDrm {
    fn supports_protection(&self) -> bool {
        self.supports
    }

    async fn create_keys_from_period_data(
        &self,
        video: Option<AdaptationSet>,
        audio: Option<AdaptationSet>,
    ) -> Result<()> {
        if !self.supports {
            return Err(Error::NoKeySystem("simulated platform has no key system".to_string()));
        }
        if self.reject {
            return Err(Error::KeyRejected("simulated license denied".to_string()));
        }

        debug!(
            video = video.is_some(),
            audio = audio.is_some(),
            "Key sessions created"
        );
        if let Some(latency) = self.latency {
            let handle = self.handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                info!("Simulated key added");
                handle.send(SessionMessage::KeyAdded);
            });
        }
        Ok(())
    }
}
