//! DRM collaborator interface.
//!
//! Key exchange itself is opaque here. The timeline only asks for keys once
//! per load and then waits for a key-added message on the session mailbox.

use async_trait::async_trait;
use dashline_common::{AdaptationSet, Result};

/// Content key provisioning.
#[async_trait]
pub trait DrmAgent: Send + Sync {
    /// Whether a key system is available on this platform.
    fn supports_protection(&self) -> bool;

    /// Start key sessions for the protected adaptation sets of a period.
    ///
    /// Success means sessions were created; the key itself arrives later as a
    /// key-added message. `Error::KeyRejected` is fatal, `Error::NoKeySystem`
    /// disables the protected tracks.
    async fn create_keys_from_period_data(
        &self,
        video: Option<AdaptationSet>,
        audio: Option<AdaptationSet>,
    ) -> Result<()>;
}
