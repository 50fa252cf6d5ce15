//! Content key gate.

use serde::Serialize;

/// Whether appends are held back waiting for a content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum KeyGate {
    /// Unprotected content.
    NotRequired,
    /// Waiting for the key system.
    Pending,
    /// A key was provisioned, or the wait timed out.
    Ready { forced: bool },
}

impl KeyGate {
    pub fn is_open(&self) -> bool {
        !matches!(self, KeyGate::Pending)
    }

    /// Open a pending gate. Returns whether the gate changed.
    pub fn open(&mut self, forced: bool) -> bool {
        if *self != KeyGate::Pending {
            return false;
        }
        *self = KeyGate::Ready { forced };
        true
    }
}

impl Default for KeyGate {
    fn default() -> Self {
        KeyGate::NotRequired
    }
}
