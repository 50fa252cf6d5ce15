//! Dashline - MPEG-DASH buffering and timeline control
//!
//! This library crate exposes the timeline controller, the session driver and
//! the simulated platform for integration testing and the `dashline` binary.

pub mod clock;
pub mod config;
pub mod drm;
pub mod events;
pub mod fetch;
pub mod manifest;
pub mod session;
pub mod sim;
pub mod timeline;
