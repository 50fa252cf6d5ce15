//! Dashline-Common: Shared types, identifiers, and errors.
//!
//! This crate provides the vocabulary used across dashline:
//!
//! - **Typed IDs**: [`SessionId`] for playback sessions, [`Generation`] for
//!   seek generations that invalidate in-flight work
//! - **Timeline Types**: periods, adaptation sets, representations and track kinds
//! - **Player States**: [`BufferState`] and [`ReadyState`]
//! - **Error Handling**: the [`Error`] taxonomy with its [`ErrorClass`]
//!
//! # Examples
//!
//! ```
//! use dashline_common::{Error, ErrorClass, Generation, TrackKind};
//!
//! let generation = Generation::default().next();
//! assert_eq!(generation.get(), 1);
//!
//! let err = Error::gap(TrackKind::Video, 12.0);
//! assert_eq!(err.class(), ErrorClass::Timeline);
//! assert!(!err.is_fatal());
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, ErrorClass, Result};
pub use ids::*;
pub use types::*;
