//! Timeline control.
//!
//! - `controller` - The session state machine (load, seek, periods, end of stream)
//! - `track` - One track's append engine paired with its decode sink
//! - `period` - Playing/buffering period indices and boundary repair
//! - `gate` - Content key gate holding appends back
//! - `timers` - Deadlines owned by the controller

pub mod controller;
pub mod gate;
pub mod period;
pub mod timers;
pub mod track;

pub use controller::{Collaborators, Phase, Snapshot, TaskOutput, TimelineController, TimelineTask};
pub use gate::KeyGate;
pub use period::PeriodInfo;
pub use track::{BufferController, SinkFactory, TrackSnapshot};
