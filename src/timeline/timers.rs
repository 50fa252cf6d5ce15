//! Controller-owned deadlines.
//!
//! Timers are plain deadlines. The session driver sleeps until
//! [`Timers::next_deadline`] and hands the due ones back to the controller,
//! so the controller itself never needs a runtime.

use tokio::time::Instant;

/// Timers armed by the timeline controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Period boundary gap check, armed near the next period start.
    GapCheck,
    /// Forces the key gate open when no key arrives.
    DrmTimeout,
    /// Seek settle debounce.
    SeekSettle,
    /// Periodic stall check while playing.
    StallCheck,
}

impl Timer {
    const ALL: [Timer; 4] = [
        Timer::GapCheck,
        Timer::DrmTimeout,
        Timer::SeekSettle,
        Timer::StallCheck,
    ];

    fn slot(self) -> usize {
        match self {
            Timer::GapCheck => 0,
            Timer::DrmTimeout => 1,
            Timer::SeekSettle => 2,
            Timer::StallCheck => 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Timers {
    deadlines: [Option<Instant>; 4],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `timer` for `at`, replacing any previous deadline.
    pub fn arm(&mut self, timer: Timer, at: Instant) {
        self.deadlines[timer.slot()] = Some(at);
    }

    /// Arm `timer` unless it is already armed.
    pub fn arm_if_idle(&mut self, timer: Timer, at: Instant) {
        let slot = &mut self.deadlines[timer.slot()];
        if slot.is_none() {
            *slot = Some(at);
        }
    }

    pub fn cancel(&mut self, timer: Timer) {
        self.deadlines[timer.slot()] = None;
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        self.deadlines[timer.slot()].is_some()
    }

    pub fn clear(&mut self) {
        self.deadlines = [None; 4];
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due: Vec<(Instant, Timer)> = Timer::ALL
            .iter()
            .filter_map(|timer| {
                let deadline = self.deadlines[timer.slot()]?;
                (deadline <= now).then_some((deadline, *timer))
            })
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, timer) in &due {
            self.cancel(*timer);
        }
        due.into_iter().map(|(_, timer)| timer).collect()
    }
}
