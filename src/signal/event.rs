//! event.rs
//! Signal events produced by the per-side event sources.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::signal::color::Color;

/// Which rendering of the stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalSide {
    Local,
    Remote,
}

impl SignalSide {
    pub const ALL: [SignalSide; 2] = [SignalSide::Local, SignalSide::Remote];

    /// Slot index used by per-side tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            SignalSide::Local => 0,
            SignalSide::Remote => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalSide::Local => "LOCAL",
            SignalSide::Remote => "REMOTE",
        }
    }
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One "signal changed" observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalEvent {
    pub side: SignalSide,
    /// Time reported by the playing stream.
    pub logical_timestamp: Duration,
    /// When the event reached the controller.
    pub arrival: Instant,
    pub value: Color,
}

impl SignalEvent {
    pub fn new(side: SignalSide, logical_timestamp: Duration, value: Color, arrival: Instant) -> Self {
        Self {
            side,
            logical_timestamp,
            arrival,
            value,
        }
    }

    /// Absolute skew between the arrivals of two events.
    pub fn skew(&self, other: &SignalEvent) -> Duration {
        if self.arrival >= other.arrival {
            self.arrival - other.arrival
        } else {
            other.arrival - self.arrival
        }
    }
}

/// Last known observation of one side. Written only by the event listener.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SideState {
    pub last_value: Option<Color>,
    pub last_logical_timestamp: Option<Duration>,
    pub last_arrival: Option<Instant>,
}

impl SideState {
    pub(crate) fn update(&mut self, event: &SignalEvent) {
        self.last_value = Some(event.value);
        self.last_logical_timestamp = Some(event.logical_timestamp);
        self.last_arrival = Some(event.arrival);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_is_absolute() {
        let t0 = Instant::now();
        let a = SignalEvent::new(SignalSide::Local, Duration::ZERO, Color::RED, t0);
        let b = SignalEvent::new(
            SignalSide::Remote,
            Duration::ZERO,
            Color::RED,
            t0 + Duration::from_millis(20),
        );
        assert_eq!(a.skew(&b), Duration::from_millis(20));
        assert_eq!(b.skew(&a), Duration::from_millis(20));
    }

    #[test]
    fn side_state_tracks_latest_event() {
        let t0 = Instant::now();
        let mut state = SideState::default();
        assert_eq!(state.last_value, None);

        let ev = SignalEvent::new(SignalSide::Local, Duration::from_millis(500), Color::BLUE, t0);
        state.update(&ev);
        assert_eq!(state.last_value, Some(Color::BLUE));
        assert_eq!(state.last_logical_timestamp, Some(Duration::from_millis(500)));
        assert_eq!(state.last_arrival, Some(t0));
    }
}
