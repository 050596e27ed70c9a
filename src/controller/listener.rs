//! listener.rs
//! Event listener shared between the event sources and the measurement loop.
//!
//! - Side state for both sides lives behind one `parking_lot::Mutex`; it is held only to
//!   check the registration, copy the event fields and release the rendezvous slot.
//! - Sources hold an `EventSink` handed out by `register`. When a run ends every
//!   registration is revoked and pending releases are drained, so a stale source cannot
//!   leak events into the next run.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::debug;
use parking_lot::Mutex;

use crate::controller::rendezvous::Rendezvous;
use crate::signal::{
    color::Color,
    event::{SideState, SignalEvent, SignalSide},
};

#[derive(Default)]
struct HubState {
    sides: [SideState; 2],
    registrations: [Option<u64>; 2],
    next_registration: u64,
}

pub(crate) struct EventHub {
    state: Mutex<HubState>,
    rendezvous: Rendezvous,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            rendezvous: Rendezvous::new(),
        }
    }

    pub(crate) fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    /// Registers (or replaces) the event source for `side`.
    pub(crate) fn register(self: &Arc<Self>, side: SignalSide) -> EventSink {
        let mut st = self.state.lock();
        let id = st.next_registration;
        st.next_registration += 1;
        if st.registrations[side.index()].replace(id).is_some() {
            debug!("[EventHub] replacing previous {} event source", side);
        }
        EventSink {
            side,
            registration: id,
            hub: Arc::clone(self),
        }
    }

    /// Listener entry point: dispatches on the event's side.
    /// Returns false when the delivering registration is no longer active.
    fn on_event(&self, event: SignalEvent, registration: u64) -> bool {
        let mut st = self.state.lock();
        let slot = event.side.index();
        if st.registrations[slot] != Some(registration) {
            return false;
        }
        st.sides[slot].update(&event);
        // Released under the lock so a concurrent revoke cannot miss it; the send never blocks.
        self.rendezvous.release(event);
        true
    }

    fn is_active(&self, side: SignalSide, registration: u64) -> bool {
        self.state.lock().registrations[side.index()] == Some(registration)
    }

    pub(crate) fn is_registered(&self, side: SignalSide) -> bool {
        self.state.lock().registrations[side.index()].is_some()
    }

    pub(crate) fn side_state(&self, side: SignalSide) -> SideState {
        self.state.lock().sides[side.index()]
    }

    /// Revokes both registrations and drops pending releases. Returns the dropped count.
    pub(crate) fn release_registrations(&self) -> usize {
        let mut st = self.state.lock();
        st.registrations = [None, None];
        SignalSide::ALL
            .iter()
            .map(|side| self.rendezvous.drain(*side))
            .sum()
    }
}

/// Handle an event source uses to report signal changes for one side.
#[derive(Clone)]
pub struct EventSink {
    side: SignalSide,
    registration: u64,
    hub: Arc<EventHub>,
}

impl EventSink {
    pub fn side(&self) -> SignalSide {
        self.side
    }

    /// Reports a color change observed at `logical_timestamp`, stamped with the current
    /// instant. Fire and forget; returns false once the registration has been revoked.
    pub fn report(&self, logical_timestamp: Duration, value: Color) -> bool {
        self.report_at(logical_timestamp, value, Instant::now())
    }

    /// Same as `report` with a caller supplied arrival instant.
    pub fn report_at(&self, logical_timestamp: Duration, value: Color, arrival: Instant) -> bool {
        let event = SignalEvent::new(self.side, logical_timestamp, value, arrival);
        self.hub.on_event(event, self.registration)
    }

    pub fn is_active(&self) -> bool {
        self.hub.is_active(self.side, self.registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::watchdog::CancelToken;

    #[test]
    fn report_updates_state_and_releases_once() {
        let hub = Arc::new(EventHub::new());
        let sink = hub.register(SignalSide::Local);
        assert!(sink.report(Duration::from_millis(40), Color::RED));

        let state = hub.side_state(SignalSide::Local);
        assert_eq!(state.last_value, Some(Color::RED));
        assert_eq!(state.last_logical_timestamp, Some(Duration::from_millis(40)));
        assert_eq!(hub.rendezvous().pending(SignalSide::Local), 1);
        assert_eq!(hub.rendezvous().pending(SignalSide::Remote), 0);
        assert_eq!(hub.side_state(SignalSide::Remote), SideState::default());
    }

    #[test]
    fn revoked_sink_is_rejected() {
        let hub = Arc::new(EventHub::new());
        let sink = hub.register(SignalSide::Remote);
        sink.report(Duration::ZERO, Color::SYNC_MARKER);
        assert_eq!(hub.release_registrations(), 1);

        assert!(!sink.is_active());
        assert!(!sink.report(Duration::from_millis(1), Color::RED));
        assert_eq!(hub.rendezvous().pending(SignalSide::Remote), 0);
        assert!(!hub.is_registered(SignalSide::Remote));
    }

    #[test]
    fn re_registration_replaces_previous_sink() {
        let hub = Arc::new(EventHub::new());
        let old = hub.register(SignalSide::Local);
        let new = hub.register(SignalSide::Local);
        assert!(!old.report(Duration::ZERO, Color::RED));
        assert!(new.report(Duration::ZERO, Color::RED));
        assert_eq!(hub.rendezvous().pending(SignalSide::Local), 1);
    }

    #[test]
    fn concurrent_reports_from_both_sides() {
        let hub = Arc::new(EventHub::new());
        let local = hub.register(SignalSide::Local);
        let remote = hub.register(SignalSide::Remote);

        let handles: Vec<_> = [local, remote]
            .into_iter()
            .map(|sink| {
                std::thread::spawn(move || {
                    for ms in 0..200 {
                        sink.report(Duration::from_millis(ms), Color::BLUE);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let cancel = CancelToken::new();
        for side in SignalSide::ALL {
            assert_eq!(hub.rendezvous().pending(side), 200);
            assert_eq!(
                hub.side_state(side).last_logical_timestamp,
                Some(Duration::from_millis(199))
            );
            let first = hub
                .rendezvous()
                .wait_for(side, Duration::from_millis(10), &cancel)
                .unwrap();
            assert_eq!(first.logical_timestamp, Duration::ZERO);
        }
    }
}
