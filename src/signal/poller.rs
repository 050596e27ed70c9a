
//! poller.rs
//! Periodic color poller: the event source of one side.
//! - Real-time scheduling: SpinSleeper keeps a steady probe period (default 5 ms)
//! - Emits one event per observed color change through its `EventSink`
//! - Stops when its running flag clears or the controller revokes the sink

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::debug;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::controller::listener::EventSink;
use crate::signal::color::{similar, Color};

/// Reads the color currently rendered by one video element.
/// Returns the stream time and color, or `None` while nothing is playing.
pub trait ColorProbe: Send {
    fn probe(&mut self) -> Option<(Duration, Color)>;
}

impl<F> ColorProbe for F
where
    F: FnMut() -> Option<(Duration, Color)> + Send,
{
    fn probe(&mut self) -> Option<(Duration, Color)> {
        self()
    }
}

/// Counters returned when a poller stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub polls: u64,
    pub events: u64,
    /// Wake-ups that happened after the scheduled release.
    pub late_wakeups: u64,
}

pub struct ColorPoller {
    pub name: String,
    pub period: Duration,
    pub sink: EventSink,
    pub running: Arc<AtomicBool>,
}

impl ColorPoller {
    pub fn new(name: &str, period: Duration, sink: EventSink, running: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            period,
            sink,
            running,
        }
    }

    /// Main poll loop: periodic release, emit on color change.
    pub fn run<P: ColorProbe + ?Sized>(&self, probe: &mut P) -> PollerStats {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now() + self.period;
        let mut last_color: Option<Color> = None;
        let mut stats = PollerStats::default();

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
            } else {
                stats.late_wakeups += 1;
            }
            stats.polls += 1;

            if let Some((stream_time, color)) = probe.probe() {
                let changed = last_color.is_none_or(|last| !similar(&last, &color));
                if changed {
                    if !self.sink.report(stream_time, color) {
                        debug!("[{}] event sink revoked, stopping", self.name);
                        break;
                    }
                    stats.events += 1;
                    last_color = Some(color);
                }
            }

            next_deadline += self.period;
        }

        debug!("[{}] stopped after {} polls, {} events", self.name, stats.polls, stats.events);
        stats
    }

    /// Runs the poller on its own thread.
    pub fn spawn<P: ColorProbe + 'static>(self, mut probe: P) -> thread::JoinHandle<PollerStats> {
        thread::spawn(move || self.run(&mut probe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::LatencyController;
    use crate::config::ControllerConfig;
    use crate::signal::event::SignalSide;

    #[test]
    fn emits_only_on_color_change() {
        let controller = LatencyController::new(ControllerConfig::default());
        let sink = controller.register_source(SignalSide::Local);
        let running = Arc::new(AtomicBool::new(true));
        let poller = ColorPoller::new("local", Duration::from_millis(1), sink, running.clone());

        let script = [
            Color::SYNC_MARKER,
            Color::new(5, 250, 3),
            Color::SYNC_MARKER,
            Color::RED,
            Color::RED,
            Color::BLUE,
        ];
        let mut i = 0usize;
        let mut probe = || {
            let out = script.get(i).map(|c| (Duration::from_millis(i as u64 * 10), *c));
            i += 1;
            if i > script.len() + 3 {
                running.store(false, Ordering::Release);
            }
            out
        };

        let stats = poller.run(&mut probe);
        assert_eq!(stats.events, 3);
        assert!(stats.polls >= script.len() as u64);
        assert_eq!(controller.side_state(SignalSide::Local).last_value, Some(Color::BLUE));
    }

    #[test]
    fn stops_when_sink_revoked() {
        let controller = LatencyController::new(ControllerConfig::default());
        let sink = controller.register_source(SignalSide::Remote);
        // Replacing the registration revokes the first sink.
        let _replacement = controller.register_source(SignalSide::Remote);

        let running = Arc::new(AtomicBool::new(true));
        let poller = ColorPoller::new("remote", Duration::from_millis(1), sink, running);
        let stats = poller.run(&mut || Some((Duration::ZERO, Color::SYNC_MARKER)));
        assert_eq!(stats.events, 0);
        assert_eq!(stats.polls, 1);
    }
}
