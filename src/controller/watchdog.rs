//! watchdog.rs
//! Cooperative cancellation for measurement runs.
//!
//! `CancelToken` is passed into every blocking wait. Cancelling drops the sender half of a
//! zero-capacity channel, which wakes every `select!` parked on the receiver at once.
//! `Watchdog` is a detached timer that cancels a token when the run duration elapses,
//! unless it is disarmed first. Runs arm it on a `child` of the caller's token, so an
//! expired run never leaves the caller's token cancelled.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{bounded, never, select, Receiver, RecvTimeoutError, Sender};
use log::debug;
use parking_lot::Mutex;

struct CancelInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelInner {
    fn new() -> Arc<Self> {
        let (tx, rx) = bounded(0);
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            trigger: Mutex::new(Some(tx)),
            signal: rx,
        })
    }
}

/// Shared cancellation flag observable from blocking waits.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
    /// Token whose cancellation is forwarded to this one (direct parent only).
    parent: Option<Arc<CancelInner>>,
    parent_signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: CancelInner::new(),
            parent: None,
            parent_signal: never(),
        }
    }

    /// New token cancelled together with `self`; cancelling the child leaves `self` untouched.
    pub fn child(&self) -> Self {
        Self {
            inner: CancelInner::new(),
            parent: Some(self.inner.clone()),
            parent_signal: self.inner.signal.clone(),
        }
    }

    /// Idempotent. Wakes every wait currently parked on this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        drop(self.inner.trigger.lock().take());
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.cancelled.load(Ordering::SeqCst))
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Same for the parent token; never ready on a root token.
    pub(crate) fn parent_signal(&self) -> &Receiver<()> {
        &self.parent_signal
    }

    /// Sleeps for `period` unless cancelled first. Returns true when cancelled.
    pub fn sleep(&self, period: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        select! {
            recv(self.inner.signal) -> _ => true,
            recv(self.parent_signal) -> _ => true,
            default(period) => self.is_cancelled(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Detached run-duration timer. Disarmed on drop.
pub struct Watchdog {
    disarm: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    /// Starts the timer; `token` is cancelled when `limit` elapses.
    pub fn arm(limit: Duration, token: CancelToken) -> Self {
        let (disarm_tx, disarm_rx) = bounded::<()>(1);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = fired.clone();

        let handle = thread::spawn(move || match disarm_rx.recv_timeout(limit) {
            Err(RecvTimeoutError::Timeout) => {
                fired_flag.store(true, Ordering::SeqCst);
                token.cancel();
                debug!("[Watchdog] run duration {:?} elapsed, cancelling wait", limit);
            }
            // Disarmed (explicitly or by drop) before expiry.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        });

        Self {
            disarm: Some(disarm_tx),
            handle: Some(handle),
            fired,
        }
    }

    /// True once the timer has expired and cancelled its token.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stops the timer and joins it. Safe to call more than once.
    pub fn disarm(&mut self) {
        if let Some(tx) = self.disarm.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let token = CancelToken::new();
        let t = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t.cancel();
        });
        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn uncancelled_sleep_runs_full_period() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(15)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn parent_cancel_reaches_child_but_not_back() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let child = parent.child();
        let p = parent.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            p.cancel();
        });
        let start = Instant::now();
        assert!(child.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(child.is_cancelled());
        canceller.join().unwrap();
    }

    #[test]
    fn watchdog_on_child_leaves_parent_usable() {
        let parent = CancelToken::new();
        let child = parent.child();
        let watchdog = Watchdog::arm(Duration::from_millis(10), child.clone());
        thread::sleep(Duration::from_millis(150));
        assert!(watchdog.fired());
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!parent.child().is_cancelled());
    }

    #[test]
    fn watchdog_fires_after_limit() {
        let token = CancelToken::new();
        let watchdog = Watchdog::arm(Duration::from_millis(20), token.clone());
        thread::sleep(Duration::from_millis(200));
        assert!(watchdog.fired());
        assert!(token.is_cancelled());
    }

    #[test]
    fn disarmed_watchdog_never_fires() {
        let token = CancelToken::new();
        let mut watchdog = Watchdog::arm(Duration::from_millis(50), token.clone());
        watchdog.disarm();
        thread::sleep(Duration::from_millis(120));
        assert!(!watchdog.fired());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn drop_disarms() {
        let token = CancelToken::new();
        {
            let _watchdog = Watchdog::arm(Duration::from_millis(50), token.clone());
        }
        thread::sleep(Duration::from_millis(120));
        assert!(!token.is_cancelled());
    }
}
