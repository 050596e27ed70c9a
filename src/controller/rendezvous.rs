//! rendezvous.rs
//! Per-side counting rendezvous between the event listener and the measurement loop.
//!
//! Each side owns an unbounded crossbeam channel of `SignalEvent`s. A release is a send,
//! a wait is a receive, so releases delivered before the matching wait are queued rather
//! than lost (counting semantics, never a boolean "has event" flag).
//!
//! Waits are bounded by a timeout and observe a `CancelToken`, so the watchdog can
//! interrupt a wait that is already blocked.

use std::time::{Duration, Instant};

use crossbeam::channel::{select, unbounded, Receiver, Sender};

use crate::controller::watchdog::CancelToken;
use crate::signal::event::{SignalEvent, SignalSide};

/// Why a wait returned without an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    TimedOut { side: SignalSide, waited: Duration },
    Cancelled { side: SignalSide, waited: Duration },
}

impl WaitError {
    pub fn side(&self) -> SignalSide {
        match self {
            WaitError::TimedOut { side, .. } | WaitError::Cancelled { side, .. } => *side,
        }
    }
}

struct Slot {
    tx: Sender<SignalEvent>,
    rx: Receiver<SignalEvent>,
}

/// One counting slot per side.
pub struct Rendezvous {
    // Both halves live as long as the registry, so receives never see a disconnect.
    slots: [Slot; 2],
}

impl Rendezvous {
    pub fn new() -> Self {
        let slot = || {
            let (tx, rx) = unbounded();
            Slot { tx, rx }
        };
        Self {
            slots: [slot(), slot()],
        }
    }

    /// Releases one unit on the event's side. Never blocks.
    #[inline]
    pub fn release(&self, event: SignalEvent) {
        // Cannot fail: the receiver is owned by `self`.
        let _ = self.slots[event.side.index()].tx.send(event);
    }

    /// Number of releases not yet consumed on `side`.
    pub fn pending(&self, side: SignalSide) -> usize {
        self.slots[side.index()].rx.len()
    }

    /// Blocks until the next release on `side`, the timeout, or cancellation.
    pub fn wait_for(
        &self,
        side: SignalSide,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<SignalEvent, WaitError> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled {
                side,
                waited: Duration::ZERO,
            });
        }

        let rx = &self.slots[side.index()].rx;
        select! {
            recv(rx) -> msg => match msg {
                Ok(event) => Ok(event),
                Err(_) => Err(WaitError::Cancelled { side, waited: started.elapsed() }),
            },
            recv(cancel.signal()) -> _ => Err(WaitError::Cancelled {
                side,
                waited: started.elapsed(),
            }),
            recv(cancel.parent_signal()) -> _ => Err(WaitError::Cancelled {
                side,
                waited: started.elapsed(),
            }),
            default(timeout) => Err(WaitError::TimedOut { side, waited: timeout }),
        }
    }

    /// Discards every pending release on `side`; returns how many were dropped.
    pub fn drain(&self, side: SignalSide) -> usize {
        self.slots[side.index()].rx.try_iter().count()
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}
