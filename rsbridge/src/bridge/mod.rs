//! The relay carrying events from SDK threads to the consumer thread.
//!
//! SDK threads submit [`PendingEvent`]s through a [`Notifier`]. The consumer thread delivers them
//! with [`Host::dispatch`](crate::Host::dispatch). Every submitted event ends up either run or
//! released, exactly once, including events still queued when the relay is torn down.
use std::cell::RefCell;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::{debug, error, warn};
use thiserror::Error;

use crate::host::Host;

#[cfg(test)]
mod tests;

/// What a submitter does when the relay is full.
///
/// A capacity of zero is raised to one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Backpressure {
    /// Never full.
    #[default]
    Unbounded,
    /// Block the submitting thread while `n` events are queued.
    Block(usize),
    /// Release the event being submitted while `n` events are queued.
    DropNewest(usize),
}

/// Why a submission was refused. The event has been released either way.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("The event relay has been torn down")]
    TornDown,
    #[error("The event relay is full")]
    Overflow,
}

/// Work created on an SDK thread to be finished on the consumer thread.
pub trait PendingEvent: Send {
    /// Delivers the event. Ownership of everything it carries moves into the callback.
    fn run(self: Box<Self>, host: &Host);

    /// Gives up the event without delivering it. Dropping does the releasing by default.
    fn release(self: Box<Self>) {}
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    run: AtomicU64,
    released: AtomicU64,
    rejected: AtomicU64,
}

/// A snapshot of what went through a relay.
///
/// Once everything has been delivered or torn down, `submitted == run + released`.
/// Rejected submissions are also counted as released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub submitted: u64,
    pub run: u64,
    pub released: u64,
    pub rejected: u64,
}

/// A queued event. Whatever happens to it, it is either run or released exactly once.
pub(crate) struct Envelope {
    event: Option<Box<dyn PendingEvent>>,
    counters: Arc<Counters>,
}

impl Envelope {
    pub(crate) fn run(mut self, host: &Host) {
        if let Some(event) = self.event.take() {
            self.counters.run.fetch_add(1, Ordering::Relaxed);
            event.run(host);
        }
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.counters.released.fetch_add(1, Ordering::Relaxed);
            event.release();
        }
    }
}

/// The submitting side of a relay. `Send` and cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    sender: Sender<Envelope>,
    open: Arc<AtomicBool>,
    counters: Arc<Counters>,
    drop_newest: bool,
}

impl Notifier {
    /// Queues `event` for the consumer thread. Callable from any thread.
    ///
    /// With [`Backpressure::Block`] this waits while the relay is full.
    pub fn notify_main_thread(&self, event: Box<dyn PendingEvent>) -> Result<(), SubmitError> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope {
            event: Some(event),
            counters: self.counters.clone(),
        };

        let refused = if !self.open.load(Ordering::Acquire) {
            Some((SubmitError::TornDown, envelope))
        } else if self.drop_newest {
            match self.sender.try_send(envelope) {
                Ok(()) => None,
                Err(TrySendError::Full(envelope)) => Some((SubmitError::Overflow, envelope)),
                Err(TrySendError::Disconnected(envelope)) => {
                    Some((SubmitError::TornDown, envelope))
                }
            }
        } else {
            self.sender
                .send(envelope)
                .err()
                .map(|err| (SubmitError::TornDown, err.into_inner()))
        };

        match refused {
            None => Ok(()),
            Some((reason, envelope)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                match reason {
                    SubmitError::TornDown => {
                        error!("event submitted after the relay was torn down, releasing it")
                    }
                    SubmitError::Overflow => warn!("event relay is full, releasing the newest event"),
                }
                drop(envelope);
                Err(reason)
            }
        }
    }

    /// Whether the relay still accepts events.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

struct Relay {
    receiver: Receiver<Envelope>,
    notifier: Notifier,
}

enum RelayState {
    Idle,
    Open(Relay),
    TornDown(Notifier),
}

/// The consumer side of a relay. Lives inside the host.
pub(crate) struct Bridge {
    backpressure: Backpressure,
    counters: Arc<Counters>,
    state: RefCell<RelayState>,
}

impl Bridge {
    pub(crate) fn new(backpressure: Backpressure) -> Self {
        let backpressure = match backpressure {
            Backpressure::Block(0) => {
                warn!("event relay capacity of zero raised to one");
                Backpressure::Block(1)
            }
            Backpressure::DropNewest(0) => {
                warn!("event relay capacity of zero raised to one");
                Backpressure::DropNewest(1)
            }
            other => other,
        };
        Self {
            backpressure,
            counters: Arc::default(),
            state: RefCell::new(RelayState::Idle),
        }
    }

    /// Returns a notifier, creating the relay on first use.
    ///
    /// After teardown the notifier refuses everything.
    pub(crate) fn notifier(&self) -> Notifier {
        let mut state = self.state.borrow_mut();
        match &*state {
            RelayState::Open(relay) => relay.notifier.clone(),
            RelayState::TornDown(notifier) => notifier.clone(),
            RelayState::Idle => {
                let (sender, receiver) = match self.backpressure {
                    Backpressure::Unbounded => unbounded(),
                    Backpressure::Block(n) | Backpressure::DropNewest(n) => bounded(n),
                };
                let notifier = Notifier {
                    sender,
                    open: Arc::new(AtomicBool::new(true)),
                    counters: self.counters.clone(),
                    drop_newest: matches!(self.backpressure, Backpressure::DropNewest(_)),
                };
                debug!("event relay initialized ({:?})", self.backpressure);
                *state = RelayState::Open(Relay {
                    receiver,
                    notifier: notifier.clone(),
                });
                notifier
            }
        }
    }

    pub(crate) fn receiver(&self) -> Option<Receiver<Envelope>> {
        match &*self.state.borrow() {
            RelayState::Open(relay) => Some(relay.receiver.clone()),
            _ => None,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(&*self.state.borrow(), RelayState::Open(_))
    }

    /// Number of events waiting for delivery.
    pub(crate) fn pending(&self) -> usize {
        match &*self.state.borrow() {
            RelayState::Open(relay) => relay.receiver.len(),
            _ => 0,
        }
    }

    pub(crate) fn stats(&self) -> BridgeStats {
        BridgeStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            run: self.counters.run.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Closes the relay and releases everything still queued. Returns how many were released.
    pub(crate) fn teardown(&self) -> usize {
        // Notifiers handed out after teardown must refuse, even if the relay was never used.
        self.notifier();
        let relay = {
            let mut state = self.state.borrow_mut();
            match mem::replace(&mut *state, RelayState::Idle) {
                RelayState::Open(relay) => {
                    *state = RelayState::TornDown(relay.notifier.clone());
                    relay
                }
                other => {
                    *state = other;
                    return 0;
                }
            }
        };

        relay.notifier.open.store(false, Ordering::Release);
        let mut released = 0;
        while let Ok(envelope) = relay.receiver.try_recv() {
            drop(envelope);
            released += 1;
        }
        // Anything that slips in after the drain is discarded, and released, with the receiver.
        drop(relay);
        debug!("event relay torn down, {released} queued events released");
        released
    }
}
