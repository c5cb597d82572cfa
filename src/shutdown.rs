//! The process-wide monotonic shutdown flag.
//!
//! Modelled as a single atomic boolean plus a zero-capacity broadcast
//! channel: the atomic gives every thread a cheap, eventually-visible
//! "are we shutting down" check, while the channel gives blocked waiters
//! (queue dequeues, arbiter waits, the producer's backoff sleep) a prompt
//! wakeup instead of a poll loop. Dropping the channel's sender closes it
//! for every outstanding clone of the receiver at once, which is how a
//! single `trigger()` call wakes an arbitrary number of parked threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::warn;
use parking_lot::Mutex;

/// Shared handle to the shutdown flag, cloned into every component that
/// needs to observe (or trigger) cooperative termination.
pub type ShutdownView = Arc<ShutdownFlag>;

pub struct ShutdownFlag {
    flag: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl ShutdownFlag {
    /// Create a fresh, unset flag wrapped for sharing across threads.
    pub fn new() -> ShutdownView {
        let (tx, rx) = bounded(0);
        Arc::new(Self {
            flag: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
            receiver: rx,
        })
    }

    /// Returns `true` once any thread has called [`trigger`](Self::trigger).
    ///
    /// Once this returns `true` it never again returns `false` for the
    /// lifetime of the flag.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// A receiver that becomes disconnected the moment shutdown is
    /// triggered. Clone it freely; every clone wakes simultaneously.
    pub fn wait_channel(&self) -> Receiver<()> {
        self.receiver.clone()
    }

    /// Trigger shutdown. Idempotent: the second and later calls are no-ops
    /// other than logging that shutdown is already underway, matching the
    /// "double signal" scenario in the daemon's testable properties.
    pub fn trigger(&self) {
        if self.flag.swap(true, Ordering::AcqRel) {
            warn!("shutdown already in progress; ignoring repeated trigger");
            return;
        }
        // Dropping the sender disconnects every outstanding receiver clone,
        // which wakes any thread blocked in a `select!` on `wait_channel()`.
        self.sender.lock().take();
    }

    /// Sleep for `duration`, waking early if shutdown is triggered.
    /// Used by the Producer's queue-full backoff, which must remain
    /// cancellable even mid-backoff.
    pub fn interruptible_sleep(&self, duration: Duration) {
        let rx = self.wait_channel();
        // A zero-capacity channel's recv_timeout returns Err(Timeout) if
        // nothing arrives and Err(Disconnected) the instant the sender is
        // dropped by `trigger`; both outcomes are handled the same way by
        // the caller, which simply re-checks `is_set()` afterwards.
        let _ = rx.recv_timeout(duration);
    }
}
