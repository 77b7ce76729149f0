//! One-way broadcast cancellation signal shared by the pumps and callers.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A signal that moves from not-cancelled to cancelled exactly once.
///
/// Observers never consume the signal. Blocking code waits on [`signal`],
/// a channel whose only sender is dropped on cancellation, so every
/// receiver (inside `select!` or not) wakes at the same time.
///
/// Cancellation is cooperative: it is only seen at the points where a
/// worker checks [`is_cancelled`] or waits on [`signal`].
///
/// [`signal`]: CancellationToken::signal
/// [`is_cancelled`]: CancellationToken::is_cancelled
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
    signal: Receiver<()>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
            }),
            signal,
        }
    }

    /// Raises the signal. Returns `true` only for the call that actually
    /// cancelled the token.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Channel that becomes disconnected once the token is cancelled. Never
    /// carries a message.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Sleeps for `timeout` or until cancelled, whichever comes first.
    /// Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.signal.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            _ => true,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
