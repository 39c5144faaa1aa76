//! Read/write deadlines for async connections
//!
//! Tokio sockets have no deadline of their own, so each direction of a socket
//! owns a [`DeadlineTimer`]. Every blocking call is raced against the timer.
//! Moving the deadline, even while a call is in flight, takes effect
//! immediately: the timer publishes changes over a `watch` channel and the
//! racing call re-arms on every change.
//!
//! Expired deadlines surface as [`io::ErrorKind::TimedOut`]. A closed timer
//! fails every current and future call with [`io::ErrorKind::NotConnected`].

use std::future::Future;
use std::io;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TimerState {
    at: Option<Instant>,
    closed: bool,
}

/// Deadline for one direction of a connection
#[derive(Debug)]
pub struct DeadlineTimer {
    tx: watch::Sender<TimerState>,
}

impl DeadlineTimer {
    /// Create a timer with no deadline
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TimerState::default());
        Self { tx }
    }

    /// Set or clear the deadline
    pub fn set(&self, at: Option<Instant>) {
        self.tx.send_modify(|state| state.at = at);
    }

    /// Current deadline
    pub fn get(&self) -> Option<Instant> {
        self.tx.borrow().at
    }

    /// Fail every pending and future call
    pub fn close(&self) {
        self.tx.send_modify(|state| state.closed = true);
    }

    /// Check if the timer has been closed
    pub fn is_closed(&self) -> bool {
        self.tx.borrow().closed
    }

    /// Drive `op` until it completes, the deadline passes, or the timer is
    /// closed
    ///
    /// A deadline that has already passed fails the call before `op` is
    /// polled, even if `op` could complete immediately.
    pub async fn run<T, F>(&self, op: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let mut rx = self.tx.subscribe();
        tokio::pin!(op);

        loop {
            let state = *rx.borrow_and_update();
            if state.closed {
                return Err(closed_error());
            }
            if matches!(state.at, Some(at) if at <= Instant::now()) {
                return Err(timeout_error());
            }

            let expiry = async move {
                match state.at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                res = &mut op => return res,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(closed_error());
                    }
                    // Re-arm with the new state
                }
                _ = expiry => return Err(timeout_error()),
            }
        }
    }
}

impl Default for DeadlineTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when a deadline expires
pub fn timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}

/// Error returned by calls on a closed connection
pub fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "use of closed connection")
}
