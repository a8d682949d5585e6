//! Single-flight coordination for access-token refreshes.
//!
//! Every request that fails with an expired token joins the queue. The first one
//! to join while no refresh is running is told to start it; the others only
//! wait. When the refresh settles the flag is cleared and the queue is drained
//! in one step, and each waiter receives the same outcome in the order it
//! joined.

use super::RefreshError;
use secrecy::SecretString;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

pub(crate) type RefreshOutcome = Result<SecretString, RefreshError>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    queue: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// A place in the refresh queue.
pub(crate) struct Ticket {
    pub receiver: oneshot::Receiver<RefreshOutcome>,
    /// `true` for the caller that must start the refresh.
    pub leader: bool,
}

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    /// Joins the queue, claiming the refresh if none is running.
    pub(crate) fn join(&self) -> Ticket {
        let mut state = self.lock();
        let leader = !state.in_flight;
        state.in_flight = true;

        let (sender, receiver) = oneshot::channel();
        state.queue.push(sender);

        Ticket { receiver, leader }
    }

    /// Ends the running refresh and hands `outcome` to every waiter. Returns the
    /// number of waiters notified.
    pub(crate) fn settle(&self, outcome: &RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.lock();
            state.in_flight = false;
            std::mem::take(&mut state.queue)
        };

        let count = waiters.len();
        for waiter in waiters {
            // A waiter whose caller went away is simply skipped.
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub(crate) fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the refresh with `Abandoned` if the refresh task ends without
/// reporting, so waiters never hang on a dropped or panicked task.
pub(crate) struct SettleOnDrop<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl<'a> SettleOnDrop<'a> {
    pub(crate) fn new(coordinator: &'a RefreshCoordinator) -> Self {
        Self {
            coordinator,
            armed: true,
        }
    }

    pub(crate) fn settle(mut self, outcome: &RefreshOutcome) -> usize {
        self.armed = false;
        self.coordinator.settle(outcome)
    }
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.settle(&Err(RefreshError::Abandoned));
        }
    }
}
