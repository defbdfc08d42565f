use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::types::{ExecutionContext, PollerState};

/// Snapshot of a running poller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PollerStatus {
    pub state: PollerState,
    /// When the last poll that reached the node successfully finished.
    pub last_poll: Option<Instant>,
    /// Number of successful polls so far.
    pub cycles: u64,
}

impl Default for PollerStatus {
    fn default() -> Self {
        Self { state: PollerState::Idle, last_poll: None, cycles: 0 }
    }
}

/// Control side of a running poller: status, cancellation and completion.
#[derive(Debug)]
pub struct PollerControl {
    pub(crate) status: watch::Receiver<PollerStatus>,
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

impl PollerControl {
    #[must_use]
    pub fn status(&self) -> PollerStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn state(&self) -> PollerState {
        self.status.borrow().state
    }

    /// A receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PollerStatus> {
        self.status.clone()
    }

    /// Asks the poller to stop. It finishes the request in flight, if any, and exits.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the poller task to exit.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] if the task panicked or was aborted.
    pub async fn join(self) -> Result<(), JoinError> {
        self.join.await
    }

    /// Cancels the poller and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] if the task panicked or was aborted.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel();
        self.join().await
    }
}

/// Returned by [`EventPoller::start`](crate::EventPoller::start): the stream of execution contexts
/// plus the poller's [`PollerControl`].
///
/// Dropping the stream stops the poller at its next emission.
#[derive(Debug)]
pub struct PollerHandle {
    contexts: ReceiverStream<ExecutionContext>,
    control: PollerControl,
}

impl PollerHandle {
    pub(crate) fn new(contexts: ReceiverStream<ExecutionContext>, control: PollerControl) -> Self {
        Self { contexts, control }
    }

    /// The ordered stream of execution contexts.
    pub fn contexts(&mut self) -> &mut ReceiverStream<ExecutionContext> {
        &mut self.contexts
    }

    #[must_use]
    pub fn control(&self) -> &PollerControl {
        &self.control
    }

    /// Separates the stream from the control side, e.g. to move the stream into an alert task.
    #[must_use]
    pub fn split(self) -> (ReceiverStream<ExecutionContext>, PollerControl) {
        (self.contexts, self.control)
    }
}
