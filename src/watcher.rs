use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackoffPolicy;
use crate::cursor::WatchCursor;
use crate::executor::Executor;
use crate::operation::{Operation, Polled, Response};
use crate::transport::Transport;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Built, not yet started.
    Idle,

    /// A long-poll for the next change is outstanding, or the loop is backing
    /// off before issuing the next one.
    Waiting,

    /// Handing a change to the consumer.
    Delivering,

    /// Cancelled, or hit an error that retrying cannot fix.
    Stopped,
}

/// Follows the changes of one key for as long as it is allowed to.
///
/// Transport failures that survive the executor's own retries are retried
/// here again, with a separate backoff, for as long as the watch retry
/// policy allows (by default forever). Any other error stops the loop and is
/// returned from [`WatchLoop::run`].
pub struct WatchLoop<T> {
    executor: Executor<T>,
    cursor: WatchCursor,
    retry: BackoffPolicy,
    state: WatchState,
}

impl<T: Transport> WatchLoop<T> {
    pub fn new(executor: Executor<T>, cursor: WatchCursor, retry: BackoffPolicy) -> Self {
        Self {
            executor,
            cursor,
            retry,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn cursor(&self) -> &WatchCursor {
        &self.cursor
    }

    /// Deliver every new change of the key to `consumer` until `cancel` fires
    /// or a non-retryable error occurs. That error is returned, not logged.
    ///
    /// A watch from "latest" is pinned to the store index reported by its
    /// first quiet window, so later polls wait from a concrete index.
    ///
    /// Cancellation interrupts an outstanding long-poll as well as a backoff
    /// sleep, and makes this return `Ok(())`.
    pub async fn run<F>(&mut self, mut consumer: F, cancel: CancellationToken) -> Result<()>
    where
        F: FnMut(&Response),
    {
        info!(key = self.cursor.key(), from = ?self.cursor.resume_from(), "Watch started");
        // Consecutive failures since the last successful poll.
        let mut failures: usize = 0;

        loop {
            self.state = WatchState::Waiting;
            let operation = Operation::watch_next(self.cursor.key(), self.cursor.resume_from());

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                polled = self.executor.poll(&operation) => Some(polled),
            };
            let Some(polled) = polled else {
                self.stop("cancelled");
                return Ok(());
            };

            match polled {
                Ok(Polled::Change(response)) => {
                    failures = 0;
                    self.deliver(response, &mut consumer);
                }
                Ok(Polled::Quiet { store_index }) => {
                    failures = 0;
                    if let Some(index) = store_index {
                        self.cursor.catch_up(index);
                    }
                    debug!(key = self.cursor.key(), ?store_index, "No change within watch window");
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if self.retry.exhausted(failures) {
                        self.stop("retries exhausted");
                        return Err(e);
                    }
                    let delay = self
                        .retry
                        .delay(u32::try_from(failures - 1).unwrap_or(u32::MAX));
                    warn!(key = self.cursor.key(), error = %e, ?delay, "Transient watch failure, retrying");

                    let cancelled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => true,
                        _ = sleep(delay) => false,
                    };
                    if cancelled {
                        self.stop("cancelled during backoff");
                        return Ok(());
                    }
                }
                Err(e) => {
                    self.stop("non-retryable error");
                    return Err(e);
                }
            }
        }
    }

    fn deliver<F>(&mut self, response: Response, consumer: &mut F)
    where
        F: FnMut(&Response),
    {
        if !self.cursor.is_new(response.index) {
            debug!(
                key = self.cursor.key(),
                index = response.index,
                last = ?self.cursor.last_index(),
                "Skipping already delivered change"
            );
            return;
        }
        self.state = WatchState::Delivering;
        consumer(&response);
        self.cursor.advance(response.index);
    }

    fn stop(&mut self, reason: &str) {
        info!(key = self.cursor.key(), last_index = ?self.cursor.last_index(), reason, "Watch stopped");
        self.state = WatchState::Stopped;
    }
}
