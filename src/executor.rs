use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{BackoffPolicy, ClientConfig};
use crate::endpoint::Endpoint;
use crate::operation::{Operation, OperationKind, Polled, Response};
use crate::pool::EndpointPool;
use crate::transport::Transport;
use crate::Result;

/// Runs operations against the [`EndpointPool`], retrying transport failures
/// on other endpoints with exponential backoff. An endpoint that already
/// failed during a request is only tried again once every other endpoint has
/// been tried as well.
///
/// Every answer from an endpoint, including a definitive error such as
/// [`crate::Error::NotFound`], counts as a success for the endpoint's health.
/// Only errors for which [`crate::Error::is_retryable`] holds are retried;
/// everything else is returned on first occurrence.
pub struct Executor<T> {
    pool: Arc<EndpointPool>,
    transport: Arc<T>,
    retry: BackoffPolicy,
    request_timeout: Duration,
    watch_window: Duration,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            transport: self.transport.clone(),
            retry: self.retry,
            request_timeout: self.request_timeout,
            watch_window: self.watch_window,
        }
    }
}

impl<T: Transport> Executor<T> {
    pub fn new(pool: Arc<EndpointPool>, transport: Arc<T>, config: &ClientConfig) -> Self {
        Self {
            pool,
            transport,
            retry: config.retry,
            request_timeout: config.request_timeout(),
            watch_window: config.watch_window(),
        }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Run `operation` to completion.
    ///
    /// For [`OperationKind::WatchNext`] this keeps long-polling through quiet
    /// windows until a change arrives, moving the wait index forward to the
    /// store index each quiet window reports.
    pub async fn execute(&self, operation: &Operation) -> Result<Response> {
        if operation.kind == OperationKind::WatchNext {
            let mut operation = operation.clone();
            loop {
                match self.poll(&operation).await? {
                    Polled::Change(response) => return Ok(response),
                    Polled::Quiet {
                        store_index: Some(index),
                    } => {
                        let next = index.saturating_add(1);
                        if operation.wait_index.map_or(true, |wait| next > wait) {
                            operation.wait_index = Some(next);
                        }
                    }
                    Polled::Quiet { store_index: None } => {}
                }
            }
        }

        self.with_retry(operation, |endpoint| async move {
            self.transport
                .call(operation, &endpoint, self.request_timeout)
                .await
        })
        .await
    }

    /// One long-poll for the change `operation` waits on.
    pub async fn poll(&self, operation: &Operation) -> Result<Polled> {
        self.with_retry(operation, |endpoint| async move {
            self.transport
                .watch_next(
                    &operation.key,
                    operation.wait_index,
                    &endpoint,
                    self.watch_window,
                )
                .await
        })
        .await
    }

    async fn with_retry<R, F, Fut>(&self, operation: &Operation, call: F) -> Result<R>
    where
        F: Fn(Endpoint) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut attempts = 0;
        let mut tried: Vec<Endpoint> = Vec::new();
        loop {
            let endpoint = self.pool.select_endpoint_excluding(&tried);
            attempts += 1;
            debug!(%endpoint, attempt = attempts, kind = ?operation.kind, key = %operation.key, "Executing");

            match call(endpoint.clone()).await {
                Ok(reply) => {
                    self.pool.report_success(&endpoint);
                    return Ok(reply);
                }
                Err(e) if e.is_retryable() => {
                    self.pool.report_failure(&endpoint);
                    if self.retry.exhausted(attempts) {
                        info!(attempts, key = %operation.key, "Giving up");
                        return Err(e);
                    }
                    if !tried.contains(&endpoint) {
                        tried.push(endpoint.clone());
                    }
                    let delay = self.retry.delay(u32::try_from(attempts - 1).unwrap_or(u32::MAX));
                    debug!(%endpoint, error = %e, ?delay, "Retrying on next endpoint");
                    sleep(delay).await;
                }
                Err(e) => {
                    self.pool.report_success(&endpoint);
                    return Err(e);
                }
            }
        }
    }
}
