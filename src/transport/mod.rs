//! The boundary to the store's wire protocol.
//!
//! Everything above this module only relies on the two call shapes of
//! [`Transport`], which keeps the retry and watch logic independent of how
//! requests are encoded.

mod http;

pub use http::HttpTransport;

use std::future::Future;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::operation::{Operation, Polled, Response};
use crate::Result;

pub trait Transport: Send + Sync + 'static {
    /// Issue a one-shot request (get, set or delete) to `endpoint`.
    ///
    /// Must give up with a [`crate::Error::Transport`] once `timeout` has
    /// elapsed. [`crate::OperationKind::WatchNext`] is not a one-shot request
    /// and is refused with [`crate::Error::UnsupportedOperation`].
    fn call(
        &self,
        operation: &Operation,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> impl Future<Output = Result<Response>> + Send;

    /// Long-poll `endpoint` for the next change of `key` at or after
    /// `wait_index`.
    ///
    /// Returns [`Polled::Quiet`] when `window` elapses without a change: the
    /// endpoint is fine, there was just nothing to report.
    fn watch_next(
        &self,
        key: &str,
        wait_index: Option<u64>,
        endpoint: &Endpoint,
        window: Duration,
    ) -> impl Future<Output = Result<Polled>> + Send;
}
