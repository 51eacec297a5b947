use std::sync::Arc;

use clap::Subcommand;

use crate::config::ClientConfig;
use crate::cursor::WatchCursor;
use crate::executor::Executor;
use crate::operation::{Operation, Response};
use crate::pool::EndpointPool;
use crate::transport::{HttpTransport, Transport};
use crate::watcher::WatchLoop;
use crate::Result;

/// Actions that can be performed by the client.
#[derive(Debug, Subcommand)]
pub enum Action {
    /// Get and print the value of a key.
    Get {
        #[arg(long, default_value = "key1")]
        key: String,
    },

    /// Set the value of a key.
    Set {
        #[arg(long, default_value = "key1")]
        key: String,

        #[arg(long, default_value = "value1")]
        value: String,

        /// Only write if the key was last modified at this index.
        #[arg(long)]
        prev_index: Option<u64>,
    },

    /// Delete a key.
    Delete {
        #[arg(long, default_value = "key1")]
        key: String,

        /// Only delete if the key was last modified at this index.
        #[arg(long)]
        prev_index: Option<u64>,
    },

    /// Keep running and print every change of a key.
    Watch {
        #[arg(long, default_value = "key1")]
        key: String,

        /// Only report changes after this index. Defaults to changes from now on.
        #[arg(long)]
        after_index: Option<u64>,
    },
}

/// Entry point for talking to the store.
///
/// Owns the endpoint pool shared by every operation and watch started from
/// it. Cloning is cheap and clones share the pool.
pub struct Client<T> {
    executor: Executor<T>,
    config: ClientConfig,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            config: self.config.clone(),
        }
    }
}

impl Client<HttpTransport> {
    /// Client for the endpoints in `config` over HTTP.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Client<T> {
    /// Fails with [`crate::Error::PoolExhausted`] if `config` names no
    /// endpoints.
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        let pool = EndpointPool::new(config.parsed_endpoints()?, config.cooldown())?;
        let executor = Executor::new(Arc::new(pool), Arc::new(transport), &config);
        Ok(Self { executor, config })
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        self.executor.pool()
    }

    pub fn executor(&self) -> &Executor<T> {
        &self.executor
    }

    pub async fn get(&self, key: impl Into<String>) -> Result<Response> {
        self.executor.execute(&Operation::get(key)).await
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<Response> {
        self.executor.execute(&Operation::set(key, value)).await
    }

    /// Set `key` only if it was last modified at `prev_index`, failing with
    /// [`crate::Error::Conflict`] otherwise.
    pub async fn compare_and_set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        prev_index: u64,
    ) -> Result<Response> {
        let operation = Operation::set(key, value).with_prev_index(prev_index);
        self.executor.execute(&operation).await
    }

    pub async fn delete(&self, key: impl Into<String>) -> Result<Response> {
        self.executor.execute(&Operation::delete(key)).await
    }

    pub async fn compare_and_delete(
        &self,
        key: impl Into<String>,
        prev_index: u64,
    ) -> Result<Response> {
        let operation = Operation::delete(key).with_prev_index(prev_index);
        self.executor.execute(&operation).await
    }

    /// Watch `key` for changes after `after_index`, or from now on if `None`.
    /// Nothing happens until [`WatchLoop::run`] is awaited.
    pub fn watch(&self, key: impl Into<String>, after_index: Option<u64>) -> WatchLoop<T> {
        WatchLoop::new(
            self.executor.clone(),
            WatchCursor::new(key, after_index),
            self.config.watch_retry,
        )
    }
}
