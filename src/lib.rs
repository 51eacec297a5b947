//! Client core for a replicated key-value store: get, set and delete with
//! endpoint failover, plus long-running watches that survive transient
//! network failures.
//!
//! ```rust,ignore
//! let client = kvwatch::Client::connect(kvwatch::ClientConfig::default())?;
//! client.set("key1", "value1").await?;
//! let response = client.get("key1").await?;
//!
//! let cancel = tokio_util::sync::CancellationToken::new();
//! client
//!     .watch("key1", Some(response.index))
//!     .run(|change| println!("{:?}", change.value), cancel)
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod cursor;
pub mod endpoint;
mod error;
pub mod executor;
pub mod logging;
pub mod operation;
pub mod pool;
pub mod transport;
pub mod watcher;

pub use client::Client;
pub use config::{BackoffPolicy, ClientConfig};
pub use cursor::WatchCursor;
pub use endpoint::{Endpoint, Health, Scheme};
pub use error::{Error, TransportErrorKind};
pub use executor::Executor;
pub use operation::{Operation, OperationKind, Polled, Response};
pub use pool::EndpointPool;
pub use transport::{HttpTransport, Transport};
pub use watcher::{WatchLoop, WatchState};

pub type Result<T> = std::result::Result<T, Error>;
