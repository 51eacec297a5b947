//! Client configuration.
//!
//! Sources, lowest priority first:
//! 1. Defaults (hardcoded below)
//! 2. Optional TOML file
//! 3. Environment variables prefixed with `KVWATCH__`, e.g.
//!    `KVWATCH__RETRY__MAX_ATTEMPTS=5`
//!
//! The binary applies its command line flags on top of the loaded value.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::endpoint::Endpoint;
use crate::Result;

/// Exponential backoff between attempts.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (0 means unlimited)
    pub max_attempts: usize,

    /// Delay before the first retry (unit: milliseconds)
    pub base_delay_ms: u64,

    /// Factor applied to the delay after every retry
    pub multiplier: u32,

    /// Upper bound for a single delay (unit: milliseconds)
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    /// Delay to wait before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(retry);
        let ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Whether `attempts` already made use up the budget.
    pub fn exhausted(&self, attempts: usize) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }

    /// Per-request retries for get/set/delete.
    pub fn request_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2,
            max_delay_ms: 2_000,
        }
    }

    /// Outer retries of a running watch, which is expected to live forever.
    pub fn watch_default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: 500,
            multiplier: 2,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Store addresses, see [`Endpoint`] for the accepted forms
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Deadline for a single get/set/delete call, and for the response
    /// headers of a watch (unit: milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long one long-poll may stay open waiting for a change before it is
    /// re-issued (unit: milliseconds)
    #[serde(default = "default_watch_window_ms")]
    pub watch_window_ms: u64,

    /// How long a dead endpoint is skipped before it is tried again
    /// (unit: milliseconds)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "BackoffPolicy::request_default")]
    pub retry: BackoffPolicy,

    #[serde(default = "BackoffPolicy::watch_default")]
    pub watch_retry: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            request_timeout_ms: default_request_timeout_ms(),
            watch_window_ms: default_watch_window_ms(),
            cooldown_ms: default_cooldown_ms(),
            retry: BackoffPolicy::request_default(),
            watch_retry: BackoffPolicy::watch_default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from defaults, `path` (if given) and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("KVWATCH")
                .prefix_separator("__")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("endpoints"),
        );
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Parsed form of [`ClientConfig::endpoints`].
    pub fn parsed_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.endpoints
            .iter()
            .map(|s| Endpoint::parse_list(s))
            .collect::<Result<Vec<_>>>()
            .map(|lists| lists.into_iter().flatten().collect())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn watch_window(&self) -> Duration {
        Duration::from_millis(self.watch_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_watch_window_ms() -> u64 {
    60_000
}
fn default_cooldown_ms() -> u64 {
    30_000
}
