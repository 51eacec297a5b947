use std::fmt;

use crate::operation::OperationKind;

/// Broad cause of a [`Error::Transport`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request or its response headers did not arrive in time.
    Timeout,

    /// The endpoint could not be connected to (refused, DNS failure, reset).
    ConnectionRefused,

    /// The endpoint answered but said it cannot serve right now, e.g. during
    /// a leader election.
    Unavailable,

    /// The endpoint answered with something that is not a store reply.
    Decode,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionRefused => write!(f, "connection failed"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Decode => write!(f, "undecodable response"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error on {endpoint} ({kind}): {message}")]
    Transport {
        endpoint: String,
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Precondition failed for {key}: {message}")]
    Conflict { key: String, message: String },

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("No endpoints configured")]
    PoolExhausted,

    #[error("Watch history for {key} has been compacted: {message}")]
    Compacted { key: String, message: String },

    #[error("Store rejected request with code {code}: {message}")]
    Rejected { code: u64, message: String },

    #[error("{0:?} is not a one-shot request")]
    UnsupportedOperation(OperationKind),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Unable to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Unable to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unable to setup tracing: {0}")]
    TracingError(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Unable to forward log records: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),
}

impl Error {
    /// Only transport-level failures are worth trying again, possibly against
    /// another endpoint. Everything else is a definitive answer from the store
    /// or a local misconfiguration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub(crate) fn transport(
        endpoint: impl fmt::Display,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Error::Transport {
            endpoint: endpoint.to_string(),
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        let retryable = Error::transport(
            "http://127.0.0.1:2379",
            TransportErrorKind::Timeout,
            "deadline elapsed",
        );
        assert!(retryable.is_retryable());

        let definitive = [
            Error::NotFound { key: "k".into() },
            Error::Conflict {
                key: "k".into(),
                message: "[1 != 2]".into(),
            },
            Error::Permission("revoked".into()),
            Error::PoolExhausted,
            Error::Compacted {
                key: "k".into(),
                message: "cleared".into(),
            },
            Error::Rejected {
                code: 102,
                message: "Not a file".into(),
            },
            Error::InvalidEndpoint("ftp://x".into()),
            Error::UnsupportedOperation(OperationKind::WatchNext),
        ];
        for e in definitive {
            assert!(!e.is_retryable(), "{e} should not be retryable");
        }
    }

    #[test]
    fn transport_error_names_the_endpoint() {
        let e = Error::transport(
            "http://10.0.0.1:2379",
            TransportErrorKind::ConnectionRefused,
            "connection refused",
        );
        assert_eq!(
            e.to_string(),
            "transport error on http://10.0.0.1:2379 (connection failed): connection refused"
        );
    }
}
