use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use super::Transport;
use crate::endpoint::Endpoint;
use crate::error::TransportErrorKind;
use crate::operation::{Operation, OperationKind, Polled, Response};
use crate::{Error, Result};

/// Store-wide index at the time a request was accepted. On a long-poll it is
/// sent with the headers, before the body is held back.
const STORE_INDEX_HEADER: &str = "x-etcd-index";

/// [`Transport`] speaking the store's v2 keys API over HTTP.
///
/// Keys map to `/v2/keys/<key>`. Watches are plain long-polls
/// (`?wait=true&waitIndex=N`): the store flushes response headers right away
/// and holds the body back until a change happens.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,

    /// Deadline for the response headers of a long-poll. The body itself may
    /// take up to the watch window.
    header_timeout: Duration,
}

/// Successful keys API reply.
#[derive(Debug, Deserialize)]
struct KeysReply {
    action: String,
    node: Option<Node>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    key: Option<String>,
    value: Option<String>,
    #[serde(default)]
    modified_index: u64,
}

/// Error body the store sends alongside a non-2xx status.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreError {
    error_code: u64,
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(request_timeout).build()?;
        Ok(Self {
            client,
            header_timeout: request_timeout,
        })
    }

    fn key_url(endpoint: &Endpoint, key: &str) -> Result<Url> {
        let invalid = || Error::InvalidEndpoint(endpoint.to_string());
        let mut url = Url::parse(&endpoint.to_string()).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .clear()
            .extend(["v2", "keys"])
            .extend(key.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

impl Transport for HttpTransport {
    async fn call(
        &self,
        operation: &Operation,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Response> {
        let url = Self::key_url(endpoint, &operation.key)?;
        let mut request = match operation.kind {
            OperationKind::Get => self.client.get(url),
            OperationKind::Set => {
                let value = operation.value.as_deref().unwrap_or_default();
                self.client.put(url).form(&[("value", value)])
            }
            OperationKind::Delete => self.client.delete(url),
            OperationKind::WatchNext => return Err(Error::UnsupportedOperation(operation.kind)),
        };
        if let Some(prev_index) = operation.prev_index {
            request = request.query(&[("prevIndex", prev_index)]);
        }

        debug!(%endpoint, kind = ?operation.kind, key = %operation.key, "Sending request");
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(endpoint, e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| classify(endpoint, e))?;
        trace!(%endpoint, %status, body = %body, "Received reply");
        decode_reply(endpoint, &operation.key, status, &body)
    }

    async fn watch_next(
        &self,
        key: &str,
        wait_index: Option<u64>,
        endpoint: &Endpoint,
        window: Duration,
    ) -> Result<Polled> {
        let url = Self::key_url(endpoint, key)?;
        let mut request = self.client.get(url).query(&[("wait", "true")]);
        if let Some(index) = wait_index {
            request = request.query(&[("waitIndex", index)]);
        }

        debug!(%endpoint, key, ?wait_index, "Long-polling for next change");
        let response = match tokio::time::timeout(self.header_timeout, request.send()).await {
            Ok(sent) => sent.map_err(|e| classify(endpoint, e))?,
            Err(_) => {
                return Err(Error::transport(
                    endpoint,
                    TransportErrorKind::Timeout,
                    format!("no response headers within {:?}", self.header_timeout),
                ))
            }
        };
        let status = response.status();
        let store_index = response
            .headers()
            .get(STORE_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = match tokio::time::timeout(window, response.text()).await {
            Ok(body) => body.map_err(|e| classify(endpoint, e))?,
            Err(_) => {
                trace!(%endpoint, key, ?store_index, "Watch window elapsed without a change");
                return Ok(Polled::Quiet { store_index });
            }
        };
        decode_reply(endpoint, key, status, &body).map(Polled::Change)
    }
}

fn classify(endpoint: &Endpoint, e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.is_decode() {
        TransportErrorKind::Decode
    } else {
        TransportErrorKind::ConnectionRefused
    };
    Error::transport(endpoint, kind, e.to_string())
}

fn decode_reply(endpoint: &Endpoint, key: &str, status: StatusCode, body: &str) -> Result<Response> {
    if status.is_success() {
        let reply: KeysReply = serde_json::from_str(body)
            .map_err(|e| Error::transport(endpoint, TransportErrorKind::Decode, e.to_string()))?;
        let node = reply.node.ok_or_else(|| {
            Error::transport(endpoint, TransportErrorKind::Decode, "reply without a node")
        })?;
        return Ok(Response {
            key: node.key.unwrap_or_else(|| key.to_string()),
            value: node.value,
            index: node.modified_index,
            action: reply.action,
        });
    }

    match serde_json::from_str::<StoreError>(body) {
        Ok(err) => Err(store_error(endpoint, key, err)),
        Err(_) if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => Err(
            Error::Permission(format!("{endpoint} answered {status}")),
        ),
        Err(_) if status.is_server_error() => Err(Error::transport(
            endpoint,
            TransportErrorKind::Unavailable,
            status.to_string(),
        )),
        Err(e) => Err(Error::transport(
            endpoint,
            TransportErrorKind::Decode,
            format!("{status}: {e}"),
        )),
    }
}

fn store_error(endpoint: &Endpoint, key: &str, err: StoreError) -> Error {
    let message = match err.cause {
        Some(cause) if !cause.is_empty() => format!("{} ({cause})", err.message),
        _ => err.message,
    };
    match err.error_code {
        100 => Error::NotFound {
            key: key.to_string(),
        },
        // compare failed, node already exists
        101 | 105 => Error::Conflict {
            key: key.to_string(),
            message,
        },
        110 => Error::Permission(message),
        401 => Error::Compacted {
            key: key.to_string(),
            message,
        },
        // raft internal error, leader election in progress
        300 | 301 => Error::transport(endpoint, TransportErrorKind::Unavailable, message),
        code => Error::Rejected { code, message },
    }
}
