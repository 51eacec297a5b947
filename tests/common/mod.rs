#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kvwatch::{
    BackoffPolicy, ClientConfig, Endpoint, Error, Operation, OperationKind, Polled, Response,
    Transport, TransportErrorKind,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;

pub fn endpoints(n: u16) -> Vec<String> {
    (0..n).map(|i| format!("http://127.0.0.1:{}", 2379 + i)).collect()
}

pub fn endpoint(i: u16) -> Endpoint {
    format!("http://127.0.0.1:{}", 2379 + i).parse().unwrap()
}

/// Config with the stock policies for `n` local endpoints.
pub fn config(n: u16) -> ClientConfig {
    ClientConfig {
        endpoints: endpoints(n),
        ..ClientConfig::default()
    }
}

pub fn timeout_error(endpoint: &Endpoint) -> Error {
    Error::Transport {
        endpoint: endpoint.to_string(),
        kind: TransportErrorKind::Timeout,
        message: "simulated timeout".into(),
    }
}

pub fn change(key: &str, value: &str, index: u64) -> Polled {
    Polled::Change(Response {
        key: key.to_string(),
        value: Some(value.to_string()),
        index,
        action: "set".to_string(),
    })
}

pub fn quiet(store_index: Option<u64>) -> Polled {
    Polled::Quiet { store_index }
}

/// In-process store with per-endpoint fault injection. All endpoints see the
/// same data, as if replication were instant.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: Mutex<StoreState>,
    changed: Notify,
    down: Mutex<HashSet<Endpoint>>,
    calls: Mutex<Vec<Endpoint>>,
    latency: Mutex<Duration>,
}

#[derive(Default)]
struct StoreState {
    index: u64,
    values: HashMap<String, (String, u64)>,
    history: Vec<Response>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, endpoint: &Endpoint, down: bool) {
        let mut set = self.inner.down.lock();
        if down {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    /// Delay every request by `latency` before it reaches the store.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        self.inner.calls.lock().clone()
    }

    pub fn calls_to(&self, endpoint: &Endpoint) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|e| *e == endpoint)
            .count()
    }

    /// Write directly, bypassing endpoints and fault injection.
    pub fn insert(&self, key: &str, value: &str) -> u64 {
        self.apply(&Operation::set(key, value)).unwrap().index
    }

    async fn reach(&self, endpoint: &Endpoint) -> kvwatch::Result<()> {
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.inner.calls.lock().push(endpoint.clone());
        if self.inner.down.lock().contains(endpoint) {
            return Err(timeout_error(endpoint));
        }
        Ok(())
    }

    fn apply(&self, operation: &Operation) -> kvwatch::Result<Response> {
        let key = operation.key.clone();
        let mut state = self.inner.state.lock();
        let current = state.values.get(&key).cloned();

        if let Some(prev_index) = operation.prev_index {
            match &current {
                None => return Err(Error::NotFound { key }),
                Some((_, modified)) if *modified != prev_index => {
                    return Err(Error::Conflict {
                        key,
                        message: format!("[{prev_index} != {modified}]"),
                    })
                }
                Some(_) => {}
            }
        }

        let response = match operation.kind {
            OperationKind::Get => {
                let (value, index) = current.ok_or(Error::NotFound { key: key.clone() })?;
                return Ok(Response {
                    key,
                    value: Some(value),
                    index,
                    action: "get".into(),
                });
            }
            OperationKind::Set => {
                state.index += 1;
                let index = state.index;
                let value = operation.value.clone().unwrap_or_default();
                state.values.insert(key.clone(), (value.clone(), index));
                Response {
                    key,
                    value: Some(value),
                    index,
                    action: if operation.prev_index.is_some() {
                        "compareAndSwap".into()
                    } else {
                        "set".into()
                    },
                }
            }
            OperationKind::Delete => {
                if current.is_none() {
                    return Err(Error::NotFound { key });
                }
                state.index += 1;
                let index = state.index;
                state.values.remove(&key);
                Response {
                    key,
                    value: None,
                    index,
                    action: if operation.prev_index.is_some() {
                        "compareAndDelete".into()
                    } else {
                        "delete".into()
                    },
                }
            }
            OperationKind::WatchNext => return Err(Error::UnsupportedOperation(operation.kind)),
        };
        state.history.push(response.clone());
        drop(state);
        self.inner.changed.notify_waiters();
        Ok(response)
    }
}

impl Transport for MemoryTransport {
    async fn call(
        &self,
        operation: &Operation,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> kvwatch::Result<Response> {
        if operation.kind == OperationKind::WatchNext {
            return Err(Error::UnsupportedOperation(operation.kind));
        }
        self.reach(endpoint).await?;
        self.apply(operation)
    }

    async fn watch_next(
        &self,
        key: &str,
        wait_index: Option<u64>,
        endpoint: &Endpoint,
        window: Duration,
    ) -> kvwatch::Result<Polled> {
        self.reach(endpoint).await?;
        let deadline = Instant::now() + window;
        let store_index = self.inner.state.lock().index;
        let since = wait_index.unwrap_or(store_index + 1);

        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let found = {
                let state = self.inner.state.lock();
                state
                    .history
                    .iter()
                    .find(|r| r.key == key && r.index >= since)
                    .cloned()
            };
            if let Some(found) = found {
                return Ok(Polled::Change(found));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(quiet(Some(store_index)));
            }
        }
    }
}

/// Transport that replays a fixed list of watch results, then hangs like a
/// long-poll on a key that never changes.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<ScriptedInner>,
}

#[derive(Default)]
struct ScriptedInner {
    replies: Mutex<VecDeque<kvwatch::Result<Polled>>>,
    wait_indices: Mutex<Vec<Option<u64>>>,
    polls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<kvwatch::Result<Polled>>) -> Self {
        let transport = Self::default();
        *transport.inner.replies.lock() = replies.into();
        transport
    }

    pub fn polls(&self) -> usize {
        self.inner.polls.load(Ordering::SeqCst)
    }

    pub fn wait_indices(&self) -> Vec<Option<u64>> {
        self.inner.wait_indices.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    async fn call(
        &self,
        operation: &Operation,
        _endpoint: &Endpoint,
        _timeout: Duration,
    ) -> kvwatch::Result<Response> {
        Err(Error::Rejected {
            code: 0,
            message: format!("scripted transport only watches, got {:?}", operation.kind),
        })
    }

    async fn watch_next(
        &self,
        _key: &str,
        wait_index: Option<u64>,
        _endpoint: &Endpoint,
        _window: Duration,
    ) -> kvwatch::Result<Polled> {
        self.inner.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.wait_indices.lock().push(wait_index);
        let next = self.inner.replies.lock().pop_front();
        match next {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }
}

/// Policy that tries exactly once, so every scripted reply maps to one poll.
pub fn single_attempt() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 1,
        ..BackoffPolicy::request_default()
    }
}

/// Reply in the shape of the store's HTTP API, closing the connection after.
pub fn http_reply(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nX-Etcd-Index: 9\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Bind a local HTTP server that answers one connection per entry of
/// `replies`, in order. Returns its address and the requests it received.
pub async fn serve_http(replies: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));

    let seen = requests.clone();
    tokio::spawn(async move {
        for reply in replies {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            seen.lock().push(request);
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    });
    (address, requests)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&data);
        if let Some(end) = text.find("\r\n\r\n") {
            let body_len = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}
