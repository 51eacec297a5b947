use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Get,
    Set,
    Delete,
    WatchNext,
}

/// A single request against the store.
///
/// Built with the constructors below and not modified afterwards, the executor
/// only ever borrows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub key: String,
    pub value: Option<String>,

    /// For [`OperationKind::WatchNext`]: deliver the first change at or after
    /// this index. `None` waits for the next change from now on.
    pub wait_index: Option<u64>,

    /// For writes: only apply if the key was last modified at this index.
    pub prev_index: Option<u64>,
}

impl Operation {
    fn new(kind: OperationKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: None,
            wait_index: None,
            prev_index: None,
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::new(OperationKind::Get, key)
    }

    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new(OperationKind::Set, key)
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, key)
    }

    pub fn watch_next(key: impl Into<String>, wait_index: Option<u64>) -> Self {
        Self {
            wait_index,
            ..Self::new(OperationKind::WatchNext, key)
        }
    }

    /// Make a write conditional on the key's current modification index.
    pub fn with_prev_index(mut self, index: u64) -> Self {
        self.prev_index = Some(index);
        self
    }
}

/// What the store answered.
///
/// `value` is `None` when the key no longer holds one, e.g. for a delete or
/// an expiry observed by a watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub key: String,
    pub value: Option<String>,

    /// Modification index of the key after this operation.
    pub index: u64,

    /// The store's name for what happened, such as `get`, `set`, `delete`,
    /// `expire` or `compareAndSwap`.
    pub action: String,
}

/// Outcome of one long-poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled {
    /// The first change of the key at or after the requested index.
    Change(Response),

    /// The watch window passed without a change of the key.
    ///
    /// `store_index` is the store-wide index the poll started from, if the
    /// store reported one. The key did not change between the requested
    /// index and this one, so the next poll may wait from `store_index + 1`.
    Quiet { store_index: Option<u64> },
}

impl Response {
    pub fn is_removal(&self) -> bool {
        matches!(
            self.action.as_str(),
            "delete" | "expire" | "compareAndDelete"
        )
    }
}
