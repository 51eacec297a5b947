/// Position of a watch in the key's change history.
///
/// Lives only for one watch invocation; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchCursor {
    key: String,

    /// Index of the last change delivered, or `None` while watching from
    /// "latest" before anything has been seen.
    last_index: Option<u64>,
}

impl WatchCursor {
    /// Start after `last_index`, i.e. the first change delivered will have a
    /// greater index. `None` starts from whatever changes next.
    pub fn new(key: impl Into<String>, last_index: Option<u64>) -> Self {
        Self {
            key: key.into(),
            last_index,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    /// Record that the change at `index` was delivered.
    ///
    /// Indices at or below the current position are ignored, so replays and
    /// out-of-order deliveries never move the cursor backwards. Returns whether
    /// the cursor moved.
    pub fn advance(&mut self, index: u64) -> bool {
        match self.last_index {
            Some(last) if index <= last => false,
            _ => {
                self.last_index = Some(index);
                true
            }
        }
    }

    /// Move up to `index` without delivering anything, after the store has
    /// reported that the key did not change up to there.
    ///
    /// Pins a watch that started from "latest" to a concrete position so that
    /// re-issued polls cannot miss a change landing in between.
    pub fn catch_up(&mut self, index: u64) -> bool {
        self.advance(index)
    }

    /// Whether a change at `index` would be new to this cursor.
    pub fn is_new(&self, index: u64) -> bool {
        self.last_index.map_or(true, |last| index > last)
    }

    /// Index to wait on next: one past the last delivered change, so a resumed
    /// watch neither repeats nor skips anything.
    pub fn resume_from(&self) -> Option<u64> {
        self.last_index.map(|last| last.saturating_add(1))
    }
}
