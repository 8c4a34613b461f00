// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! FIFO queue shared by the logs listener (producer) and the lifecycle loop
//! (consumer).
//!
//! ```text
//!   listener task ──put──> ┌──────────┐ ──get(1)──> flush coordinator
//!                          │ LogQueue │
//!                          └──────────┘
//! ```
//!
//! Every operation takes the internal lock for its whole duration, so a
//! `put` racing a `get` observes either the queue before or after the other
//! call, never a partial state. `get` never waits for entries to arrive.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// One raw log record, or a pre-batched set of records, as delivered by the
/// host.
#[derive(Clone, PartialEq, Eq)]
pub struct LogEntry(String);

impl LogEntry {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self(content.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, marker: &str) -> bool {
        self.0.contains(marker)
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for LogEntry {
    fn from(content: String) -> Self {
        Self(content)
    }
}

impl From<&str> for LogEntry {
    fn from(content: &str) -> Self {
        Self(content.to_string())
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogEntry({} bytes)", self.0.len())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("log queue has been disposed")]
    Disposed,
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<LogEntry>,
    disposed: bool,
}

#[derive(Debug)]
pub struct LogQueue {
    inner: Mutex<Inner>,
}

impl LogQueue {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                disposed: false,
            }),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an entry at the back of the queue.
    pub fn put(&self, entry: impl Into<LogEntry>) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(QueueError::Disposed);
        }
        inner.entries.push_back(entry.into());
        Ok(())
    }

    /// Removes and returns up to `count` entries from the front of the queue.
    ///
    /// Returns an empty vector when nothing is queued.
    pub fn get(&self, count: usize) -> Result<Vec<LogEntry>, QueueError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(QueueError::Disposed);
        }
        let take = count.min(inner.entries.len());
        Ok(inner.entries.drain(..take).collect())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Discards every pending entry and rejects all further operations.
    ///
    /// Returns the number of entries that were discarded.
    pub fn dispose(&self) -> usize {
        let mut inner = self.lock();
        inner.disposed = true;
        let dropped = inner.entries.len();
        inner.entries.clear();
        dropped
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::with_capacity(crate::logs::constants::INITIAL_QUEUE_CAPACITY)
    }
}
