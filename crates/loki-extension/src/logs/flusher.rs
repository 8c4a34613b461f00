// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains the log queue into the sink at lifecycle synchronization points.
//!
//! # Stop conditions
//!
//! | mode      | stops when                                                  |
//! |-----------|-------------------------------------------------------------|
//! | non-force | queue is empty, or the entry just forwarded holds the marker |
//! | force     | queue is empty                                              |
//!
//! Under a non-forced flush everything queued after the runtime-done marker
//! belongs to an invocation the producer buffered ahead of schedule; it is
//! left for the next wake-up instead of being chased while the queue keeps
//! refilling. A flush never waits for entries that are not queued yet, so a
//! lost marker only means the pass ends once the queue is empty.
//!
//! A failed push aborts the pass. The failed entry is not re-queued and
//! everything behind it stays queued for the next pass.

use std::sync::Arc;

use tracing::{debug, error};

use crate::logs::constants::RUNTIME_DONE;
use crate::logs::queue::LogQueue;
use crate::logs::sink::Sink;

/// How a flush pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// The queue was empty.
    Drained { forwarded: usize },
    /// A non-forced pass forwarded the runtime-done marker.
    MarkerReached { forwarded: usize },
    /// The queue or the sink failed. The error has already been logged.
    Aborted { forwarded: usize },
}

#[allow(clippy::module_name_repetitions)]
pub struct FlushCoordinator {
    queue: Arc<LogQueue>,
    sink: Arc<dyn Sink>,
}

impl FlushCoordinator {
    #[must_use]
    pub fn new(queue: Arc<LogQueue>, sink: Arc<dyn Sink>) -> Self {
        Self { queue, sink }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<LogQueue> {
        &self.queue
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    /// Runs one flush pass. Taking `&mut self` keeps passes from overlapping.
    pub async fn flush(&mut self, force: bool) -> FlushStatus {
        let mut forwarded = 0;

        let status = loop {
            let entry = match self.queue.get(1) {
                Ok(mut entries) => match entries.pop() {
                    Some(entry) => entry,
                    None => break FlushStatus::Drained { forwarded },
                },
                Err(e) => {
                    error!("LOGS | Failed to read from log queue: {e}");
                    return FlushStatus::Aborted { forwarded };
                }
            };

            let marker_seen = entry.contains(RUNTIME_DONE);
            if let Err(e) = self.sink.push_log(entry.into_inner()).await {
                error!("LOGS | Failed to push log entry, aborting flush: {e}");
                return FlushStatus::Aborted { forwarded };
            }
            forwarded += 1;

            if marker_seen && !force {
                break FlushStatus::MarkerReached { forwarded };
            }
        };

        if let Err(e) = self.sink.sync().await {
            error!("LOGS | Failed to sync sink after flush: {e}");
            return FlushStatus::Aborted { forwarded };
        }

        debug!(
            "LOGS | Flush pass finished (force={force}): {status:?}, {} entries still queued",
            self.queue.len()
        );
        status
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logs::sink::SinkError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Records every line it accepts; optionally fails the n-th push (1-based).
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) lines: Mutex<Vec<String>>,
        pub(crate) attempts: AtomicUsize,
        pub(crate) syncs: AtomicUsize,
        pub(crate) shutdowns: AtomicUsize,
        pub(crate) fail_on: Option<usize>,
    }

    impl RecordingSink {
        pub(crate) fn failing_on(attempt: usize) -> Self {
            Self {
                fail_on: Some(attempt),
                ..Default::default()
            }
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn push_log(&self, line: String) -> Result<(), SinkError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(attempt) {
                return Err(SinkError::Transport {
                    attempts: 1,
                    message: "connection refused".to_string(),
                });
            }
            self.lines.lock().unwrap().push(line);
            Ok(())
        }

        async fn sync(&self) -> Result<(), SinkError> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), SinkError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup(lines: &[&str], sink: RecordingSink) -> (FlushCoordinator, Arc<RecordingSink>) {
        let queue = Arc::new(LogQueue::default());
        for line in lines {
            queue.put(*line).unwrap();
        }
        let sink = Arc::new(sink);
        (FlushCoordinator::new(queue, sink.clone()), sink)
    }

    fn queued(coordinator: &FlushCoordinator) -> Vec<String> {
        coordinator
            .queue()
            .get(usize::MAX)
            .unwrap()
            .into_iter()
            .map(|e| e.into_inner())
            .collect()
    }

    const DONE: &str = r#"[{"type":"platform.runtimeDone","record":{"requestId":"1"}}]"#;

    #[tokio::test]
    async fn test_non_forced_flush_stops_after_marker() {
        let (mut coordinator, sink) = setup(&["a", "b", DONE, "c"], RecordingSink::default());

        let status = coordinator.flush(false).await;

        assert_eq!(status, FlushStatus::MarkerReached { forwarded: 3 });
        assert_eq!(sink.lines(), vec!["a", "b", DONE]);
        assert_eq!(coordinator.queue().len(), 1);

        let status = coordinator.flush(true).await;
        assert_eq!(status, FlushStatus::Drained { forwarded: 1 });
        assert_eq!(sink.lines(), vec!["a", "b", DONE, "c"]);
    }

    #[tokio::test]
    async fn test_non_forced_flush_without_marker_drains_and_returns() {
        let (mut coordinator, sink) = setup(&["a", "b", "c"], RecordingSink::default());

        let status = coordinator.flush(false).await;

        assert_eq!(status, FlushStatus::Drained { forwarded: 3 });
        assert_eq!(sink.lines(), vec!["a", "b", "c"]);
        assert!(coordinator.queue().is_empty());
    }

    #[tokio::test]
    async fn test_forced_flush_ignores_marker() {
        let (mut coordinator, sink) = setup(&[DONE, "a", DONE, "b"], RecordingSink::default());

        let status = coordinator.flush(true).await;

        assert_eq!(status, FlushStatus::Drained { forwarded: 4 });
        assert_eq!(sink.lines(), vec![DONE, "a", DONE, "b"]);
        assert!(coordinator.queue().is_empty());
    }

    #[tokio::test]
    async fn test_flush_on_empty_queue_only_syncs() {
        let (mut coordinator, sink) = setup(&[], RecordingSink::default());

        assert_eq!(coordinator.flush(false).await, FlushStatus::Drained { forwarded: 0 });
        assert!(sink.lines().is_empty());
        assert_eq!(sink.syncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_push_failure_aborts_and_keeps_remaining_entries() {
        let (mut coordinator, sink) = setup(&["1", "2", "3", "4"], RecordingSink::failing_on(2));

        let status = coordinator.flush(false).await;

        assert_eq!(status, FlushStatus::Aborted { forwarded: 1 });
        assert_eq!(sink.lines(), vec!["1"]);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sink.syncs.load(Ordering::SeqCst), 0);
        assert_eq!(queued(&coordinator), vec!["3", "4"]);
        assert!(logs_contain("Failed to push log entry, aborting flush"));
    }

    #[tokio::test]
    async fn test_entries_are_delivered_once_across_passes() {
        let (mut coordinator, sink) = setup(&["a", DONE], RecordingSink::default());
        coordinator.flush(false).await;

        for line in ["b", DONE, "c"] {
            coordinator.queue().put(line).unwrap();
        }
        coordinator.flush(false).await;
        coordinator.flush(true).await;
        coordinator.flush(true).await;

        assert_eq!(sink.lines(), vec!["a", DONE, "b", DONE, "c"]);
    }

    #[tokio::test]
    async fn test_flushes_interleaved_with_producer_keep_order_without_duplicates() {
        let (mut coordinator, sink) = setup(&[], RecordingSink::default());
        let expected: Vec<String> = (0..2_000)
            .map(|i| {
                if i % 97 == 0 {
                    format!("{i} {RUNTIME_DONE}")
                } else {
                    i.to_string()
                }
            })
            .collect();

        let queue = Arc::clone(coordinator.queue());
        let lines = expected.clone();
        let producer = std::thread::spawn(move || {
            for (i, line) in lines.into_iter().enumerate() {
                queue.put(line).unwrap();
                if i % 50 == 0 {
                    std::thread::yield_now();
                }
            }
        });

        while !producer.is_finished() {
            coordinator.flush(false).await;
            tokio::task::yield_now().await;
        }
        producer.join().unwrap();
        coordinator.flush(true).await;

        assert_eq!(sink.lines(), expected);
        assert!(coordinator.queue().is_empty());
    }

    #[tokio::test]
    async fn test_disposed_queue_aborts_flush() {
        let (mut coordinator, sink) = setup(&["a"], RecordingSink::default());
        coordinator.queue().dispose();

        assert_eq!(coordinator.flush(true).await, FlushStatus::Aborted { forwarded: 0 });
        assert!(sink.lines().is_empty());
    }
}
