// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits and protocol constants for the logs pipeline.

/// Initial capacity of the log queue shared between the listener and the
/// lifecycle loop. The queue grows past it on demand.
pub const INITIAL_QUEUE_CAPACITY: usize = 5;

/// Record type the Logs API emits once the runtime has finished an
/// invocation.
///
/// The listener enqueues each delivered batch as raw text, so the marker is
/// detected by searching the entry content rather than any structured field.
/// This is a convention of the Logs API payload, not a property of the
/// queue.
pub const RUNTIME_DONE: &str = "platform.runtimeDone";

/// Maximum number of lines buffered by the Loki sink before a push is
/// sent inline.
pub(crate) const MAX_BATCH_ENTRIES: usize = 1000;

/// Maximum number of line bytes buffered by the Loki sink before a push is
/// sent inline.
pub(crate) const MAX_BATCH_BYTES: usize = 1_024 * 1_024;

/// Port the logs listener binds when none is configured.
pub const DEFAULT_LISTENER_PORT: u16 = 1234;

/// Hostname under which the extension is reachable from the Logs API.
pub(crate) const SANDBOX_HOSTNAME: &str = "sandbox";
