// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log delivery from the host to Loki.
//!
//! ```text
//!   Logs API ──POST──> listener ──put──> queue ──get──> flusher ──push──> sink ──> Loki
//!                     (async task)                   (lifecycle loop)
//! ```
//!
//! - [`listener`]: HTTP endpoint the host delivers log batches to
//! - [`queue`]: the only channel between the listener and the lifecycle loop
//! - [`flusher`]: drains the queue at invocation boundaries and at shutdown
//! - [`sink`]: egress contract
//! - [`loki`]: the Loki implementation of the sink

pub mod constants;
pub mod flusher;
pub mod listener;
pub mod loki;
pub mod queue;
pub mod sink;
