// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A Lambda extension that forwards function logs to Grafana Loki.
//!
//! The extension registers with the host, subscribes a local HTTP listener to
//! the Logs API, and drains the received batches into Loki each time the
//! host wakes it with an event. See [`lifecycle`] for the control loop and
//! [`logs::flusher`] for the drain policy.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod error;
pub mod extension;
pub mod lifecycle;
pub mod logger;
pub mod logs;
pub mod pipeline;
