// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single egress point of the logs pipeline.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink has already been shut down")]
    Closed,

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("failed to encode push payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("push rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("push failed after {attempts} attempts: {message}")]
    Transport { attempts: u64, message: String },
}

/// Accepts formatted log lines one at a time and forwards them to a remote
/// backend.
///
/// Buffering is up to the implementation, but `shutdown` must not return
/// before every accepted line has been handed to the transport or reported
/// as failed.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn push_log(&self, line: String) -> Result<(), SinkError>;

    /// Hands any buffered lines to the transport. Called at the end of every
    /// flush pass, before the lifecycle loop goes back to waiting on the host.
    async fn sync(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Final flush and close. Calling it again is a no-op.
    async fn shutdown(&self) -> Result<(), SinkError>;
}
