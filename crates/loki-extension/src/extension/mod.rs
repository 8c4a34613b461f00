// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the host's extensions API.
//!
//! ```text
//!  extension                              host
//!     │  POST /2020-01-01/extension/register │
//!     │ ───────────────────────────────────> │
//!     │ <── Lambda-Extension-Identifier ──── │
//!     │                                      │
//!     │  GET /2020-01-01/extension/event/next│  (long poll, blocks until
//!     │ ───────────────────────────────────> │   the next INVOKE/SHUTDOWN)
//!     │ <────────── {"eventType": ...} ───── │
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub mod logs_api;

pub const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
pub const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";

const EXTENSION_API_VERSION: &str = "2020-01-01";
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension has not been registered")]
    NotRegistered,

    #[error("request to the extensions API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("extensions API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("register response is missing the Lambda-Extension-Identifier header")]
    MissingIdentifier,

    #[error("failed to decode extensions API response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Invoke,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tracing {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextEventResponse {
    pub event_type: EventType,
    #[serde(default)]
    pub deadline_ms: i64,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub invoked_function_arn: Option<String>,
    #[serde(default)]
    pub shutdown_reason: Option<String>,
    #[serde(default)]
    pub tracing: Option<Tracing>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub function_version: String,
    #[serde(default)]
    pub handler: String,
}

/// The lifecycle half of the host's control API.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Registers the extension for `INVOKE` and `SHUTDOWN` events and returns
    /// the identifier the host assigned to it.
    async fn register(&mut self, name: &str) -> Result<String, ExtensionError>;

    /// Blocks until the host delivers the next lifecycle event.
    async fn next_event(&self) -> Result<NextEventResponse, ExtensionError>;
}

#[derive(Debug, Clone)]
pub struct ExtensionClient {
    client: reqwest::Client,
    base_url: String,
    register_timeout: Duration,
    extension_id: Option<String>,
}

impl ExtensionClient {
    /// `runtime_api` is the `host:port` the host exposes its API on.
    #[must_use]
    pub fn new(runtime_api: &str) -> Self {
        Self {
            // No client-wide timeout: `next_event` is a long poll that only
            // returns when the host has something to deliver.
            client: reqwest::Client::new(),
            base_url: format!("http://{runtime_api}/{EXTENSION_API_VERSION}/extension"),
            register_timeout: REGISTER_TIMEOUT,
            extension_id: None,
        }
    }

    #[must_use]
    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.as_deref()
    }
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, ExtensionError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ExtensionError::Status { status, body })
}

#[async_trait]
impl HostClient for ExtensionClient {
    async fn register(&mut self, name: &str) -> Result<String, ExtensionError> {
        let resp = self
            .client
            .post(format!("{}/register", self.base_url))
            .header(EXTENSION_NAME_HEADER, name)
            .timeout(self.register_timeout)
            .json(&json!({ "events": [EventType::Invoke, EventType::Shutdown] }))
            .send()
            .await?;
        let resp = error_for_status(resp).await?;

        let extension_id = resp
            .headers()
            .get(EXTENSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(ExtensionError::MissingIdentifier)?;

        let body = resp.bytes().await?;
        let registration: RegisterResponse = if body.is_empty() {
            RegisterResponse::default()
        } else {
            serde_json::from_slice(&body).unwrap_or_default()
        };
        debug!(
            "Registered extension {name} for function {:?} version {:?}",
            registration.function_name, registration.function_version
        );

        self.extension_id = Some(extension_id.clone());
        Ok(extension_id)
    }

    async fn next_event(&self) -> Result<NextEventResponse, ExtensionError> {
        let extension_id = self
            .extension_id
            .as_deref()
            .ok_or(ExtensionError::NotRegistered)?;
        let resp = self
            .client
            .get(format!("{}/event/next", self.base_url))
            .header(EXTENSION_ID_HEADER, extension_id)
            .send()
            .await?;
        let resp = error_for_status(resp).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
