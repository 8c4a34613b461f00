// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Subscription to the host's Logs API.
//!
//! Once subscribed, the host POSTs batches of log records (JSON arrays) to
//! the destination URI; see [`crate::logs::listener`].

use serde::Serialize;
use tracing::{debug, info};

use crate::extension::{error_for_status, ExtensionError, EXTENSION_ID_HEADER};

const LOGS_API_VERSION: &str = "2020-08-15";
const SCHEMA_VERSION: &str = "2021-03-18";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Platform,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffering {
    pub max_items: u32,
    pub max_bytes: u32,
    pub timeout_ms: u32,
}

impl Default for Buffering {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_bytes: 262_144,
            timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub protocol: &'static str,
    #[serde(rename = "URI")]
    pub uri: String,
}

impl Destination {
    #[must_use]
    pub fn http(uri: impl Into<String>) -> Self {
        Self {
            protocol: "HTTP",
            uri: uri.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub schema_version: &'static str,
    pub types: Vec<LogType>,
    pub buffering: Buffering,
    pub destination: Destination,
}

impl SubscribeRequest {
    #[must_use]
    pub fn new(destination: Destination) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            types: vec![LogType::Platform, LogType::Function],
            buffering: Buffering::default(),
            destination,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogsApiClient {
    client: reqwest::Client,
    url: String,
}

impl LogsApiClient {
    #[must_use]
    pub fn new(runtime_api: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://{runtime_api}/{LOGS_API_VERSION}/logs"),
        }
    }

    /// Logs are only delivered after this call succeeds.
    pub async fn subscribe(
        &self,
        extension_id: &str,
        request: &SubscribeRequest,
    ) -> Result<(), ExtensionError> {
        debug!("Subscribing to Logs API with {request:?}");
        let resp = self
            .client
            .put(&self.url)
            .header(EXTENSION_ID_HEADER, extension_id)
            .json(request)
            .send()
            .await?;
        error_for_status(resp).await?;
        info!(
            "Subscribed to Logs API, logs will be delivered to {}",
            request.destination.uri
        );
        Ok(())
    }
}
