// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared setup for the end-to-end tests: a mocked host API and a mocked
//! Loki backend, both served by mockito.

use loki_extension::config::Config;
use loki_extension::extension::EXTENSION_ID_HEADER;
use mockito::{Mock, Server, ServerGuard};

pub const EXTENSION_ID: &str = "e2e-extension-id";

pub struct Host {
    pub server: ServerGuard,
}

impl Host {
    pub async fn start() -> Self {
        Self {
            server: Server::new_async().await,
        }
    }

    pub fn runtime_api(&self) -> String {
        self.server.host_with_port()
    }

    pub async fn accept_registration(&mut self) -> Mock {
        self.server
            .mock("POST", "/2020-01-01/extension/register")
            .with_status(200)
            .with_header(EXTENSION_ID_HEADER, EXTENSION_ID)
            .with_body(r#"{"functionName":"e2e","functionVersion":"$LATEST","handler":"main"}"#)
            .create_async()
            .await
    }

    pub async fn accept_subscription(&mut self) -> Mock {
        self.server
            .mock("PUT", "/2020-08-15/logs")
            .match_header(EXTENSION_ID_HEADER, EXTENSION_ID)
            .with_status(200)
            .create_async()
            .await
    }

    pub async fn next_event(&mut self, status: usize, body: &str) -> Mock {
        self.server
            .mock("GET", "/2020-01-01/extension/event/next")
            .match_header(EXTENSION_ID_HEADER, EXTENSION_ID)
            .with_status(status)
            .with_body(body)
            .create_async()
            .await
    }
}

/// Forwarding config pointing at the mocked host and Loki. The listener
/// binds an ephemeral port.
pub fn config(runtime_api: &str, loki_url: &str) -> Config {
    let runtime_api = runtime_api.to_string();
    let endpoint = format!("{loki_url}/loki/api/v1/push");
    Config::from_lookup(|key| match key {
        "AWS_LAMBDA_RUNTIME_API" => Some(runtime_api.clone()),
        "AWS_LAMBDA_FUNCTION_NAME" => Some("E2E".to_string()),
        "LOKI_PUSH_ENDPOINT" => Some(endpoint.clone()),
        "LOKI_LOG_LABELS" => Some("env=test".to_string()),
        "LOKI_EXTENSION_LISTENER_PORT" => Some("0".to_string()),
        _ => None,
    })
    .expect("valid test config")
}
