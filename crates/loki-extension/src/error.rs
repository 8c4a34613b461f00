// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::ConfigError;
use crate::extension::ExtensionError;
use crate::logs::sink::SinkError;

/// Failures that must stop the process before the event loop starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to register extension: {0}")]
    Register(#[source] ExtensionError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create Loki sink: {0}")]
    Sink(#[from] SinkError),

    #[error("Failed to start logs listener: {0}")]
    Listener(#[from] std::io::Error),

    #[error("Failed to subscribe to the Logs API: {0}")]
    Subscribe(#[source] ExtensionError),
}
