// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! What the lifecycle loop does at each synchronization point.
//!
//! The variant is picked once at startup from [`Config::loki`], so the loop
//! never has to check whether forwarding is enabled.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::StartupError;
use crate::extension::logs_api::{Destination, LogsApiClient, SubscribeRequest};
use crate::logs::constants::{INITIAL_QUEUE_CAPACITY, SANDBOX_HOSTNAME};
use crate::logs::flusher::{FlushCoordinator, FlushStatus};
use crate::logs::listener::LogsListener;
use crate::logs::loki::LokiSink;
use crate::logs::queue::LogQueue;

pub enum Pipeline {
    Forwarding(LogsPipeline),
    Disabled,
}

impl Pipeline {
    /// Builds the pipeline selected by `config`. For the forwarding variant
    /// this creates the sink, starts the listener and subscribes it to the
    /// Logs API; any failure is fatal.
    pub async fn start(config: &Config, extension_id: &str) -> Result<Self, StartupError> {
        let Some(loki) = &config.loki else {
            info!("Log forwarding disabled");
            return Ok(Pipeline::Disabled);
        };

        let sink = Arc::new(LokiSink::new(
            loki,
            &config.function_name,
            config.https_proxy.as_deref(),
        )?);
        let queue = Arc::new(LogQueue::with_capacity(INITIAL_QUEUE_CAPACITY));

        let listener = LogsListener::start(
            SocketAddr::from(([0, 0, 0, 0], config.listener_port)),
            Arc::clone(&queue),
        )
        .await?;

        let destination = Destination::http(format!(
            "http://{SANDBOX_HOSTNAME}:{}",
            listener.local_addr().port()
        ));
        if let Err(e) = LogsApiClient::new(&config.runtime_api)
            .subscribe(extension_id, &SubscribeRequest::new(destination))
            .await
        {
            listener.shutdown().await;
            return Err(StartupError::Subscribe(e));
        }

        Ok(Pipeline::Forwarding(LogsPipeline::new(
            FlushCoordinator::new(queue, sink),
            Some(listener),
        )))
    }

    /// Called after every event, before deciding whether it was a shutdown.
    pub async fn on_event(&mut self) {
        if let Pipeline::Forwarding(pipeline) = self {
            pipeline.flush(false).await;
        }
    }

    /// Called once, after `on_event`, when the host announced shutdown.
    pub async fn on_shutdown(&mut self) {
        if let Pipeline::Forwarding(pipeline) = self {
            pipeline.shutdown().await;
        }
    }
}

pub struct LogsPipeline {
    coordinator: FlushCoordinator,
    listener: Option<LogsListener>,
}

impl LogsPipeline {
    #[must_use]
    pub fn new(coordinator: FlushCoordinator, listener: Option<LogsListener>) -> Self {
        Self {
            coordinator,
            listener,
        }
    }

    #[must_use]
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(LogsListener::local_addr)
    }

    pub async fn flush(&mut self, force: bool) -> FlushStatus {
        self.coordinator.flush(force).await
    }

    /// Forced flush, then stop the listener and drain whatever it queued in
    /// the meantime, then close the sink.
    pub async fn shutdown(&mut self) {
        let status = self.coordinator.flush(true).await;
        debug!("LOGS | Final flush: {status:?}");

        if let Some(listener) = self.listener.take() {
            listener.shutdown().await;
            if !self.coordinator.queue().is_empty() {
                let status = self.coordinator.flush(true).await;
                debug!("LOGS | Drained batches received during shutdown: {status:?}");
            }
        }

        if let Err(e) = self.coordinator.sink().shutdown().await {
            error!("LOGS | Failed to shut down sink: {e}");
        }

        let dropped = self.coordinator.queue().dispose();
        if dropped > 0 {
            error!("LOGS | {dropped} log batches were still queued at shutdown and were dropped");
        }
    }
}
