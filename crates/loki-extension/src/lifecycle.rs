// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The extension's control loop.
//!
//! ```text
//!   Registering ──> Polling ──event──> Flushing ──INVOKE──> Polling ...
//!                      │                   │
//!                      │                SHUTDOWN
//!                      │                   v
//!                      │              ShuttingDown
//!                      │                   │
//!                      └──cancel/error──> Terminated <──┘
//! ```
//!
//! Registration gating is enforced by the types: only a
//! [`RegisteredController`], obtained from a successful
//! [`LifecycleController::register`], can run the loop.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::extension::{EventType, ExtensionError, HostClient};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Registering,
    Polling,
    Flushing,
    ShuttingDown,
    Terminated,
}

/// Why the event loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The host sent `SHUTDOWN` and the pipeline was drained and closed.
    Shutdown,
    /// The cancellation token fired while waiting for an event.
    Cancelled,
    /// Polling the host failed. Treated as an implicit shutdown.
    PollError,
}

pub struct LifecycleController<C> {
    client: C,
    name: String,
}

impl<C: HostClient> LifecycleController<C> {
    #[must_use]
    pub fn new(client: C, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// Registers with the host. A failure here is not retried: an
    /// unregistered extension never receives events.
    pub async fn register(mut self) -> Result<RegisteredController<C>, ExtensionError> {
        debug!("[{}] Registering extension", self.name);
        let extension_id = self.client.register(&self.name).await?;
        info!("[{}] Registered with id {extension_id}", self.name);

        Ok(RegisteredController {
            client: self.client,
            name: self.name,
            extension_id,
            state: LifecycleState::Registering,
        })
    }
}

pub struct RegisteredController<C> {
    client: C,
    name: String,
    extension_id: String,
    state: LifecycleState,
}

impl<C: HostClient> RegisteredController<C> {
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state == LifecycleState::Terminated {
            error!(
                "[{}] Ignoring transition {next:?} after termination",
                self.name
            );
            return;
        }
        debug!("[{}] {:?} -> {next:?}", self.name, self.state);
        self.state = next;
    }

    /// Waits for lifecycle events until the host shuts the extension down,
    /// polling fails, or `cancel_token` fires.
    ///
    /// After each event the pipeline is flushed before the event kind is
    /// inspected, so logs from the invocation that just finished are
    /// forwarded before the loop goes back to waiting.
    pub async fn run(
        &mut self,
        pipeline: &mut Pipeline,
        cancel_token: &CancellationToken,
    ) -> LoopExit {
        if self.state == LifecycleState::Terminated {
            return LoopExit::Cancelled;
        }

        loop {
            self.transition(LifecycleState::Polling);
            debug!("[{}] Waiting for event...", self.name);

            // Racing the poll against cancellation drops the in-flight
            // request instead of waiting for the host to answer.
            let polled = tokio::select! {
                biased;
                () = cancel_token.cancelled() => None,
                res = self.client.next_event() => Some(res),
            };

            let event = match polled {
                None => {
                    info!("[{}] Cancelled, exiting", self.name);
                    self.transition(LifecycleState::Terminated);
                    return LoopExit::Cancelled;
                }
                Some(Err(e)) => {
                    error!("[{}] Error: {e}", self.name);
                    info!("[{}] Exiting", self.name);
                    self.transition(LifecycleState::Terminated);
                    return LoopExit::PollError;
                }
                Some(Ok(event)) => event,
            };

            self.transition(LifecycleState::Flushing);
            pipeline.on_event().await;

            if event.event_type == EventType::Shutdown {
                info!(
                    "[{}] Received SHUTDOWN event (reason: {})",
                    self.name,
                    event.shutdown_reason.as_deref().unwrap_or("unknown")
                );
                self.transition(LifecycleState::ShuttingDown);
                pipeline.on_shutdown().await;
                info!("[{}] Exiting", self.name);
                self.transition(LifecycleState::Terminated);
                return LoopExit::Shutdown;
            }
        }
    }
}
