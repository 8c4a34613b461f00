// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::Path;
use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use loki_extension::{
    config::Config,
    error::StartupError,
    extension::ExtensionClient,
    lifecycle::LifecycleController,
    logger::{self, Formatter},
    pipeline::Pipeline,
};

const DEFAULT_EXTENSION_NAME: &str = "loki-lambda-extension";

#[tokio::main]
pub async fn main() -> ExitCode {
    // The host registers extensions by their executable's file name.
    let extension_name = std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_EXTENSION_NAME.to_string());

    let config = Config::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&extension_name, &log_level);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", StartupError::from(e));
            return ExitCode::FAILURE;
        }
    };

    let cancel_token = CancellationToken::new();
    tokio::spawn(watch_signals(cancel_token.clone()));

    match run(config, extension_name, cancel_token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: Config,
    extension_name: String,
    cancel_token: CancellationToken,
) -> Result<(), StartupError> {
    // Register as soon as possible: the host will not start the function
    // until every extension has registered.
    let controller =
        LifecycleController::new(ExtensionClient::new(&config.runtime_api), extension_name);
    let registered = tokio::select! {
        biased;
        () = cancel_token.cancelled() => {
            info!("Cancelled before registration completed");
            return Ok(());
        }
        res = controller.register() => res,
    };
    let mut controller = registered.map_err(StartupError::Register)?;

    let mut pipeline = Pipeline::start(&config, controller.extension_id()).await?;

    let exit = controller.run(&mut pipeline, &cancel_token).await;
    debug!("Event loop finished: {exit:?}");
    Ok(())
}

fn init_logging(extension_name: &str, log_level: &str) {
    let env_filter = match logger::env_filter(log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("[{extension_name}] Invalid log level {log_level:?} ({e}), using info");
            tracing_subscriber::EnvFilter::new("info")
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter::new(extension_name))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("[{extension_name}] Failed to install log subscriber: {e}");
    }
}

async fn watch_signals(cancel_token: CancellationToken) {
    let signal = wait_for_signal().await;
    cancel_token.cancel();
    info!("Received {signal}");
    info!("Exiting");
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install signal handlers: {e}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            error!("Failed to install signal handler: {e}");
            std::future::pending().await
        }
    }
}
