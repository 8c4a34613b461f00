// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP endpoint the Logs API delivers batches to.
//!
//! Each POST body is enqueued as a single raw [`LogEntry`] and acknowledged
//! right away; parsing is left to the backend.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::logs::queue::{LogEntry, LogQueue};

pub struct LogsListener {
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl LogsListener {
    /// Binds `addr` and starts serving in the background. The socket is bound
    /// before this returns.
    pub async fn start(addr: SocketAddr, queue: Arc<LogQueue>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(serve(listener, queue, cancel_token.clone()));
        debug!("LOGS | Listener started on {local_addr}");

        Ok(Self {
            local_addr,
            cancel_token,
            handle,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the accept loop to exit.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.handle.await {
            error!("LOGS | Listener task failed: {e}");
        }
        debug!("LOGS | Listener on {} stopped", self.local_addr);
    }
}

async fn serve(listener: TcpListener, queue: Arc<LogQueue>, cancel_token: CancellationToken) {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = JoinSet::new();

    loop {
        let conn = tokio::select! {
            () = cancel_token.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("LOGS | Listener error: {e}");
                    break;
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("LOGS | Connection handler panicked: {e:?}");
                    }
                }
                continue;
            },
        };

        let conn = TokioIo::new(conn);
        let server = server.clone();
        let queue = Arc::clone(&queue);
        joinset.spawn(async move {
            let service = service_fn(move |req| handle_request(req, Arc::clone(&queue)));
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("LOGS | Connection error: {e}");
            }
        });
    }

    joinset.shutdown().await;
}

async fn handle_request(
    req: Request<Incoming>,
    queue: Arc<LogQueue>,
) -> http::Result<Response<Full<Bytes>>> {
    if req.method() != Method::POST {
        return respond(StatusCode::METHOD_NOT_ALLOWED);
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("LOGS | Failed to read log batch: {e}");
            return respond(StatusCode::BAD_REQUEST);
        }
    };

    if !body.is_empty() {
        let entry = LogEntry::new(String::from_utf8_lossy(&body));
        if let Err(e) = queue.put(entry) {
            warn!("LOGS | Dropping log batch of {} bytes: {e}", body.len());
        }
    }

    respond(StatusCode::OK)
}

fn respond(status: StatusCode) -> http::Result<Response<Full<Bytes>>> {
    Response::builder().status(status).body(Full::new(Bytes::new()))
}
