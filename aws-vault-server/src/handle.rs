/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Running servers and their shutdown.

use crate::error::ServerError;
use axum::Router;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct ShutdownState {
    requested: AtomicBool,
    notify: Notify,
}

/// Requests graceful shutdown of a running server
///
/// In-flight requests are allowed to complete, then the listening socket is released.
#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
    state: Arc<ShutdownState>,
}

impl ShutdownTrigger {
    /// Requests shutdown. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if !self.state.requested.swap(true, Ordering::SeqCst) {
            self.state.notify.notify_one();
        }
    }
}

/// A metadata server running on the current Tokio runtime
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<ShutdownState>,
    task: JoinHandle<hyper::Result<()>>,
}

impl ServerHandle {
    pub(crate) fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
        if !addr.ip().is_loopback() {
            return Err(ServerError::NonLoopbackAddress(addr));
        }
        let bind_error = |source| ServerError::Bind { addr, source };
        let listener = TcpListener::bind(addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        Ok(listener)
    }

    pub(crate) fn serve(
        addr: SocketAddr,
        listener: TcpListener,
        app: Router,
    ) -> Result<Self, ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        let shutdown = Arc::new(ShutdownState::default());
        let signal = shutdown.clone();
        let server = axum::Server::from_tcp(listener)
            .map_err(|err| ServerError::Serve(err.into()))?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { signal.notify.notified().await });
        let task = tokio::spawn(server);
        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns `http://{local_addr}`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Returns a trigger that shuts the server down from elsewhere.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            state: self.shutdown.clone(),
        }
    }

    /// Waits for the server to stop.
    ///
    /// Returns [`ServerError::Closed`] if it stopped because shutdown was requested, and
    /// [`ServerError::Serve`] if it failed.
    pub async fn wait(self) -> ServerError {
        let outcome = self.task.await;
        // the flag, not the error value, decides whether the stop was expected
        if self.shutdown.requested.load(Ordering::SeqCst) {
            tracing::debug!(addr = %self.local_addr, "server closed");
            return ServerError::Closed;
        }
        match outcome {
            Ok(Ok(())) => ServerError::Closed,
            Ok(Err(err)) => ServerError::Serve(err.into()),
            Err(err) => ServerError::Serve(err.into()),
        }
    }

    /// Shuts the server down gracefully and waits for it to stop.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.shutdown_trigger().shutdown();
        match self.wait().await {
            ServerError::Closed => Ok(()),
            err => Err(err),
        }
    }
}
