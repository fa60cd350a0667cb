/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use aws_vault_types::provider::CredentialsError;
use std::error::Error;
use std::net::SocketAddr;

/// Failure to start or run a metadata server
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// The configured address is reachable from outside the host
    #[error("refusing to listen on {0}: metadata servers only bind to loopback addresses")]
    NonLoopbackAddress(SocketAddr),

    /// The listening socket could not be set up
    #[error("failed to listen on {addr}")]
    Bind {
        /// The requested address
        addr: SocketAddr,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// Eager credential fetch failed, so the server was never started
    #[error("failed to fetch credentials before starting the server")]
    Warmup(#[source] CredentialsError),

    /// The server stopped unexpectedly
    #[error("the server stopped unexpectedly")]
    Serve(#[source] Box<dyn Error + Send + Sync + 'static>),

    /// The server stopped because shutdown was requested
    ///
    /// This is the expected outcome of a graceful shutdown, not a fault.
    #[error("the server was shut down")]
    Closed,
}

impl ServerError {
    /// Whether this is the graceful-shutdown outcome rather than a failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, ServerError::Closed)
    }
}
