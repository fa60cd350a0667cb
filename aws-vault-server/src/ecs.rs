/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Container credentials endpoint emulation.
//!
//! SDKs find this server through `AWS_CONTAINER_CREDENTIALS_FULL_URI` and authenticate with
//! the value of `AWS_CONTAINER_AUTHORIZATION_TOKEN`, sent verbatim as the `Authorization`
//! header.

use crate::body::token_and_expiration;
use crate::error::ServerError;
use crate::handle::ServerHandle;
use crate::middleware::{generate_token, log_request, require_loopback_peer};
use axum::body::Body;
use axum::extract::Extension;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use aws_vault_types::error::DisplayErrorContext;
use aws_vault_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_vault_types::time::SharedTimeSource;
use aws_vault_types::Credentials;
use serde::Serialize;
use std::fmt::{self, Debug, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::SystemTime;
use subtle::ConstantTimeEq;

/// Address the ECS server listens on by default; the port is picked by the OS
pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0);

const AUTH_TOKEN_LENGTH: usize = 32;

/// When credentials are first fetched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum FetchMode {
    /// Fetch once before serving; startup fails if that fetch fails
    #[default]
    Eager,
    /// Fetch on the first request
    Lazy,
}

struct EcsState {
    provider: SharedCredentialsProvider,
    auth_token: String,
    time_source: SharedTimeSource,
}

impl Debug for EcsState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcsState")
            .field("provider", &self.provider)
            .field("auth_token", &"** redacted **")
            .field("time_source", &self.time_source)
            .finish()
    }
}

/// A loopback server emulating the container credentials endpoint
#[derive(Clone, Debug)]
pub struct EcsMetadataServer {
    addr: SocketAddr,
    fetch_mode: FetchMode,
    state: Arc<EcsState>,
}

impl EcsMetadataServer {
    /// Returns a builder for a server handing out `provider`'s credentials.
    pub fn builder(provider: impl ProvideCredentials + 'static) -> Builder {
        Builder {
            provider: SharedCredentialsProvider::new(provider),
            addr: DEFAULT_ADDR,
            auth_token: None,
            fetch_mode: FetchMode::default(),
            time_source: SharedTimeSource::default(),
        }
    }

    /// Returns the token clients must send in the `Authorization` header.
    pub fn auth_token(&self) -> &str {
        &self.state.auth_token
    }

    /// Returns the fetch mode.
    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }

    /// Returns the router serving the credentials endpoint.
    ///
    /// Requests must carry [`ConnectInfo<SocketAddr>`](axum::extract::ConnectInfo), which
    /// [`start`](Self::start) provides.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(credentials))
            .route_layer(middleware::from_fn(require_auth_token))
            .layer(middleware::from_fn(require_loopback_peer))
            .layer(middleware::from_fn(log_request))
            .layer(Extension(self.state.clone()))
    }

    /// Binds the listening socket, fetches credentials if eager, and starts serving on the
    /// current Tokio runtime.
    ///
    /// The URL to hand to clients is the returned handle's
    /// [`base_url`](ServerHandle::base_url).
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let listener = ServerHandle::bind(self.addr)?;
        if self.fetch_mode == FetchMode::Eager {
            let creds = self
                .state
                .provider
                .provide_credentials()
                .await
                .map_err(ServerError::Warmup)?;
            tracing::debug!(creds = ?creds, "fetched credentials before serving");
        }
        let handle = ServerHandle::serve(self.addr, listener, self.router())?;
        tracing::info!(addr = %handle.local_addr(), mode = ?self.fetch_mode, "started the ECS credential server");
        Ok(handle)
    }
}

/// Builder for [`EcsMetadataServer`]
#[derive(Debug)]
pub struct Builder {
    provider: SharedCredentialsProvider,
    addr: SocketAddr,
    auth_token: Option<String>,
    fetch_mode: FetchMode,
    time_source: SharedTimeSource,
}

impl Builder {
    /// Sets the listening address. Defaults to [`DEFAULT_ADDR`]; must be a loopback address.
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the authorization token instead of generating a random one.
    pub fn auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    /// Sets the fetch mode. Defaults to [`FetchMode::Eager`].
    pub fn fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    /// Sets the clock used to date the expiration of credentials that never expire.
    pub fn time_source(mut self, time_source: SharedTimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Builds the server, generating the authorization token unless one was set.
    pub fn build(self) -> EcsMetadataServer {
        EcsMetadataServer {
            addr: self.addr,
            fetch_mode: self.fetch_mode,
            state: Arc::new(EcsState {
                provider: self.provider,
                auth_token: self
                    .auth_token
                    .unwrap_or_else(|| generate_token(AUTH_TOKEN_LENGTH)),
                time_source: self.time_source,
            }),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorMessage {
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorMessage {
            message: message.into(),
        }),
    )
        .into_response()
}

fn is_authorized(state: &EcsState, headers: &HeaderMap) -> bool {
    match headers.get(header::AUTHORIZATION) {
        Some(presented) => bool::from(presented.as_bytes().ct_eq(state.auth_token.as_bytes())),
        None => false,
    }
}

async fn require_auth_token(req: Request<Body>, next: Next<Body>) -> Response {
    let authorized = req
        .extensions()
        .get::<Arc<EcsState>>()
        .map(|state| is_authorized(state, req.headers()))
        .unwrap_or(false);
    if authorized {
        next.run(req).await
    } else {
        tracing::warn!("refusing request with an invalid Authorization token");
        error_response(StatusCode::FORBIDDEN, "invalid Authorization token")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerCredentials<'a> {
    access_key_id: &'a str,
    secret_access_key: &'a str,
    token: &'a str,
    expiration: String,
}

fn credentials_response(creds: &Credentials, now: SystemTime) -> Response {
    let (token, expiration) = match token_and_expiration(creds, now) {
        Ok(fields) => fields,
        Err(err) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, DisplayErrorContext(&err).to_string())
        }
    };
    Json(ContainerCredentials {
        access_key_id: creds.access_key_id(),
        secret_access_key: creds.secret_access_key(),
        token,
        expiration,
    })
    .into_response()
}

async fn credentials(Extension(state): Extension<Arc<EcsState>>) -> Response {
    match state.provider.provide_credentials().await {
        Ok(creds) => credentials_response(&creds, state.time_source.now()),
        Err(err) => {
            tracing::warn!(error = %DisplayErrorContext(&err), "failed to retrieve credentials");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                DisplayErrorContext(&err).to_string(),
            )
        }
    }
}
