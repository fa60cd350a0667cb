/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Instance metadata (IMDSv2) emulation.
//!
//! SDKs in the child process find this server through `AWS_EC2_METADATA_SERVICE_ENDPOINT` and
//! talk to it exactly as they would to the real instance metadata service:
//!
//! 1. `PUT /latest/api/token` with `x-aws-ec2-metadata-token-ttl-seconds` returns a session token
//! 2. `GET /latest/meta-data/iam/security-credentials/` with `x-aws-ec2-metadata-token` returns the
//!    role name, [`ROLE_NAME`]
//! 3. `GET /latest/meta-data/iam/security-credentials/local-credentials` returns the credentials
//!
//! Every `GET` needs a valid, unexpired token. Token requests that were forwarded by a proxy
//! (`X-Forwarded-For`) are refused, and so is any request that is not from a loopback peer or
//! whose `Host` is not a local name.

use crate::body::token_and_expiration;
use crate::error::ServerError;
use crate::handle::ServerHandle;
use crate::middleware::{log_request, require_local_host_header, require_loopback_peer};
use axum::body::Body;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use aws_vault_types::date_time::{fmt_iso8601, DateTimeError};
use aws_vault_types::error::DisplayErrorContext;
use aws_vault_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_vault_types::time::SharedTimeSource;
use aws_vault_types::Credentials;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use token::{TokenStore, TOKEN_TTL_RANGE};

mod token;

/// Address the EC2 metadata server listens on by default
pub const DEFAULT_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9099);

/// The one role the server reports
pub const ROLE_NAME: &str = "local-credentials";

/// Header carrying the requested token TTL, in seconds
pub const TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";

/// Header carrying the session token
pub const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const INSTANCE_ID: &str = "i-0000000000aws0vault";

#[derive(Debug)]
struct Ec2State {
    provider: SharedCredentialsProvider,
    tokens: TokenStore,
    time_source: SharedTimeSource,
    region: Option<String>,
}

/// A loopback server emulating the instance metadata credential endpoints
#[derive(Clone, Debug)]
pub struct Ec2MetadataServer {
    addr: SocketAddr,
    state: Arc<Ec2State>,
}

impl Ec2MetadataServer {
    /// Returns a builder for a server handing out `provider`'s credentials.
    pub fn builder(provider: impl ProvideCredentials + 'static) -> Builder {
        Builder {
            provider: SharedCredentialsProvider::new(provider),
            addr: DEFAULT_ADDR,
            region: None,
            time_source: SharedTimeSource::default(),
        }
    }

    /// Returns the address the server will listen on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the router serving the metadata endpoints.
    ///
    /// Requests must carry [`ConnectInfo<SocketAddr>`](axum::extract::ConnectInfo), which
    /// [`start`](Self::start) provides.
    pub fn router(&self) -> Router {
        let role_path = format!("/latest/meta-data/iam/security-credentials/{}", ROLE_NAME);
        let metadata = Router::new()
            .route("/latest/meta-data/iam/security-credentials/", get(list_roles))
            .route(&role_path, get(role_credentials))
            .route("/latest/meta-data/iam/info", get(iam_info))
            .route("/latest/meta-data/instance-id", get(instance_id))
            .route("/latest/meta-data/placement/region", get(region))
            .route("/latest/dynamic/instance-identity/document", get(identity_document))
            .route_layer(middleware::from_fn(require_session_token));
        Router::new()
            .route("/latest/api/token", put(issue_token))
            .merge(metadata)
            .layer(middleware::from_fn(require_local_host_header))
            .layer(middleware::from_fn(require_loopback_peer))
            .layer(middleware::from_fn(log_request))
            .layer(Extension(self.state.clone()))
    }

    /// Binds the listening socket and starts serving on the current Tokio runtime.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let listener = ServerHandle::bind(self.addr)?;
        let handle = ServerHandle::serve(self.addr, listener, self.router())?;
        tracing::info!(addr = %handle.local_addr(), "started the EC2 metadata server");
        Ok(handle)
    }
}

/// Builder for [`Ec2MetadataServer`]
#[derive(Debug)]
pub struct Builder {
    provider: SharedCredentialsProvider,
    addr: SocketAddr,
    region: Option<String>,
    time_source: SharedTimeSource,
}

impl Builder {
    /// Sets the listening address. Defaults to [`DEFAULT_ADDR`]; must be a loopback address.
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the region reported by the instance identity document.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the clock used for token expiry and `LastUpdated`.
    pub fn time_source(mut self, time_source: SharedTimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Builds the server.
    pub fn build(self) -> Ec2MetadataServer {
        Ec2MetadataServer {
            addr: self.addr,
            state: Arc::new(Ec2State {
                provider: self.provider,
                tokens: TokenStore::new(self.time_source.clone()),
                time_source: self.time_source,
                region: self.region,
            }),
        }
    }
}

async fn require_session_token(req: Request<Body>, next: Next<Body>) -> Response {
    let valid = match req.extensions().get::<Arc<Ec2State>>() {
        Some(state) => req
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|token| token.to_str().ok())
            .map(|token| state.tokens.is_valid(token))
            .unwrap_or(false),
        None => false,
    };
    if valid {
        next.run(req).await
    } else {
        tracing::debug!(path = %req.uri().path(), "refusing request without a valid metadata token");
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn issue_token(Extension(state): Extension<Arc<Ec2State>>, headers: HeaderMap) -> Response {
    if headers.contains_key(FORWARDED_FOR_HEADER) {
        tracing::warn!("refusing a forwarded token request");
        return StatusCode::FORBIDDEN.into_response();
    }
    let ttl = headers
        .get(TOKEN_TTL_HEADER)
        .and_then(|ttl| ttl.to_str().ok())
        .and_then(|ttl| ttl.parse::<u64>().ok())
        .filter(|ttl| TOKEN_TTL_RANGE.contains(ttl));
    let ttl = match ttl {
        Some(ttl) => ttl,
        None => return StatusCode::BAD_REQUEST.into_response(),
    };
    let token = state.tokens.issue(Duration::from_secs(ttl));
    let mut response = token.into_response();
    response.headers_mut().insert(
        HeaderName::from_static(TOKEN_TTL_HEADER),
        HeaderValue::from(ttl),
    );
    response
}

async fn list_roles() -> &'static str {
    ROLE_NAME
}

async fn instance_id() -> &'static str {
    INSTANCE_ID
}

async fn region(Extension(state): Extension<Arc<Ec2State>>) -> Response {
    match &state.region {
        Some(region) => region.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityDocument<'a> {
    instance_id: &'static str,
    region: &'a str,
}

async fn identity_document(Extension(state): Extension<Arc<Ec2State>>) -> Response {
    match &state.region {
        Some(region) => Json(IdentityDocument {
            instance_id: INSTANCE_ID,
            region,
        })
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceProfileInfo {
    code: &'static str,
    last_updated: String,
    instance_profile_arn: String,
}

async fn iam_info(Extension(state): Extension<Arc<Ec2State>>) -> Response {
    match fmt_iso8601(state.time_source.now()) {
        Ok(last_updated) => Json(InstanceProfileInfo {
            code: "Success",
            last_updated,
            instance_profile_arn: format!("arn:aws:iam::000000000000:instance-profile/{}", ROLE_NAME),
        })
        .into_response(),
        Err(err) => internal_error(&err),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentials<'a> {
    code: &'static str,
    last_updated: String,
    #[serde(rename = "Type")]
    credentials_type: &'static str,
    access_key_id: &'a str,
    secret_access_key: &'a str,
    token: &'a str,
    expiration: String,
}

impl<'a> RoleCredentials<'a> {
    fn new(
        creds: &'a Credentials,
        now: SystemTime,
        last_updated: String,
    ) -> Result<Self, DateTimeError> {
        let (token, expiration) = token_and_expiration(creds, now)?;
        Ok(RoleCredentials {
            code: "Success",
            last_updated,
            credentials_type: "AWS-HMAC",
            access_key_id: creds.access_key_id(),
            secret_access_key: creds.secret_access_key(),
            token,
            expiration,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataError {
    code: &'static str,
    message: String,
    last_updated: String,
}

async fn role_credentials(Extension(state): Extension<Arc<Ec2State>>) -> Response {
    let now = state.time_source.now();
    let last_updated = match fmt_iso8601(now) {
        Ok(last_updated) => last_updated,
        Err(err) => return internal_error(&err),
    };
    match state.provider.provide_credentials().await {
        Ok(creds) => match RoleCredentials::new(&creds, now, last_updated) {
            Ok(body) => Json(body).into_response(),
            Err(err) => internal_error(&err),
        },
        Err(err) => {
            tracing::warn!(error = %DisplayErrorContext(&err), "failed to retrieve credentials");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MetadataError {
                    code: "AssumeRoleUnauthorizedAccess",
                    message: DisplayErrorContext(&err).to_string(),
                    last_updated,
                }),
            )
                .into_response()
        }
    }
}

fn internal_error(err: &DateTimeError) -> Response {
    tracing::warn!(error = %DisplayErrorContext(err), "failed to format a timestamp");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
