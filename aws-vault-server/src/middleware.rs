/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Request checks shared by both servers.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::uri::Authority;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const METADATA_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254));

/// Generates a random token of `len` alphanumeric characters from the OS CSPRNG.
pub(crate) fn generate_token(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Rejects requests whose peer is not on the loopback interface.
///
/// Requests without connection info are rejected as well.
pub(crate) async fn require_loopback_peer(req: Request<Body>, next: Next<Body>) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| *peer);
    match peer {
        Some(peer) if peer.ip().is_loopback() => next.run(req).await,
        Some(peer) => {
            tracing::warn!(peer = %peer, "refusing request from a non-loopback peer");
            (StatusCode::FORBIDDEN, "access denied from non-localhost address").into_response()
        }
        None => {
            tracing::warn!("refusing request with an unknown peer");
            (StatusCode::FORBIDDEN, "access denied from unknown address").into_response()
        }
    }
}

/// Rejects requests whose `Host` is not loopback, `localhost` or the metadata address.
///
/// A DNS name resolving to the loopback address won't pass, which blocks DNS rebinding from a
/// browser.
pub(crate) async fn require_local_host_header(req: Request<Body>, next: Next<Body>) -> Response {
    let allowed = req
        .headers()
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .map(is_local_host)
        .unwrap_or(false);
    if allowed {
        next.run(req).await
    } else {
        tracing::warn!("refusing request with a non-local Host header");
        (StatusCode::FORBIDDEN, "access denied for host").into_response()
    }
}

fn is_local_host(host: &str) -> bool {
    let authority = match host.parse::<Authority>() {
        Ok(authority) => authority,
        Err(_) => return false,
    };
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip == METADATA_ADDRESS,
        Err(_) => false,
    }
}

/// Logs method, path and status of every request. Headers are never logged.
pub(crate) async fn log_request(req: Request<Body>, next: Next<Body>) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    tracing::debug!(%method, %path, status = response.status().as_u16(), "served metadata request");
    response
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_hosts() {
        for host in [
            "127.0.0.1",
            "127.0.0.1:9099",
            "localhost:8080",
            "LOCALHOST",
            "[::1]:80",
            "169.254.169.254",
        ] {
            assert!(is_local_host(host), "{}", host);
        }
        for host in ["evil.example.com", "10.0.0.1:80", "localhost.evil.com", ""] {
            assert!(!is_local_host(host), "{}", host);
        }
    }

    #[test]
    fn tokens_are_alphanumeric() {
        let token = generate_token(32);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token(32));
    }
}
