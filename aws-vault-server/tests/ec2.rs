/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use aws_vault_server::ec2::{Ec2MetadataServer, ROLE_NAME, TOKEN_HEADER, TOKEN_TTL_HEADER};
use aws_vault_server::ServerError;
use aws_vault_types::date_time::fmt_iso8601;
use aws_vault_types::provider::{provide_credentials_fn, CredentialsError};
use aws_vault_types::time::{SharedTimeSource, TestingTimeSource};
use aws_vault_types::Credentials;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{request, Request, StatusCode};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

const CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/local-credentials";

fn start_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn expiry() -> SystemTime {
    start_time() + Duration::from_secs(15 * 60)
}

fn server(time: &TestingTimeSource) -> Ec2MetadataServer {
    Ec2MetadataServer::builder(Credentials::for_tests_expiring(expiry()))
        .region("eu-west-1")
        .time_source(SharedTimeSource::new(time.clone()))
        .build()
}

fn local_request(method: &str, path: &str) -> request::Builder {
    Request::builder()
        .method(method)
        .uri(path)
        .header("host", "127.0.0.1:9099")
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50_000))))
}

async fn send(server: &Ec2MetadataServer, request: Request<Body>) -> (StatusCode, String) {
    let response = server.router().oneshot(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn issue_token(server: &Ec2MetadataServer, ttl: &str) -> (StatusCode, String) {
    send(
        server,
        local_request("PUT", "/latest/api/token")
            .header(TOKEN_TTL_HEADER, ttl)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

async fn get_with_token(server: &Ec2MetadataServer, path: &str, token: &str) -> (StatusCode, String) {
    send(
        server,
        local_request("GET", path)
            .header(TOKEN_HEADER, token)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn token_gated_credentials_flow() {
    let time = TestingTimeSource::new(start_time());
    let server = server(&time);

    let response = server
        .router()
        .oneshot(
            local_request("PUT", "/latest/api/token")
                .header(TOKEN_TTL_HEADER, "60")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[TOKEN_TTL_HEADER], "60");
    let token = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let token = String::from_utf8(token.to_vec()).unwrap();

    let (status, roles) =
        get_with_token(&server, "/latest/meta-data/iam/security-credentials/", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roles, ROLE_NAME);

    let (status, body) = get_with_token(&server, CREDENTIALS_PATH, &token).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["Code"], "Success");
    assert_eq!(body["Type"], "AWS-HMAC");
    assert_eq!(body["AccessKeyId"], "ASIANOTREAL");
    assert_eq!(body["SecretAccessKey"], "notrealrnrELgWzOk3IfjzDKtFBhDby");
    assert_eq!(body["Token"], "notarealsessiontoken");
    assert_eq!(body["Expiration"], fmt_iso8601(expiry()).unwrap().as_str());
    assert_eq!(body["LastUpdated"], fmt_iso8601(start_time()).unwrap().as_str());
}

#[tokio::test]
async fn long_lived_keys_still_carry_token_and_expiration() {
    let time = TestingTimeSource::new(start_time());
    let server = Ec2MetadataServer::builder(Credentials::from_keys("AKID", "secret", None))
        .time_source(SharedTimeSource::new(time.clone()))
        .build();
    let (_, token) = issue_token(&server, "60").await;

    let (status, body) = get_with_token(&server, CREDENTIALS_PATH, &token).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["AccessKeyId"], "AKID");
    assert_eq!(body["Token"], "");
    assert_eq!(
        body["Expiration"],
        fmt_iso8601(start_time() + Duration::from_secs(5 * 60)).unwrap().as_str()
    );
}

#[tokio::test]
async fn credentials_without_a_valid_token_are_refused() {
    let time = TestingTimeSource::new(start_time());
    let server = server(&time);

    let (status, body) = send(
        &server,
        local_request("GET", CREDENTIALS_PATH).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!body.contains("ASIANOTREAL"));

    let (status, _) = get_with_token(&server, CREDENTIALS_PATH, "made-up-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_token_is_refused() {
    let time = TestingTimeSource::new(start_time());
    let server = server(&time);
    let (_, token) = issue_token(&server, "60").await;

    time.advance(Duration::from_secs(30));
    let (status, _) = get_with_token(&server, CREDENTIALS_PATH, &token).await;
    assert_eq!(status, StatusCode::OK);

    time.advance(Duration::from_secs(31));
    let (status, _) = get_with_token(&server, CREDENTIALS_PATH, &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_ttl_is_validated() {
    let time = TestingTimeSource::new(start_time());
    let server = server(&time);
    for ttl in ["0", "21601", "-5", "sixty", ""] {
        let (status, _) = issue_token(&server, ttl).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "ttl {:?}", ttl);
    }
    let (status, _) = send(
        &server,
        local_request("PUT", "/latest/api/token").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = issue_token(&server, "21600").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn forwarded_token_requests_are_refused() {
    let time = TestingTimeSource::new(start_time());
    let server = server(&time);
    let (status, _) = send(
        &server,
        local_request("PUT", "/latest/api/token")
            .header(TOKEN_TTL_HEADER, "60")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn remote_peers_and_foreign_hosts_are_refused() {
    let time = TestingTimeSource::new(start_time());
    let server = server(&time);

    let remote = Request::builder()
        .method("PUT")
        .uri("/latest/api/token")
        .header("host", "127.0.0.1:9099")
        .header(TOKEN_TTL_HEADER, "60")
        .extension(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 50_000))))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&server, remote).await.0, StatusCode::FORBIDDEN);

    let unknown_peer = Request::builder()
        .method("PUT")
        .uri("/latest/api/token")
        .header("host", "127.0.0.1:9099")
        .header(TOKEN_TTL_HEADER, "60")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&server, unknown_peer).await.0, StatusCode::FORBIDDEN);

    let rebound = Request::builder()
        .method("PUT")
        .uri("/latest/api/token")
        .header("host", "attacker.example.com")
        .header(TOKEN_TTL_HEADER, "60")
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50_000))))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&server, rebound).await.0, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn provider_failure_uses_the_metadata_error_shape() {
    let server = Ec2MetadataServer::builder(provide_credentials_fn(|| async {
        Err::<Credentials, _>(CredentialsError::provider_error("AccessDenied"))
    }))
    .build();
    let (_, token) = issue_token(&server, "60").await;
    let (status, body) = get_with_token(&server, CREDENTIALS_PATH, &token).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_ne!(body["Code"], "Success");
    assert_eq!(
        body["Message"],
        "an error occurred while loading credentials: AccessDenied"
    );
    assert!(body["LastUpdated"].is_string());
    assert!(body.get("AccessKeyId").is_none());
}

#[tokio::test]
async fn region_metadata() {
    let time = TestingTimeSource::new(start_time());
    let server = server(&time);
    let (_, token) = issue_token(&server, "60").await;

    let (status, region) =
        get_with_token(&server, "/latest/meta-data/placement/region", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(region, "eu-west-1");

    let (_, document) =
        get_with_token(&server, "/latest/dynamic/instance-identity/document", &token).await;
    let document: Value = serde_json::from_str(&document).unwrap();
    assert_eq!(document["region"], "eu-west-1");

    let (status, _) = get_with_token(&server, "/latest/meta-data/instance-id", &token).await;
    assert_eq!(status, StatusCode::OK);
    let (_, info) = get_with_token(&server, "/latest/meta-data/iam/info", &token).await;
    let info: Value = serde_json::from_str(&info).unwrap();
    assert_eq!(info["Code"], "Success");

    let regionless = Ec2MetadataServer::builder(Credentials::for_tests_expiring(expiry())).build();
    let (_, token) = issue_token(&regionless, "60").await;
    let (status, _) =
        get_with_token(&regionless, "/latest/meta-data/placement/region", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refuses_to_bind_a_non_loopback_address() {
    let err = Ec2MetadataServer::builder(Credentials::for_tests_expiring(expiry()))
        .addr(SocketAddr::from(([0, 0, 0, 0], 9099)))
        .build()
        .start()
        .unwrap_err();
    assert!(matches!(err, ServerError::NonLoopbackAddress(_)), "{:?}", err);
}

#[tokio::test]
async fn serves_over_a_real_loopback_socket() {
    let handle = Ec2MetadataServer::builder(Credentials::for_tests_expiring(
        SystemTime::now() + Duration::from_secs(3600),
    ))
    .addr(SocketAddr::from(([127, 0, 0, 1], 0)))
    .build()
    .start()
    .unwrap();
    let client = hyper::Client::new();

    let response = client
        .request(
            Request::builder()
                .method("PUT")
                .uri(format!("{}/latest/api/token", handle.base_url()))
                .header(TOKEN_TTL_HEADER, "21600")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token = hyper::body::to_bytes(response.into_body()).await.unwrap();

    let response = client
        .request(
            Request::builder()
                .uri(format!("{}{}", handle.base_url(), CREDENTIALS_PATH))
                .header(TOKEN_HEADER, &token[..])
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["Code"], "Success");

    handle.shutdown().await.unwrap();
}
