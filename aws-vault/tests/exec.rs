/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use aws_vault::{Environ, ExecCommandInput, ExecError, ExecPlan, Prepared};
use aws_vault_config::profile::{ChainHop, ConfigurationError, ResolvedProfileConfig};
use aws_vault_config::test_util::CountingResolver;
use aws_vault_keyring::store::{InMemorySecretStore, SharedSecretStore};
use aws_vault_keyring::CredentialCache;
use aws_vault_types::date_time::fmt_iso8601;
use aws_vault_types::error::DisplayErrorContext;
use aws_vault_types::provider::CredentialsError;
use aws_vault_types::Credentials;
use hyper::{Body, Request, StatusCode};
use serde_json::Value;
use std::ffi::OsStr;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

fn config() -> ResolvedProfileConfig {
    ResolvedProfileConfig::builder("prod")
        .region("eu-west-1")
        .hop(ChainHop::new("root"))
        .hop(ChainHop::new("prod").role_arn("arn:aws:iam::111:role/Deploy"))
        .build()
}

fn cache() -> CredentialCache {
    CredentialCache::new(SharedSecretStore::new(InMemorySecretStore::new()))
}

fn parent_env() -> Environ {
    [
        ("PATH", "/usr/bin:/bin"),
        ("SHELL", "/bin/bash"),
        ("AWS_PROFILE", "dev"),
        ("AWS_ACCESS_KEY_ID", "AKIDPARENT"),
    ]
    .into_iter()
    .collect()
}

fn expiry() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3600)
}

fn resolver_returning(creds: Credentials) -> CountingResolver {
    CountingResolver::new(move |_| Ok(creds.clone()))
}

fn var<'a>(plan: &'a ExecPlan, key: &str) -> Option<&'a str> {
    plan.env().get(key).and_then(OsStr::to_str)
}

async fn prepare(
    input: &ExecCommandInput,
    resolver: &CountingResolver,
    env: Environ,
) -> Result<Prepared, ExecError> {
    input.prepare(&config(), cache(), resolver.clone(), env).await
}

fn into_plan(prepared: Prepared) -> ExecPlan {
    match prepared {
        Prepared::Command(plan) => plan,
        other => panic!("expected a command, got {:?}", other),
    }
}

#[tokio::test]
async fn environment_delivery() {
    let expiry = expiry();
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry));
    let mut input = ExecCommandInput::new("prod");
    input.command = Some("aws".into());
    input.args = vec!["s3".into(), "ls".into()];

    let plan = into_plan(prepare(&input, &resolver, parent_env()).await.unwrap());
    assert_eq!(resolver.calls(), 1);
    assert_eq!(plan.program(), OsStr::new("aws"));
    assert_eq!(plan.args(), ["s3".to_string(), "ls".to_string()]);
    assert!(!plan.is_subshell());
    assert!(plan.server().is_none());

    assert_eq!(var(&plan, "AWS_ACCESS_KEY_ID"), Some("ASIANOTREAL"));
    assert_eq!(
        var(&plan, "AWS_SECRET_ACCESS_KEY"),
        Some("notrealrnrELgWzOk3IfjzDKtFBhDby")
    );
    assert_eq!(var(&plan, "AWS_SESSION_TOKEN"), Some("notarealsessiontoken"));
    assert_eq!(
        var(&plan, "AWS_CREDENTIAL_EXPIRATION"),
        Some(fmt_iso8601(expiry).unwrap().as_str())
    );
    assert_eq!(var(&plan, "AWS_VAULT"), Some("prod"));
    assert_eq!(var(&plan, "AWS_REGION"), Some("eu-west-1"));
    assert_eq!(var(&plan, "AWS_DEFAULT_REGION"), Some("eu-west-1"));
    assert_eq!(var(&plan, "AWS_PROFILE"), None);
    assert_eq!(var(&plan, "PATH"), Some("/usr/bin:/bin"));
}

#[tokio::test]
async fn long_lived_credentials_carry_no_token_or_expiration() {
    let resolver = resolver_returning(Credentials::from_keys("AKIDLONGLIVED", "secret", None));
    let plan = into_plan(
        prepare(&ExecCommandInput::new("prod"), &resolver, parent_env())
            .await
            .unwrap(),
    );
    assert_eq!(var(&plan, "AWS_ACCESS_KEY_ID"), Some("AKIDLONGLIVED"));
    assert_eq!(var(&plan, "AWS_SESSION_TOKEN"), None);
    assert_eq!(var(&plan, "AWS_CREDENTIAL_EXPIRATION"), None);
}

#[tokio::test]
async fn no_command_runs_the_default_shell() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let plan = into_plan(
        prepare(&ExecCommandInput::new("prod"), &resolver, parent_env())
            .await
            .unwrap(),
    );
    assert!(plan.is_subshell());
    assert_eq!(plan.program(), OsStr::new("/bin/bash"));
    assert!(plan.args().is_empty());
}

#[tokio::test]
async fn nested_sessions_are_refused() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let mut env = parent_env();
    env.set("AWS_VAULT", "dev");

    let err = prepare(&ExecCommandInput::new("prod"), &resolver, env.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::NestedSession), "{:?}", err);
    assert_eq!(
        err.to_string(),
        "aws-vault sessions should be nested with care, unset AWS_VAULT to force"
    );
    assert_eq!(resolver.calls(), 0);

    // printing credentials runs nothing, so it is fine inside a session
    let mut json = ExecCommandInput::new("prod");
    json.json_deprecated = true;
    let prepared = prepare(&json, &resolver, env).await.unwrap();
    assert!(matches!(prepared, Prepared::CredentialProcess(_)));
}

#[tokio::test]
async fn conflicting_flags_fail_before_any_credentials_are_fetched() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let mut input = ExecCommandInput::new("prod");
    input.start_ecs_server = true;
    input.no_session = true;
    let err = prepare(&input, &resolver, parent_env()).await.unwrap_err();
    assert_eq!(err.to_string(), "Can't use --ecs-server with --no-session");
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn out_of_range_duration_is_a_configuration_error() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let mut input = ExecCommandInput::new("prod");
    input.session_duration = Some(Duration::from_secs(60));
    let err = prepare(&input, &resolver, parent_env()).await.unwrap_err();
    assert!(
        matches!(
            err,
            ExecError::Configuration(ConfigurationError::InvalidDuration { .. })
        ),
        "{:?}",
        err
    );
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn credential_failure_names_the_profile() {
    let resolver =
        CountingResolver::new(|_| Err(CredentialsError::provider_error("AccessDenied")));
    let err = prepare(&ExecCommandInput::new("prod"), &resolver, parent_env())
        .await
        .unwrap_err();
    assert_eq!(
        DisplayErrorContext(&err).to_string(),
        "Failed to get credentials for prod: an error occurred while loading credentials: AccessDenied"
    );
}

#[tokio::test]
async fn credential_process_json() {
    let expiry = expiry();
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry));
    let mut input = ExecCommandInput::new("prod");
    input.json_deprecated = true;
    let json = match prepare(&input, &resolver, parent_env()).await.unwrap() {
        Prepared::CredentialProcess(json) => json,
        other => panic!("expected JSON, got {:?}", other),
    };
    let json: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(json["Version"], 1);
    assert_eq!(json["AccessKeyId"], "ASIANOTREAL");
    assert_eq!(json["Expiration"], fmt_iso8601(expiry).unwrap().as_str());
}

#[tokio::test]
async fn ecs_server_delivery() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let mut input = ExecCommandInput::new("prod");
    input.start_ecs_server = true;
    let plan = into_plan(prepare(&input, &resolver, parent_env()).await.unwrap());
    // eager mode fetched once before handing out the URL
    assert_eq!(resolver.calls(), 1);

    assert_eq!(var(&plan, "AWS_ACCESS_KEY_ID"), None);
    assert_eq!(var(&plan, "AWS_VAULT"), Some("prod"));
    let uri = var(&plan, "AWS_CONTAINER_CREDENTIALS_FULL_URI").unwrap();
    let server = plan.server().unwrap();
    assert_eq!(uri, server.base_url());
    let auth_token = var(&plan, "AWS_CONTAINER_AUTHORIZATION_TOKEN").unwrap();
    assert_eq!(auth_token.len(), 32);

    let response = hyper::Client::new()
        .request(
            Request::builder()
                .uri(uri)
                .header("authorization", auth_token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["AccessKeyId"], "ASIANOTREAL");
    assert_eq!(resolver.calls(), 1);

    plan.shutdown().await.unwrap();
}

#[tokio::test]
async fn lazy_ecs_server_does_not_fetch_up_front() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let mut input = ExecCommandInput::new("prod");
    input.start_ecs_server = true;
    input.lazy = true;
    let plan = into_plan(prepare(&input, &resolver, parent_env()).await.unwrap());
    assert_eq!(resolver.calls(), 0);
    plan.shutdown().await.unwrap();
}

#[tokio::test]
async fn ec2_server_delivery() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let mut input = ExecCommandInput::new("prod");
    input.start_ec2_server = true;
    input.ec2_server_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let plan = into_plan(prepare(&input, &resolver, parent_env()).await.unwrap());
    assert_eq!(resolver.calls(), 0);
    assert_eq!(var(&plan, "AWS_ACCESS_KEY_ID"), None);
    assert_eq!(var(&plan, "AWS_REGION"), Some("eu-west-1"));

    let endpoint = var(&plan, "AWS_EC2_METADATA_SERVICE_ENDPOINT").unwrap();
    assert_eq!(endpoint, format!("{}/", plan.server().unwrap().base_url()));

    let client = hyper::Client::new();
    let response = client
        .request(
            Request::builder()
                .method("PUT")
                .uri(format!("{}latest/api/token", endpoint))
                .header("x-aws-ec2-metadata-token-ttl-seconds", "60")
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
                .uri(format!(
                    "{}latest/meta-data/iam/security-credentials/local-credentials",
                    endpoint
                ))
                .header("x-aws-ec2-metadata-token", &token[..])
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["AccessKeyId"], "ASIANOTREAL");
    assert_eq!(resolver.calls(), 1);

    plan.shutdown().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn command_runs_with_exactly_the_prepared_environment() {
    let resolver = resolver_returning(Credentials::for_tests_expiring(expiry()));
    let mut input = ExecCommandInput::new("prod");
    input.command = Some("/bin/sh".into());
    input.args = vec![
        "-c".into(),
        "printf '%s %s %s' \"$AWS_VAULT\" \"$AWS_ACCESS_KEY_ID\" \"${AWS_PROFILE:-unset}\"".into(),
    ];
    let plan = into_plan(prepare(&input, &resolver, parent_env()).await.unwrap());

    let output = plan.command().output().await.unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "prod ASIANOTREAL unset"
    );
}
