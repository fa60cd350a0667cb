/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Scripted STS/SSO clients and resolvers for tests.

use crate::profile::ResolvedProfileConfig;
use crate::resolver::ResolveCredentials;
use crate::sts::{
    AssumeRoleInput, GetSessionTokenInput, SsoAccessToken, SsoClient, StsClient, StsError,
};
use async_trait::async_trait;
use aws_vault_types::provider::{self, future};
use aws_vault_types::time::SharedTimeSource;
use aws_vault_types::Credentials;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const STUB_PROVIDER: &str = "StubSts";

/// A recorded `GetSessionToken` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionTokenCall {
    /// Access key ID of the signing credentials
    pub signed_with: String,
    /// Requested duration
    pub duration: Duration,
    /// MFA device sent
    pub mfa_serial: Option<String>,
    /// MFA code sent
    pub token_code: Option<String>,
}

/// A recorded `AssumeRole` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssumeRoleCall {
    /// Access key ID of the signing credentials
    pub signed_with: String,
    /// Role requested
    pub role_arn: String,
    /// Session name sent
    pub role_session_name: String,
    /// External ID sent
    pub external_id: Option<String>,
    /// Requested duration
    pub duration: Duration,
    /// MFA device sent
    pub mfa_serial: Option<String>,
    /// MFA code sent
    pub token_code: Option<String>,
}

/// A call recorded by [`StubStsClient`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StsCall {
    /// `GetSessionToken`
    GetSessionToken(SessionTokenCall),
    /// `AssumeRole`
    AssumeRole(AssumeRoleCall),
}

#[derive(Debug, Default)]
struct StubState {
    calls: Vec<StsCall>,
    session_token_failure: Option<StsError>,
    role_failures: HashMap<String, StsError>,
}

/// An STS client that mints fake credentials and records every call
///
/// The n-th call (1-based, failed calls included) returns credentials with the access key ID
/// `ASIASTUB{n}`, expiring after the requested duration or the fixed lifetime set with
/// [`StubStsClient::with_lifetime`]. Clones share their call log.
#[derive(Clone, Debug, Default)]
pub struct StubStsClient {
    state: Arc<Mutex<StubState>>,
    time_source: SharedTimeSource,
    lifetime: Option<Duration>,
    delay: Option<Duration>,
}

impl StubStsClient {
    /// Creates a stub that uses the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes expirations from `time_source`.
    pub fn with_time_source(mut self, time_source: SharedTimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Makes every minted credential expire `lifetime` after it was minted.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Makes every call sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the next `GetSessionToken` call fail with `err`.
    pub fn fail_session_token(&self, err: StsError) {
        self.state().session_token_failure = Some(err);
    }

    /// Makes the next assumption of `role_arn` fail with `err`.
    pub fn fail_role(&self, role_arn: impl Into<String>, err: StsError) {
        self.state().role_failures.insert(role_arn.into(), err);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<StsCall> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint(&self, call_number: usize, duration: Duration) -> Credentials {
        let expiry = self.time_source.now() + self.lifetime.unwrap_or(duration);
        Credentials::new(
            format!("ASIASTUB{}", call_number),
            format!("stub-secret-{}", call_number),
            Some(format!("stub-token-{}", call_number)),
            Some(expiry),
            STUB_PROVIDER,
        )
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl StsClient for StubStsClient {
    async fn get_session_token(
        &self,
        credentials: &Credentials,
        input: GetSessionTokenInput,
    ) -> Result<Credentials, StsError> {
        let (call_number, failure) = {
            let mut state = self.state();
            state.calls.push(StsCall::GetSessionToken(SessionTokenCall {
                signed_with: credentials.access_key_id().to_string(),
                duration: input.duration,
                mfa_serial: input.mfa_serial.clone(),
                token_code: input.token_code.as_ref().map(|code| code.as_str().to_string()),
            }));
            (state.calls.len(), state.session_token_failure.take())
        };
        self.pause().await;
        match failure {
            Some(err) => Err(err),
            None => Ok(self.mint(call_number, input.duration)),
        }
    }

    async fn assume_role(
        &self,
        credentials: &Credentials,
        input: AssumeRoleInput,
    ) -> Result<Credentials, StsError> {
        let (call_number, failure) = {
            let mut state = self.state();
            state.calls.push(StsCall::AssumeRole(AssumeRoleCall {
                signed_with: credentials.access_key_id().to_string(),
                role_arn: input.role_arn.clone(),
                role_session_name: input.role_session_name.clone(),
                external_id: input.external_id.clone(),
                duration: input.duration,
                mfa_serial: input.mfa_serial.clone(),
                token_code: input.token_code.as_ref().map(|code| code.as_str().to_string()),
            }));
            (state.calls.len(), state.role_failures.remove(&input.role_arn))
        };
        self.pause().await;
        match failure {
            Some(err) => Err(err),
            None => Ok(self.mint(call_number, input.duration)),
        }
    }
}

/// An SSO client that hands out fake tokens and role credentials
///
/// Role credentials carry the access key ID `ASIASSO{account_id}{role_name}` and expire an
/// hour after they were issued.
#[derive(Clone, Debug, Default)]
pub struct StubSsoClient {
    token_requests: Arc<AtomicUsize>,
    stdout_token_requests: Arc<AtomicUsize>,
    token_failure: Arc<Mutex<Option<StsError>>>,
    time_source: SharedTimeSource,
}

impl StubSsoClient {
    /// Creates a stub that uses the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next access token request fail with `err`.
    pub fn fail_token(&self, err: StsError) {
        *self
            .token_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    /// Returns how many access tokens were requested.
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    /// Returns how many of those requests asked for the login URL on stdout.
    pub fn stdout_token_requests(&self) -> usize {
        self.stdout_token_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SsoClient for StubSsoClient {
    async fn access_token(
        &self,
        start_url: &str,
        _region: &str,
        use_stdout: bool,
    ) -> Result<SsoAccessToken, StsError> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        if use_stdout {
            self.stdout_token_requests.fetch_add(1, Ordering::SeqCst);
        }
        let failure = self
            .token_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match failure {
            Some(err) => Err(err),
            None => Ok(SsoAccessToken::new(format!("sso-token-for-{}", start_url))),
        }
    }

    async fn get_role_credentials(
        &self,
        _access_token: &SsoAccessToken,
        _region: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<Credentials, StsError> {
        Ok(Credentials::new(
            format!("ASIASSO{}{}", account_id, role_name),
            "sso-secret",
            Some("sso-token".to_string()),
            Some(self.time_source.now() + Duration::from_secs(60 * 60)),
            "StubSso",
        ))
    }
}

/// A resolver that answers from a closure and counts its invocations
///
/// The closure receives the 1-based invocation number.
#[derive(Clone)]
pub struct CountingResolver {
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    respond: Arc<dyn Fn(usize) -> provider::Result + Send + Sync>,
}

impl Debug for CountingResolver {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingResolver")
            .field("calls", &self.calls())
            .field("delay", &self.delay)
            .finish()
    }
}

impl CountingResolver {
    /// Creates a resolver answering with `respond`.
    pub fn new(respond: impl Fn(usize) -> provider::Result + Send + Sync + 'static) -> Self {
        CountingResolver {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            respond: Arc::new(respond),
        }
    }

    /// Makes every resolution sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many resolutions were started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResolveCredentials for CountingResolver {
    fn resolve<'a>(&'a self, _config: &'a ResolvedProfileConfig) -> future::ProvideCredentials<'a> {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        future::ProvideCredentials::new(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.respond)(call_number)
        })
    }
}
