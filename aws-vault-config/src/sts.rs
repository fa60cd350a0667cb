/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Request/response primitives of the STS and SSO APIs.
//!
//! The HTTP clients live outside this crate and implement [`StsClient`] and [`SsoClient`].

use crate::mfa::MfaToken;
use async_trait::async_trait;
use aws_vault_types::Credentials;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::time::Duration;
use zeroize::Zeroizing;

/// Input of `GetSessionToken`
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct GetSessionTokenInput {
    /// Requested lifetime of the session
    pub duration: Duration,
    /// MFA device, when MFA is required
    pub mfa_serial: Option<String>,
    /// MFA code for `mfa_serial`
    pub token_code: Option<MfaToken>,
}

/// Input of `AssumeRole`
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct AssumeRoleInput {
    /// Role to assume
    pub role_arn: String,
    /// Session name recorded in CloudTrail
    pub role_session_name: String,
    /// External ID required by the role's trust policy
    pub external_id: Option<String>,
    /// Requested lifetime of the role session
    pub duration: Duration,
    /// MFA device, when this hop is MFA-gated
    pub mfa_serial: Option<String>,
    /// MFA code for `mfa_serial`
    pub token_code: Option<MfaToken>,
}

/// An SSO access token
#[derive(Clone)]
pub struct SsoAccessToken(Zeroizing<String>);

impl SsoAccessToken {
    /// Wraps a token.
    pub fn new(token: impl Into<String>) -> Self {
        SsoAccessToken(Zeroizing::new(token.into()))
    }

    /// Returns the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for SsoAccessToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SsoAccessToken(** redacted **)")
    }
}

/// A rejected or failed STS/SSO call
#[derive(Debug)]
#[non_exhaustive]
pub enum StsError {
    /// The service answered with an error, for example `AccessDenied` or `ExpiredToken`
    Service {
        /// Error code
        code: String,
        /// Error message
        message: String,
    },

    /// The request never got an answer, for example because of a network failure
    Dispatch(Box<dyn Error + Send + Sync + 'static>),
}

impl StsError {
    /// Creates a [`StsError::Service`].
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        StsError::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a [`StsError::Dispatch`].
    pub fn dispatch(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        StsError::Dispatch(source.into())
    }

    /// Returns the service error code, if the service answered.
    pub fn code(&self) -> Option<&str> {
        match self {
            StsError::Service { code, .. } => Some(code),
            StsError::Dispatch(_) => None,
        }
    }
}

impl Display for StsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StsError::Service { code, message } => write!(f, "{}: {}", code, message),
            StsError::Dispatch(_) => write!(f, "the request could not be dispatched"),
        }
    }
}

impl Error for StsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StsError::Dispatch(err) => Some(err.as_ref() as _),
            StsError::Service { .. } => None,
        }
    }
}

/// The STS operations a chain is resolved with
#[async_trait]
pub trait StsClient: Send + Sync + Debug {
    /// Calls `GetSessionToken`, signed with `credentials`.
    async fn get_session_token(
        &self,
        credentials: &Credentials,
        input: GetSessionTokenInput,
    ) -> Result<Credentials, StsError>;

    /// Calls `AssumeRole`, signed with `credentials`.
    async fn assume_role(
        &self,
        credentials: &Credentials,
        input: AssumeRoleInput,
    ) -> Result<Credentials, StsError>;
}

/// The SSO operations an SSO profile is resolved with
#[async_trait]
pub trait SsoClient: Send + Sync + Debug {
    /// Returns a cached access token for `start_url`, or obtains a new one.
    ///
    /// Obtaining one needs the operator to log in; with `use_stdout` the login URL is printed
    /// to stdout instead of opened in a browser.
    async fn access_token(
        &self,
        start_url: &str,
        region: &str,
        use_stdout: bool,
    ) -> Result<SsoAccessToken, StsError>;

    /// Exchanges `access_token` for credentials of `role_name` in `account_id`.
    async fn get_role_credentials(
        &self,
        access_token: &SsoAccessToken,
        region: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<Credentials, StsError>;
}
