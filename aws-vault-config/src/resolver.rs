/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Turns a [`ResolvedProfileConfig`] into fresh credentials.
//!
//! Resolution is a sequence of remote calls:
//!
//! 1. Load the root profile's long-lived keys.
//! 2. If the profile requires MFA and session tokens are enabled, exchange those keys and an
//!    MFA code for a session token.
//! 3. Walk the source chain from the outermost hop, assuming each hop's role with the
//!    credentials produced so far.
//!
//! SSO profiles skip all of this and exchange an SSO access token for role credentials
//! instead. Nothing here caches: every call to [`ResolveCredentials::resolve`] is one full
//! attempt, and the first failing step aborts it.

use crate::mfa::{MfaChallenge, MfaToken, MfaTokenFetchError, ProvideMfaToken};
use crate::profile::{ChainHop, ConfigurationError, ResolvedProfileConfig, SsoSettings};
use crate::sts::{AssumeRoleInput, GetSessionTokenInput, SsoClient, StsClient, StsError};
use aws_vault_types::error::DisplayErrorContext;
use aws_vault_types::provider::{
    self, future, CredentialsError, ProvideCredentials, SharedCredentialsProvider,
};
use aws_vault_types::time::SharedTimeSource;
use aws_vault_types::Credentials;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::Instrument;

/// Resolves a configuration into credentials, with no caching
pub trait ResolveCredentials: Send + Sync + Debug {
    /// Performs one resolution attempt for `config`.
    fn resolve<'a>(&'a self, config: &'a ResolvedProfileConfig) -> future::ProvideCredentials<'a>;
}

/// A chain step that failed
///
/// Returned inside [`CredentialsError::ProviderError`]; use `Error::source` and downcast to
/// find out which step of the chain failed.
#[derive(Debug)]
#[non_exhaustive]
pub enum ResolutionError {
    /// The MFA prompt failed or was cancelled
    MfaPrompt {
        /// The MFA device a code was requested for
        mfa_serial: String,
        /// Underlying cause
        source: MfaTokenFetchError,
    },

    /// `GetSessionToken` failed
    GetSessionToken {
        /// Profile whose keys signed the call
        profile: String,
        /// Underlying cause
        source: StsError,
    },

    /// `AssumeRole` failed at one hop of the chain
    AssumeRole {
        /// Index of the hop in the source chain
        hop: usize,
        /// Profile of the hop
        profile: String,
        /// Role that could not be assumed
        role_arn: String,
        /// Underlying cause
        source: StsError,
    },

    /// No SSO access token could be obtained
    SsoToken {
        /// SSO start URL
        start_url: String,
        /// Underlying cause
        source: StsError,
    },

    /// The SSO access token could not be exchanged for role credentials
    SsoRoleCredentials {
        /// Target account
        account_id: String,
        /// Target role
        role_name: String,
        /// Underlying cause
        source: StsError,
    },

    /// The root profile's long-lived keys could not be loaded
    BaseCredentials {
        /// Root profile
        profile: String,
        /// Underlying cause
        source: CredentialsError,
    },
}

impl Display for ResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::MfaPrompt { mfa_serial, .. } => {
                write!(f, "failed to get an MFA code for `{}`", mfa_serial)
            }
            ResolutionError::GetSessionToken { profile, .. } => {
                write!(f, "failed to get a session token for `{}`", profile)
            }
            ResolutionError::AssumeRole {
                hop,
                profile,
                role_arn,
                ..
            } => write!(
                f,
                "failed to assume role `{}` for `{}` (chain hop {})",
                role_arn, profile, hop
            ),
            ResolutionError::SsoToken { start_url, .. } => {
                write!(f, "failed to get an SSO access token from `{}`", start_url)
            }
            ResolutionError::SsoRoleCredentials {
                account_id,
                role_name,
                ..
            } => write!(
                f,
                "failed to get SSO credentials for role `{}` in account `{}`",
                role_name, account_id
            ),
            ResolutionError::BaseCredentials { profile, .. } => {
                write!(f, "failed to load long-lived keys for `{}`", profile)
            }
        }
    }
}

impl Error for ResolutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResolutionError::MfaPrompt { source, .. } => Some(source),
            ResolutionError::GetSessionToken { source, .. }
            | ResolutionError::AssumeRole { source, .. }
            | ResolutionError::SsoToken { source, .. }
            | ResolutionError::SsoRoleCredentials { source, .. } => Some(source),
            ResolutionError::BaseCredentials { source, .. } => Some(source),
        }
    }
}

impl From<ResolutionError> for CredentialsError {
    fn from(err: ResolutionError) -> Self {
        CredentialsError::provider_error(err)
    }
}

/// Resolves profile chains through STS and SSO
///
/// The resolver is stateless beyond a single call. Every capability it needs is injected:
/// - the long-lived keys of the root profile
/// - an [`StsClient`] for session tokens and role assumption
/// - an [`SsoClient`] for SSO profiles
/// - an MFA prompt, for chains that need a code the operator did not supply up front
#[derive(Clone, Debug, Default)]
pub struct SessionChainResolver {
    base_credentials: Option<SharedCredentialsProvider>,
    sts: Option<Arc<dyn StsClient>>,
    sso: Option<Arc<dyn SsoClient>>,
    mfa_prompt: Option<Arc<dyn ProvideMfaToken>>,
    time_source: SharedTimeSource,
}

impl SessionChainResolver {
    /// Returns a builder for `SessionChainResolver`.
    pub fn builder() -> Builder {
        Builder::default()
    }

    async fn resolve_chain(&self, config: &ResolvedProfileConfig) -> provider::Result {
        config
            .validate()
            .map_err(CredentialsError::invalid_configuration)?;
        self.check_mfa_input(config)
            .map_err(CredentialsError::invalid_configuration)?;

        if let Some(sso) = config.sso() {
            return self
                .sso_role_credentials(sso)
                .instrument(tracing::info_span!(
                    "sso_role_credentials",
                    account_id = %sso.account_id(),
                    role_name = %sso.role_name()
                ))
                .await;
        }

        let root = config.root_profile().ok_or_else(|| {
            CredentialsError::invalid_configuration(ConfigurationError::EmptyChain {
                profile: config.profile_name().to_string(),
            })
        })?;
        let mut creds = self
            .base_credentials(root)
            .instrument(tracing::info_span!("load_base_credentials", profile = %root.profile_name()))
            .await?;
        if config.is_long_lived() {
            tracing::debug!(profile = %root.profile_name(), "no MFA, SSO or role configured, using long-lived keys");
            return Ok(creds);
        }

        let uses_session_token = config.uses_session_token();
        if uses_session_token {
            creds = self
                .session_token(config, root, &creds)
                .instrument(tracing::info_span!("load_session_token", profile = %root.profile_name()))
                .await?;
        }

        let mut first_role = true;
        for (index, hop) in config.source_chain().iter().enumerate() {
            let role_arn = match hop.get_role_arn() {
                Some(role_arn) => role_arn,
                None => continue,
            };
            let mfa_serial = role_mfa_serial(config, hop, first_role, uses_session_token);
            creds = self
                .assume_role(config, index, hop, role_arn, mfa_serial, &creds)
                .instrument(tracing::info_span!("assume_role", hop = index, role_arn = %role_arn))
                .await?;
            first_role = false;
        }
        Ok(creds)
    }

    fn check_mfa_input(&self, config: &ResolvedProfileConfig) -> Result<(), ConfigurationError> {
        if self.mfa_prompt.is_some() || config.sso().is_some() {
            return Ok(());
        }
        let session_serial = config
            .mfa()
            .filter(|_| config.uses_session_token())
            .map(|mfa| mfa.serial());
        let mut first_role = true;
        let mut role_serials = Vec::new();
        for hop in config.source_chain() {
            if hop.get_role_arn().is_some() {
                role_serials.extend(role_mfa_serial(
                    config,
                    hop,
                    first_role,
                    config.uses_session_token(),
                ));
                first_role = false;
            }
        }
        for serial in session_serial.into_iter().chain(role_serials) {
            if supplied_token(config, serial).is_none() {
                return Err(ConfigurationError::MissingMfaInput {
                    mfa_serial: serial.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn base_credentials(&self, root: &ChainHop) -> provider::Result {
        let base = self.base_credentials.as_ref().ok_or_else(|| {
            CredentialsError::invalid_configuration("no provider for long-lived keys was configured")
        })?;
        match base.provide_credentials().await {
            Ok(creds) => {
                tracing::debug!(creds = ?creds, "loaded long-lived keys");
                Ok(creds)
            }
            Err(err) => {
                tracing::warn!(error = %DisplayErrorContext(&err), "failed to load long-lived keys");
                Err(ResolutionError::BaseCredentials {
                    profile: root.profile_name().to_string(),
                    source: err,
                }
                .into())
            }
        }
    }

    async fn session_token(
        &self,
        config: &ResolvedProfileConfig,
        root: &ChainHop,
        creds: &Credentials,
    ) -> provider::Result {
        let sts = self.sts()?;
        let mfa_serial = config.mfa().map(|mfa| mfa.serial().to_string());
        let token_code = match &mfa_serial {
            Some(serial) => Some(self.mfa_token(config, serial).await?),
            None => None,
        };
        let input = GetSessionTokenInput {
            duration: config.effective_session_token_duration(),
            mfa_serial,
            token_code,
        };
        match sts.get_session_token(creds, input).await {
            Ok(session) => {
                tracing::info!(creds = ?session, "loaded session token");
                Ok(session)
            }
            Err(err) => {
                tracing::warn!(error = %DisplayErrorContext(&err), "failed to get a session token");
                Err(ResolutionError::GetSessionToken {
                    profile: root.profile_name().to_string(),
                    source: err,
                }
                .into())
            }
        }
    }

    async fn assume_role(
        &self,
        config: &ResolvedProfileConfig,
        index: usize,
        hop: &ChainHop,
        role_arn: &str,
        mfa_serial: Option<&str>,
        creds: &Credentials,
    ) -> provider::Result {
        let sts = self.sts()?;
        let token_code = match mfa_serial {
            Some(serial) => Some(self.mfa_token(config, serial).await?),
            None => None,
        };
        let input = AssumeRoleInput {
            role_arn: role_arn.to_string(),
            role_session_name: hop
                .get_role_session_name()
                .map(ToString::to_string)
                .unwrap_or_else(|| self.default_session_name()),
            external_id: hop.get_external_id().map(ToString::to_string),
            duration: hop.get_duration().unwrap_or(config.assume_role_duration()),
            mfa_serial: mfa_serial.map(ToString::to_string),
            token_code,
        };
        match sts.assume_role(creds, input).await {
            Ok(assumed) => {
                tracing::info!(creds = ?assumed, "loaded assume role credentials");
                Ok(assumed)
            }
            Err(err) => {
                tracing::warn!(error = %DisplayErrorContext(&err), "failed to assume role");
                Err(ResolutionError::AssumeRole {
                    hop: index,
                    profile: hop.profile_name().to_string(),
                    role_arn: role_arn.to_string(),
                    source: err,
                }
                .into())
            }
        }
    }

    async fn sso_role_credentials(&self, sso: &SsoSettings) -> provider::Result {
        let client = self.sso.as_ref().ok_or_else(|| {
            CredentialsError::invalid_configuration("the profile uses SSO but no SSO client was configured")
        })?;
        let token = client
            .access_token(sso.start_url(), sso.region(), sso.use_stdout())
            .await
            .map_err(|source| ResolutionError::SsoToken {
                start_url: sso.start_url().to_string(),
                source,
            })?;
        let creds = client
            .get_role_credentials(&token, sso.region(), sso.account_id(), sso.role_name())
            .await
            .map_err(|source| ResolutionError::SsoRoleCredentials {
                account_id: sso.account_id().to_string(),
                role_name: sso.role_name().to_string(),
                source,
            })?;
        tracing::info!(creds = ?creds, "loaded SSO role credentials");
        Ok(creds)
    }

    async fn mfa_token(
        &self,
        config: &ResolvedProfileConfig,
        mfa_serial: &str,
    ) -> Result<MfaToken, CredentialsError> {
        if let Some(token) = supplied_token(config, mfa_serial) {
            return Ok(MfaToken::from(token));
        }
        let prompt_error = |source| ResolutionError::MfaPrompt {
            mfa_serial: mfa_serial.to_string(),
            source,
        };
        let prompt = self
            .mfa_prompt
            .as_ref()
            .ok_or_else(|| prompt_error(MfaTokenFetchError::NoMfaTokenProviderConfigured))?;
        let challenge = MfaChallenge::new(mfa_serial, config.profile_name());
        let token = prompt
            .mfa_token(&challenge)
            .instrument(tracing::info_span!("mfa_prompt", mfa_serial = %mfa_serial))
            .await
            .map_err(prompt_error)?;
        Ok(token)
    }

    fn sts(&self) -> Result<&dyn StsClient, CredentialsError> {
        self.sts.as_deref().ok_or_else(|| {
            CredentialsError::invalid_configuration("the chain needs STS but no STS client was configured")
        })
    }

    fn default_session_name(&self) -> String {
        let nanos = self
            .time_source
            .now()
            .duration_since(UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_nanos())
            .unwrap_or_default();
        format!("aws-vault-{}", nanos)
    }
}

// The MFA serial gating a role hop. A session token already carries MFA; otherwise the
// profile's device gates the first role and each hop may name its own.
fn role_mfa_serial<'a>(
    config: &'a ResolvedProfileConfig,
    hop: &'a ChainHop,
    first_role: bool,
    uses_session_token: bool,
) -> Option<&'a str> {
    if uses_session_token {
        return None;
    }
    hop.get_mfa_serial().or_else(|| {
        config
            .mfa()
            .filter(|_| first_role)
            .map(|mfa| mfa.serial())
    })
}

fn supplied_token<'a>(config: &'a ResolvedProfileConfig, mfa_serial: &str) -> Option<&'a str> {
    config
        .mfa()
        .filter(|mfa| mfa.serial() == mfa_serial)
        .and_then(|mfa| mfa.token())
}

impl ResolveCredentials for SessionChainResolver {
    fn resolve<'a>(&'a self, config: &'a ResolvedProfileConfig) -> future::ProvideCredentials<'a> {
        future::ProvideCredentials::new(self.resolve_chain(config).instrument(tracing::info_span!(
            "resolve_chain",
            profile = %config.profile_name()
        )))
    }
}

/// Builder for [`SessionChainResolver`]
#[derive(Debug, Default)]
pub struct Builder {
    inner: SessionChainResolver,
}

impl Builder {
    /// Sets the provider of the root profile's long-lived keys.
    pub fn base_credentials(mut self, provider: impl ProvideCredentials + 'static) -> Self {
        self.inner.base_credentials = Some(SharedCredentialsProvider::new(provider));
        self
    }

    /// Sets the STS client.
    pub fn sts_client(mut self, client: impl StsClient + 'static) -> Self {
        self.inner.sts = Some(Arc::new(client));
        self
    }

    /// Sets the SSO client.
    pub fn sso_client(mut self, client: impl SsoClient + 'static) -> Self {
        self.inner.sso = Some(Arc::new(client));
        self
    }

    /// Sets the MFA prompt.
    pub fn mfa_prompt(mut self, prompt: impl ProvideMfaToken + 'static) -> Self {
        self.inner.mfa_prompt = Some(Arc::new(prompt));
        self
    }

    /// Sets the time source used for default role session names.
    pub fn time_source(mut self, time_source: SharedTimeSource) -> Self {
        self.inner.time_source = time_source;
        self
    }

    /// Builds the resolver.
    pub fn build(self) -> SessionChainResolver {
        self.inner
    }
}
