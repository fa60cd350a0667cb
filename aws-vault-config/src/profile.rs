/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The fully resolved configuration of one profile and its source chain.
//!
//! Loading and merging profile definitions happens elsewhere; by the time a
//! [`ResolvedProfileConfig`] exists every inherited value has been applied. It is treated as
//! immutable by everything in this crate.

use aws_vault_keyring::{CacheKey, RoleKey};
use std::borrow::Cow;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::ops::RangeInclusive;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Session token lifetime when the chain has no role to assume
pub const DEFAULT_SESSION_TOKEN_DURATION: Duration = HOUR;

/// Session token lifetime when a role is assumed with the session token
///
/// Role assumption cannot outlive the session it is made from, so chained sessions are longer.
pub const DEFAULT_CHAINED_SESSION_TOKEN_DURATION: Duration = Duration::from_secs(8 * 60 * 60);

/// Lifetime requested for every role assumption that doesn't set its own
pub const DEFAULT_ASSUME_ROLE_DURATION: Duration = HOUR;

/// Durations STS accepts for `GetSessionToken`
pub const SESSION_TOKEN_DURATION_RANGE: RangeInclusive<Duration> =
    Duration::from_secs(15 * 60)..=Duration::from_secs(36 * 60 * 60);

/// Durations STS accepts for `AssumeRole`
pub const ASSUME_ROLE_DURATION_RANGE: RangeInclusive<Duration> =
    Duration::from_secs(15 * 60)..=Duration::from_secs(12 * 60 * 60);

/// One profile in a source chain
///
/// A hop without a role ARN contributes nothing but its name; the first hop of a chain is the
/// profile whose long-lived keys sign the first request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainHop {
    profile_name: String,
    role_arn: Option<String>,
    external_id: Option<String>,
    role_session_name: Option<String>,
    duration: Option<Duration>,
    mfa_serial: Option<String>,
}

impl ChainHop {
    /// Creates a hop for `profile_name` with no role.
    pub fn new(profile_name: impl Into<String>) -> Self {
        ChainHop {
            profile_name: profile_name.into(),
            role_arn: None,
            external_id: None,
            role_session_name: None,
            duration: None,
            mfa_serial: None,
        }
    }

    /// Sets the role assumed at this hop.
    pub fn role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Sets the external ID sent with the role assumption.
    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Sets the role session name sent with the role assumption.
    pub fn role_session_name(mut self, role_session_name: impl Into<String>) -> Self {
        self.role_session_name = Some(role_session_name.into());
        self
    }

    /// Overrides the assume-role duration for this hop.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets the MFA device that gates this hop's role assumption.
    pub fn mfa_serial(mut self, mfa_serial: impl Into<String>) -> Self {
        self.mfa_serial = Some(mfa_serial.into());
        self
    }

    /// Returns the profile name.
    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    fn role_key(&self) -> Option<RoleKey> {
        let role_arn = self.role_arn.as_ref()?;
        Some(
            RoleKey::new(role_arn.clone())
                .with_external_id(self.external_id.clone())
                .with_role_session_name(self.role_session_name.clone())
                .with_duration(self.duration)
                .with_mfa_serial(self.mfa_serial.clone()),
        )
    }

    /// Returns the role assumed at this hop, if any.
    pub fn get_role_arn(&self) -> Option<&str> {
        self.role_arn.as_deref()
    }

    /// Returns the external ID, if any.
    pub fn get_external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    /// Returns the role session name, if any.
    pub fn get_role_session_name(&self) -> Option<&str> {
        self.role_session_name.as_deref()
    }

    /// Returns the hop's own assume-role duration, if any.
    pub fn get_duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Returns the hop's MFA serial, if any.
    pub fn get_mfa_serial(&self) -> Option<&str> {
        self.mfa_serial.as_deref()
    }
}

/// MFA device and, optionally, a code the operator already supplied
#[derive(Clone, PartialEq, Eq)]
pub struct MfaSettings {
    serial: String,
    token: Option<String>,
}

impl fmt::Debug for MfaSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaSettings")
            .field("serial", &self.serial)
            .field("token", &self.token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

impl MfaSettings {
    /// Creates settings for the device `serial`; codes will be prompted for.
    pub fn new(serial: impl Into<String>) -> Self {
        MfaSettings {
            serial: serial.into(),
            token: None,
        }
    }

    /// Supplies a code up front. A supplied code takes precedence over prompting.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the device serial.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the supplied code, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// Parameters of an SSO profile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SsoSettings {
    start_url: String,
    region: String,
    account_id: String,
    role_name: String,
    use_stdout: bool,
}

impl SsoSettings {
    /// Creates SSO settings.
    pub fn new(
        start_url: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
        role_name: impl Into<String>,
    ) -> Self {
        SsoSettings {
            start_url: start_url.into(),
            region: region.into(),
            account_id: account_id.into(),
            role_name: role_name.into(),
            use_stdout: false,
        }
    }

    /// Prints the SSO login URL to stdout instead of opening a browser.
    pub fn with_stdout(mut self, use_stdout: bool) -> Self {
        self.use_stdout = use_stdout;
        self
    }

    /// Returns the SSO start URL.
    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    /// Returns the region of the SSO portal.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the target account ID.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Returns the permission set (role) name.
    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    /// Whether the SSO login URL is printed to stdout instead of opened in a browser.
    pub fn use_stdout(&self) -> bool {
        self.use_stdout
    }
}

/// Contradictory or missing chain parameters, detected before any remote call
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The source chain holds no profile at all
    EmptyChain {
        /// The profile being resolved
        profile: String,
    },

    /// An SSO profile was also given roles to assume
    SsoWithRoleChain {
        /// The profile being resolved
        profile: String,
    },

    /// A duration is outside the range STS accepts
    InvalidDuration {
        /// Which duration
        name: Cow<'static, str>,
        /// The configured value
        duration: Duration,
        /// The accepted range
        range: RangeInclusive<Duration>,
    },

    /// MFA is required but there is neither a supplied code nor a way to prompt for one
    MissingMfaInput {
        /// The MFA device
        mfa_serial: String,
    },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::EmptyChain { profile } => {
                write!(f, "profile `{}` has an empty source chain", profile)
            }
            ConfigurationError::SsoWithRoleChain { profile } => write!(
                f,
                "profile `{}` uses SSO and cannot also assume roles through a source chain",
                profile
            ),
            ConfigurationError::InvalidDuration {
                name,
                duration,
                range,
            } => write!(
                f,
                "{} of {}s is outside the allowed range of {}s to {}s",
                name,
                duration.as_secs(),
                range.start().as_secs(),
                range.end().as_secs()
            ),
            ConfigurationError::MissingMfaInput { mfa_serial } => write!(
                f,
                "an MFA code is required for `{}` but no MFA token was given and no prompt is available",
                mfa_serial
            ),
        }
    }
}

impl Error for ConfigurationError {}

/// The resolved configuration of the target profile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedProfileConfig {
    profile_name: String,
    region: Option<String>,
    source_chain: Vec<ChainHop>,
    mfa: Option<MfaSettings>,
    sso: Option<SsoSettings>,
    session_token_duration: Duration,
    chained_session_token_duration: Duration,
    assume_role_duration: Duration,
    use_session_token: bool,
}

impl ResolvedProfileConfig {
    /// Creates a builder for the profile `profile_name`.
    pub fn builder(profile_name: impl Into<String>) -> Builder {
        Builder {
            config: ResolvedProfileConfig {
                profile_name: profile_name.into(),
                region: None,
                source_chain: Vec::new(),
                mfa: None,
                sso: None,
                session_token_duration: DEFAULT_SESSION_TOKEN_DURATION,
                chained_session_token_duration: DEFAULT_CHAINED_SESSION_TOKEN_DURATION,
                assume_role_duration: DEFAULT_ASSUME_ROLE_DURATION,
                use_session_token: true,
            },
        }
    }

    /// Returns a builder initialized from this configuration, for applying overrides.
    pub fn to_builder(&self) -> Builder {
        Builder {
            config: self.clone(),
        }
    }

    /// Returns the name of the target profile.
    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    /// Returns the region, if any.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Returns the source chain, outermost (root) profile first.
    pub fn source_chain(&self) -> &[ChainHop] {
        &self.source_chain
    }

    /// Returns the profile whose long-lived keys start the chain.
    pub fn root_profile(&self) -> Option<&ChainHop> {
        self.source_chain.first()
    }

    /// Returns the role of the innermost hop that has one.
    pub fn role_arn(&self) -> Option<&str> {
        self.source_chain
            .iter()
            .rev()
            .find_map(ChainHop::get_role_arn)
    }

    /// Returns all role ARNs of the chain, outermost first.
    pub fn role_arns(&self) -> impl Iterator<Item = &str> {
        self.source_chain.iter().filter_map(ChainHop::get_role_arn)
    }

    /// Returns the MFA settings, if MFA is required.
    pub fn mfa(&self) -> Option<&MfaSettings> {
        self.mfa.as_ref()
    }

    /// Returns the SSO settings, if this is an SSO profile.
    pub fn sso(&self) -> Option<&SsoSettings> {
        self.sso.as_ref()
    }

    /// Returns the duration requested for a session token when no role follows it.
    pub fn session_token_duration(&self) -> Duration {
        self.session_token_duration
    }

    /// Returns the duration requested for a session token that roles are assumed from.
    pub fn chained_session_token_duration(&self) -> Duration {
        self.chained_session_token_duration
    }

    /// Returns the default assume-role duration.
    pub fn assume_role_duration(&self) -> Duration {
        self.assume_role_duration
    }

    /// Whether session tokens may be used at all for this invocation.
    pub fn use_session_token(&self) -> bool {
        self.use_session_token
    }

    /// Whether the chain starts with a `GetSessionToken` call.
    ///
    /// Session tokens are only worth it when they save MFA prompts: they need MFA to be
    /// configured, session tokens to be enabled, and the profile not to be an SSO profile.
    pub fn uses_session_token(&self) -> bool {
        self.use_session_token && self.mfa.is_some() && self.sso.is_none()
    }

    /// Returns the duration the session token will be requested for.
    pub fn effective_session_token_duration(&self) -> Duration {
        if self.role_arns().next().is_some() {
            self.chained_session_token_duration
        } else {
            self.session_token_duration
        }
    }

    /// Whether resolution is nothing more than reading the root profile's long-lived keys.
    pub fn is_long_lived(&self) -> bool {
        self.mfa.is_none() && self.sso.is_none() && self.role_arns().next().is_none()
    }

    /// Checks the configuration for contradictions.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.source_chain.is_empty() && self.sso.is_none() {
            return Err(ConfigurationError::EmptyChain {
                profile: self.profile_name.clone(),
            });
        }
        if self.sso.is_some() && self.role_arns().next().is_some() {
            return Err(ConfigurationError::SsoWithRoleChain {
                profile: self.profile_name.clone(),
            });
        }
        if self.uses_session_token() {
            check_duration(
                "session token duration",
                self.effective_session_token_duration(),
                SESSION_TOKEN_DURATION_RANGE,
            )?;
        }
        for hop in &self.source_chain {
            if hop.role_arn.is_some() {
                check_duration(
                    "assume role duration",
                    hop.duration.unwrap_or(self.assume_role_duration),
                    ASSUME_ROLE_DURATION_RANGE,
                )?;
            }
        }
        Ok(())
    }

    /// Returns the cache key identifying the credentials this configuration resolves to.
    pub fn cache_key(&self) -> CacheKey {
        let mut key = CacheKey::new(
            self.profile_name.clone(),
            self.effective_session_token_duration(),
            self.assume_role_duration,
        )
        .with_roles(self.source_chain.iter().filter_map(ChainHop::role_key))
        .with_mfa_serial(self.mfa.as_ref().map(|mfa| mfa.serial.clone()))
        .with_session_token(self.uses_session_token());
        if let Some(sso) = &self.sso {
            key = key.with_sso_role(&sso.start_url, &sso.account_id, &sso.role_name);
        }
        key
    }
}

fn check_duration(
    name: &'static str,
    duration: Duration,
    range: RangeInclusive<Duration>,
) -> Result<(), ConfigurationError> {
    if range.contains(&duration) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidDuration {
            name: name.into(),
            duration,
            range,
        })
    }
}

/// Builder for [`ResolvedProfileConfig`]
#[derive(Clone, Debug)]
pub struct Builder {
    config: ResolvedProfileConfig,
}

impl Builder {
    /// Sets the region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = Some(region.into());
        self
    }

    /// Appends an inner hop to the source chain.
    pub fn hop(mut self, hop: ChainHop) -> Self {
        self.config.source_chain.push(hop);
        self
    }

    /// Replaces the source chain, outermost first.
    pub fn source_chain(mut self, chain: Vec<ChainHop>) -> Self {
        self.config.source_chain = chain;
        self
    }

    /// Requires MFA.
    pub fn mfa(mut self, mfa: MfaSettings) -> Self {
        self.config.mfa = Some(mfa);
        self
    }

    /// Supplies an MFA code for the configured device. Does nothing if MFA is not required.
    pub fn mfa_token(mut self, token: impl Into<String>) -> Self {
        if let Some(mfa) = self.config.mfa.take() {
            self.config.mfa = Some(mfa.with_token(token));
        }
        self
    }

    /// Makes this an SSO profile.
    pub fn sso(mut self, sso: SsoSettings) -> Self {
        self.config.sso = Some(sso);
        self
    }

    /// Sets the session token duration used when no role follows the session token.
    pub fn session_token_duration(mut self, duration: Duration) -> Self {
        self.config.session_token_duration = duration;
        self
    }

    /// Sets the session token duration used when roles are assumed from the session token.
    pub fn chained_session_token_duration(mut self, duration: Duration) -> Self {
        self.config.chained_session_token_duration = duration;
        self
    }

    /// Sets the default assume-role duration.
    pub fn assume_role_duration(mut self, duration: Duration) -> Self {
        self.config.assume_role_duration = duration;
        self
    }

    /// Enables or disables session tokens for this invocation.
    pub fn use_session_token(mut self, use_session_token: bool) -> Self {
        self.config.use_session_token = use_session_token;
        self
    }

    /// Builds the configuration. Call [`ResolvedProfileConfig::validate`] to check it.
    pub fn build(self) -> ResolvedProfileConfig {
        self.config
    }
}
