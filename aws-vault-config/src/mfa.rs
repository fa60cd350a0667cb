/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! MFA codes, obtained through an injected prompt.
//!
//! How the code is physically obtained (terminal, GUI dialog, password manager helper) is up to
//! the [`ProvideMfaToken`] implementation. The resolver only sees a challenge going out and a
//! code or an error coming back.

use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::Future;
use std::marker::PhantomData;
use zeroize::Zeroizing;

/// What the operator is being asked for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MfaChallenge {
    mfa_serial: String,
    profile_name: String,
}

impl MfaChallenge {
    /// Creates a challenge for the device `mfa_serial`, on behalf of `profile_name`.
    pub fn new(mfa_serial: impl Into<String>, profile_name: impl Into<String>) -> Self {
        MfaChallenge {
            mfa_serial: mfa_serial.into(),
            profile_name: profile_name.into(),
        }
    }

    /// Returns the MFA device serial.
    pub fn mfa_serial(&self) -> &str {
        &self.mfa_serial
    }

    /// Returns the profile that needs the code.
    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }
}

/// A one-time MFA code
#[derive(Clone)]
pub struct MfaToken(Zeroizing<String>);

impl MfaToken {
    /// Returns the code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for MfaToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MfaToken(** redacted **)")
    }
}

impl From<String> for MfaToken {
    fn from(s: String) -> Self {
        MfaToken(Zeroizing::new(s))
    }
}

impl From<&str> for MfaToken {
    fn from(s: &str) -> Self {
        MfaToken(Zeroizing::new(s.to_string()))
    }
}

/// Failure to obtain an MFA code
#[derive(Debug)]
#[non_exhaustive]
pub enum MfaTokenFetchError {
    /// An MFA code was needed but no prompt was configured
    NoMfaTokenProviderConfigured,

    /// The operator dismissed the prompt, or it timed out
    Cancelled,

    /// The prompt itself failed
    ProviderError {
        /// Underlying cause
        cause: Box<dyn Error + Send + Sync + 'static>,
    },
}

impl MfaTokenFetchError {
    /// Creates a [`MfaTokenFetchError::ProviderError`].
    pub fn provider_error(cause: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        MfaTokenFetchError::ProviderError {
            cause: cause.into(),
        }
    }
}

impl Display for MfaTokenFetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MfaTokenFetchError::NoMfaTokenProviderConfigured => write!(
                f,
                "an MFA token was requested but no provider was configured"
            ),
            MfaTokenFetchError::Cancelled => write!(f, "the MFA prompt was cancelled"),
            MfaTokenFetchError::ProviderError { .. } => {
                write!(f, "an error occurred while fetching an MFA token")
            }
        }
    }
}

impl Error for MfaTokenFetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MfaTokenFetchError::ProviderError { cause } => Some(cause.as_ref() as _),
            _ => None,
        }
    }
}

/// Result of an MFA prompt
pub type Result = std::result::Result<MfaToken, MfaTokenFetchError>;

/// Future wrapper returned by [`ProvideMfaToken`]
pub mod future {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Future returned by [`ProvideMfaToken`](super::ProvideMfaToken)
    pub struct ProvideMfaToken<'a>(Pin<Box<dyn Future<Output = super::Result> + Send + 'a>>);

    impl<'a> ProvideMfaToken<'a> {
        /// Wraps an already obtained result.
        pub fn ready(mfa_token: super::Result) -> Self {
            ProvideMfaToken(Box::pin(std::future::ready(mfa_token)))
        }

        /// Wraps a prompt in progress.
        pub fn new(future: impl Future<Output = super::Result> + Send + 'a) -> Self {
            ProvideMfaToken(Box::pin(future))
        }
    }

    impl std::fmt::Debug for ProvideMfaToken<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ProvideMfaToken").finish_non_exhaustive()
        }
    }

    impl Future for ProvideMfaToken<'_> {
        type Output = super::Result;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            self.0.as_mut().poll(cx)
        }
    }
}

/// Obtains one MFA code per challenge
///
/// A prompt suspends the whole refresh it belongs to, and every caller waiting on that refresh,
/// until it resolves.
pub trait ProvideMfaToken: Send + Sync + Debug {
    /// Asks for a code for `challenge`.
    fn mfa_token<'a>(&'a self, challenge: &'a MfaChallenge) -> future::ProvideMfaToken<'a>;
}

/// A [`ProvideMfaToken`] implemented by a closure
///
/// See [`provide_mfa_token_fn`].
#[derive(Copy, Clone)]
pub struct ProvideMfaTokenFn<'c, T> {
    f: T,
    phantom: PhantomData<&'c T>,
}

impl<T> Debug for ProvideMfaTokenFn<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ProvideMfaTokenFn")
    }
}

impl<'c, T, F> ProvideMfaToken for ProvideMfaTokenFn<'c, T>
where
    T: Fn(MfaChallenge) -> F + Send + Sync + 'c,
    F: Future<Output = Result> + Send + 'static,
{
    fn mfa_token<'a>(&'a self, challenge: &'a MfaChallenge) -> future::ProvideMfaToken<'a> {
        future::ProvideMfaToken::new((self.f)(challenge.clone()))
    }
}

/// Returns an MFA prompt built from an async closure.
///
/// ```rust
/// use aws_vault_config::mfa::{provide_mfa_token_fn, MfaToken, MfaTokenFetchError};
///
/// let scripted = provide_mfa_token_fn(|_challenge| async {
///     Ok::<_, MfaTokenFetchError>(MfaToken::from("123456"))
/// });
/// let refusing = provide_mfa_token_fn(|_challenge| async {
///     Err::<MfaToken, _>(MfaTokenFetchError::Cancelled)
/// });
/// # let _ = (scripted, refusing);
/// ```
pub fn provide_mfa_token_fn<'c, T, F>(f: T) -> ProvideMfaTokenFn<'c, T>
where
    T: Fn(MfaChallenge) -> F + Send + Sync + 'c,
    F: Future<Output = Result> + Send + 'static,
{
    ProvideMfaTokenFn {
        f,
        phantom: Default::default(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn closure_prompt_sees_the_challenge() {
        let prompt = provide_mfa_token_fn(|challenge: MfaChallenge| async move {
            assert_eq!(challenge.mfa_serial(), "arn:aws:iam::111:mfa/ops");
            Ok::<_, MfaTokenFetchError>(MfaToken::from(format!(
                "code-for-{}",
                challenge.profile_name()
            )))
        });
        let challenge = MfaChallenge::new("arn:aws:iam::111:mfa/ops", "prod");
        let token = prompt.mfa_token(&challenge).await.unwrap();
        assert_eq!(token.as_str(), "code-for-prod");
        assert_eq!(format!("{:?}", token), "MfaToken(** redacted **)");
    }
}
