/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The credentials provider capability shared by every delivery mode.
//!
//! Environment injection, the EC2 metadata server and the ECS metadata server all consume
//! a [`ProvideCredentials`] rather than a concrete provider so that tests can substitute
//! canned credentials or failures.

use crate::Credentials;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

type BoxError = Arc<dyn Error + Send + Sync + 'static>;

/// Error returned when credentials could not be provided.
///
/// `CredentialsError` is `Clone` so that every caller waiting on the same refresh observes an
/// identical error value.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CredentialsError {
    /// No credentials were available for this provider
    CredentialsNotLoaded,

    /// The provider was given an invalid configuration
    ///
    /// For example:
    /// - a session token duration outside the range STS accepts
    /// - an MFA-gated chain with neither an MFA token nor an MFA prompt
    InvalidConfiguration(BoxError),

    /// The provider experienced an error during credential resolution
    ///
    /// This includes remote rejections such as a denied role assumption or an expired MFA
    /// code, as well as network failures talking to STS or SSO.
    ProviderError(BoxError),

    /// The caller stopped waiting before credentials were available
    ///
    /// Only the cancelled caller receives this error. Any refresh already in progress keeps
    /// running for the other callers.
    Cancelled,

    /// An unexpected error occurred during credential resolution
    ///
    /// If the error is something that can occur during expected usage of a provider, `ProviderError`
    /// should be returned instead. Unhandled is reserved for exceptional cases, for example a
    /// refresh task that panicked.
    Unhandled(BoxError),
}

impl CredentialsError {
    /// Creates a [`CredentialsError::InvalidConfiguration`] from the given source.
    pub fn invalid_configuration(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        CredentialsError::InvalidConfiguration(source.into().into())
    }

    /// Creates a [`CredentialsError::ProviderError`] from the given source.
    pub fn provider_error(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        CredentialsError::ProviderError(source.into().into())
    }

    /// Creates a [`CredentialsError::Unhandled`] from the given source.
    pub fn unhandled(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        CredentialsError::Unhandled(source.into().into())
    }

    /// Returns true if this error is [`CredentialsError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CredentialsError::Cancelled)
    }
}

impl Display for CredentialsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CredentialsError::CredentialsNotLoaded => {
                write!(f, "the provider could not provide credentials or required configuration was not set")
            }
            CredentialsError::InvalidConfiguration(_) => {
                write!(f, "the credentials provider was not properly configured")
            }
            CredentialsError::ProviderError(_) => {
                write!(f, "an error occurred while loading credentials")
            }
            CredentialsError::Cancelled => write!(f, "credential retrieval was cancelled"),
            CredentialsError::Unhandled(_) => write!(f, "unexpected credentials error"),
        }
    }
}

impl Error for CredentialsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CredentialsError::InvalidConfiguration(err)
            | CredentialsError::ProviderError(err)
            | CredentialsError::Unhandled(err) => Some(err.as_ref() as _),
            CredentialsError::CredentialsNotLoaded | CredentialsError::Cancelled => None,
        }
    }
}

/// Result type for credential providers.
pub type Result = std::result::Result<Credentials, CredentialsError>;

/// Convenience future types
pub mod future {
    use pin_project_lite::pin_project;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

    pin_project! {
        /// Future new-type that `ProvideCredentials::provide_credentials` must return.
        ///
        /// Ready values skip the boxing entirely.
        pub struct ProvideCredentials<'a> {
            #[pin]
            inner: NowOrLater<'a>,
        }
    }

    pin_project! {
        #[project = NowOrLaterProj]
        enum NowOrLater<'a> {
            Now { value: Option<super::Result> },
            Later { future: BoxFuture<'a, super::Result> },
        }
    }

    impl<'a> ProvideCredentials<'a> {
        /// Creates a `ProvideCredentials` struct from a future.
        pub fn new(future: impl Future<Output = super::Result> + Send + 'a) -> Self {
            ProvideCredentials {
                inner: NowOrLater::Later {
                    future: Box::pin(future),
                },
            }
        }

        /// Creates a `ProvideCredentials` struct from a resolved credentials value.
        pub fn ready(credentials: super::Result) -> Self {
            ProvideCredentials {
                inner: NowOrLater::Now {
                    value: Some(credentials),
                },
            }
        }
    }

    impl std::fmt::Debug for ProvideCredentials<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ProvideCredentials").finish_non_exhaustive()
        }
    }

    impl Future for ProvideCredentials<'_> {
        type Output = super::Result;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            match self.project().inner.project() {
                NowOrLaterProj::Now { value } => match value.take() {
                    Some(value) => Poll::Ready(value),
                    None => Poll::Ready(Err(super::CredentialsError::unhandled(
                        "credentials future polled after completion",
                    ))),
                },
                NowOrLaterProj::Later { future } => future.as_mut().poll(cx),
            }
        }
    }
}

/// Asynchronous Credentials Provider
pub trait ProvideCredentials: Send + Sync + Debug {
    /// Returns a future that provides credentials.
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a;
}

impl ProvideCredentials for Credentials {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::ready(Ok(self.clone()))
    }
}

impl ProvideCredentials for Arc<dyn ProvideCredentials> {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        self.as_ref().provide_credentials()
    }
}

/// Credentials Provider wrapper that may be shared
///
/// Newtype wrapper around ProvideCredentials that implements Clone using an internal
/// Arc. Metadata servers hold one of these per provider instance; request handlers clone it
/// instead of the provider.
#[derive(Clone, Debug)]
pub struct SharedCredentialsProvider(Arc<dyn ProvideCredentials>);

impl SharedCredentialsProvider {
    /// Create a new SharedCredentials provider from `ProvideCredentials`
    ///
    /// The given provider will be wrapped in an internal `Arc`. If your
    /// provider is already in an `Arc`, use `SharedCredentialsProvider::from(provider)` instead.
    pub fn new(provider: impl ProvideCredentials + 'static) -> Self {
        Self(Arc::new(provider))
    }
}

impl AsRef<dyn ProvideCredentials> for SharedCredentialsProvider {
    fn as_ref(&self) -> &(dyn ProvideCredentials + 'static) {
        self.0.as_ref()
    }
}

impl From<Arc<dyn ProvideCredentials>> for SharedCredentialsProvider {
    fn from(provider: Arc<dyn ProvideCredentials>) -> Self {
        SharedCredentialsProvider(provider)
    }
}

impl ProvideCredentials for SharedCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        self.0.provide_credentials()
    }
}

/// A [`ProvideCredentials`] implemented by a closure.
///
/// See [`provide_credentials_fn`] for more details.
#[derive(Copy, Clone)]
pub struct ProvideCredentialsFn<'c, T> {
    f: T,
    phantom: PhantomData<&'c T>,
}

impl<T> Debug for ProvideCredentialsFn<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ProvideCredentialsFn")
    }
}

impl<'c, T, F> ProvideCredentials for ProvideCredentialsFn<'c, T>
where
    T: Fn() -> F + Send + Sync + 'c,
    F: Future<Output = Result> + Send + 'static,
{
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new((self.f)())
    }
}

/// Returns a new credentials provider built with the given closure. This allows you
/// to create an [`ProvideCredentials`] implementation from an async block that returns
/// a [`Result`].
///
/// # Examples
///
/// ```no_run
/// use aws_vault_types::Credentials;
/// use aws_vault_types::provider::{provide_credentials_fn, CredentialsError};
///
/// async fn load_credentials() -> Credentials {
///     todo!()
/// }
///
/// provide_credentials_fn(|| async {
///     let credentials = load_credentials().await;
///     Ok::<_, CredentialsError>(credentials)
/// });
/// ```
pub fn provide_credentials_fn<'c, T, F>(f: T) -> ProvideCredentialsFn<'c, T>
where
    T: Fn() -> F + Send + Sync + 'c,
    F: Future<Output = Result> + Send + 'static,
{
    ProvideCredentialsFn {
        f,
        phantom: Default::default(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::error::Error as _;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn shared_provider_is_send_sync() {
        assert_send_sync::<SharedCredentialsProvider>();
        assert_send_sync::<CredentialsError>();
    }

    #[tokio::test]
    async fn static_credentials_resolve_immediately() {
        let creds = Credentials::from_keys("akid", "secret", None);
        let provider = SharedCredentialsProvider::new(creds.clone());
        assert_eq!(provider.provide_credentials().await.unwrap(), creds);
    }

    #[tokio::test]
    async fn closure_backed_provider() {
        let provider = provide_credentials_fn(|| async {
            Ok::<_, CredentialsError>(Credentials::from_keys("akid", "secret", None))
        });
        let creds = provider.provide_credentials().await.unwrap();
        assert_eq!(creds.access_key_id(), "akid");
    }

    #[tokio::test]
    async fn errors_are_cloned_with_their_source() {
        let provider = SharedCredentialsProvider::new(provide_credentials_fn(|| async {
            Err::<Credentials, _>(CredentialsError::provider_error("AccessDenied: not authorized"))
        }));
        let err = provider.provide_credentials().await.unwrap_err();
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert_eq!(
            cloned.source().map(|s| s.to_string()),
            Some("AccessDenied: not authorized".to_string())
        );
        assert!(!cloned.is_cancelled());
    }
}
