/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Cached temporary credentials for one profile.
//!
//! [`TempCredentialsProvider`] hands out credentials in this order:
//! 1. the credentials of this provider's last resolution, unless they expire within the expiry
//!    window
//! 2. a cached session that stays valid beyond the expiry window
//! 3. the outcome of a refresh through the [`ResolveCredentials`] implementation
//!
//! Only one refresh runs at a time per provider. Callers that arrive while it is running wait
//! for its outcome, success or failure, instead of starting their own.

use crate::profile::{ConfigurationError, ResolvedProfileConfig};
use crate::resolver::ResolveCredentials;
use aws_vault_keyring::cache::CacheError;
use aws_vault_keyring::{CacheKey, CacheRecord, CredentialCache};
use aws_vault_types::error::DisplayErrorContext;
use aws_vault_types::provider::{self, future, CredentialsError, ProvideCredentials};
use aws_vault_types::time::SharedTimeSource;
use aws_vault_types::Credentials;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Cached sessions that expire within this window are refreshed instead of used
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(5 * 60);

type RefreshOutcome = watch::Receiver<Option<provider::Result>>;

/// Credentials provider backed by the credential cache and a chain resolver
///
/// Clones share the cache state, memo and in-flight refresh. Retrieval spawns the refresh onto
/// the current Tokio runtime, so a caller that gives up (see
/// [`retrieve_with_cancellation`](Self::retrieve_with_cancellation)) never aborts the refresh
/// other callers are waiting on.
#[derive(Clone, Debug)]
pub struct TempCredentialsProvider {
    inner: Arc<Inner>,
}

struct Inner {
    config: ResolvedProfileConfig,
    cache_key: CacheKey,
    cache: CredentialCache,
    resolver: Arc<dyn ResolveCredentials>,
    time_source: SharedTimeSource,
    expiry_window: Duration,
    memo: Mutex<Option<Credentials>>,
    in_flight: Mutex<Option<RefreshOutcome>>,
}

impl Debug for Inner {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("profile", &self.config.profile_name())
            .field("cache_key", &self.cache_key.item_name())
            .field("resolver", &self.resolver)
            .field("expiry_window", &self.expiry_window)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TempCredentialsProvider {
    /// Returns a builder for a provider of `config`'s credentials.
    pub fn builder(
        config: ResolvedProfileConfig,
        cache: CredentialCache,
        resolver: impl ResolveCredentials + 'static,
    ) -> Builder {
        Builder {
            config,
            cache,
            resolver: Arc::new(resolver),
            time_source: SharedTimeSource::default(),
            expiry_window: DEFAULT_EXPIRY_WINDOW,
        }
    }

    /// Returns the configuration this provider resolves.
    pub fn config(&self) -> &ResolvedProfileConfig {
        &self.inner.config
    }

    /// Returns the key the provider's sessions are cached under.
    pub fn cache_key(&self) -> &CacheKey {
        &self.inner.cache_key
    }

    /// Returns credentials, refreshing them if nothing usable is cached.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn retrieve(&self) -> provider::Result {
        if let Some(creds) = self.inner.memoized() {
            return Ok(creds);
        }
        if let Some(creds) = self.inner.cached() {
            return Ok(creds);
        }
        let mut outcome = self.inner.join_or_start_refresh();
        let published = outcome
            .wait_for(Option::is_some)
            .await
            .map(|published| published.clone());
        match published {
            Ok(Some(result)) => result,
            Ok(None) | Err(_) => Err(CredentialsError::unhandled(
                "the credentials refresh ended without publishing an outcome",
            )),
        }
    }

    /// Like [`retrieve`](Self::retrieve), but returns [`CredentialsError::Cancelled`] as soon
    /// as `cancellation` fires.
    ///
    /// A refresh already started keeps running for the other callers.
    pub async fn retrieve_with_cancellation(
        &self,
        cancellation: &CancellationToken,
    ) -> provider::Result {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                tracing::debug!(profile = %self.inner.config.profile_name(), "credentials retrieval cancelled");
                Err(CredentialsError::Cancelled)
            }
            result = self.retrieve() => result,
        }
    }

    /// Forgets the last resolved credentials and removes the cached session.
    pub fn invalidate(&self) -> Result<(), CacheError> {
        *lock(&self.inner.memo) = None;
        self.inner.cache.remove(&self.inner.cache_key)
    }
}

impl Inner {
    fn memoized(&self) -> Option<Credentials> {
        let memo = lock(&self.memo);
        let creds = memo.as_ref()?;
        if creds.expires_within(self.time_source.now(), self.expiry_window) {
            None
        } else {
            Some(creds.clone())
        }
    }

    fn cached(&self) -> Option<Credentials> {
        let creds = self.cache.load(&self.cache_key)?.into_credentials();
        if creds.expires_within(self.time_source.now(), self.expiry_window) {
            tracing::debug!(creds = ?creds, "cached session expires soon, refreshing it");
            None
        } else {
            tracing::debug!(creds = ?creds, "using cached session");
            Some(creds)
        }
    }

    fn join_or_start_refresh(self: &Arc<Self>) -> RefreshOutcome {
        let mut in_flight = lock(&self.in_flight);
        if let Some(outcome) = in_flight.as_ref() {
            tracing::debug!("joining the refresh in progress");
            return outcome.clone();
        }
        let (publish, outcome) = watch::channel(None);
        *in_flight = Some(outcome.clone());
        let inner = self.clone();
        tokio::spawn(
            inner
                .refresh(publish)
                .instrument(tracing::info_span!("refresh_credentials")),
        );
        outcome
    }

    async fn refresh(self: Arc<Self>, publish: watch::Sender<Option<provider::Result>>) {
        let clear = ClearInFlight(&*self);
        let result = self.resolve_and_store().await;
        if let Err(err) = &result {
            tracing::warn!(error = %DisplayErrorContext(err), "failed to refresh credentials");
        }
        // callers arriving from here on start a new refresh instead of joining this one
        drop(clear);
        publish.send_replace(Some(result));
    }

    async fn resolve_and_store(&self) -> provider::Result {
        // a previous refresh or another process may have produced a session in the meantime
        if let Some(creds) = self.memoized().or_else(|| self.cached()) {
            return Ok(creds);
        }
        let creds = self.resolver.resolve(&self.config).await?;
        if creds.can_expire() {
            let record =
                CacheRecord::new(self.cache_key.clone(), creds.clone(), self.time_source.now());
            if let Err(err) = self.cache.store(&record) {
                tracing::warn!(error = %DisplayErrorContext(&err), "failed to cache credentials");
            }
        }
        *lock(&self.memo) = Some(creds.clone());
        Ok(creds)
    }
}

struct ClearInFlight<'a>(&'a Inner);

impl Drop for ClearInFlight<'_> {
    fn drop(&mut self) {
        *lock(&self.0.in_flight) = None;
    }
}

impl ProvideCredentials for TempCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.retrieve().instrument(tracing::info_span!(
            "temp_credentials",
            profile = %self.inner.config.profile_name()
        )))
    }
}

/// Builder for [`TempCredentialsProvider`]
#[derive(Debug)]
pub struct Builder {
    config: ResolvedProfileConfig,
    cache: CredentialCache,
    resolver: Arc<dyn ResolveCredentials>,
    time_source: SharedTimeSource,
    expiry_window: Duration,
}

impl Builder {
    /// Sets the clock used for expiry checks and cache timestamps.
    pub fn time_source(mut self, time_source: SharedTimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Sets the expiry window. Defaults to [`DEFAULT_EXPIRY_WINDOW`].
    pub fn expiry_window(mut self, expiry_window: Duration) -> Self {
        self.expiry_window = expiry_window;
        self
    }

    /// Validates the configuration and builds the provider.
    pub fn build(self) -> Result<TempCredentialsProvider, ConfigurationError> {
        self.config.validate()?;
        Ok(TempCredentialsProvider {
            inner: Arc::new(Inner {
                cache_key: self.config.cache_key(),
                config: self.config,
                cache: self.cache,
                resolver: self.resolver,
                time_source: self.time_source,
                expiry_window: self.expiry_window,
                memo: Mutex::new(None),
                in_flight: Mutex::new(None),
            }),
        })
    }
}
