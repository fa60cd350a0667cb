/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use zeroize::Zeroizing;

/// AWS credentials handed out to subprocesses and metadata servers.
///
/// When `Credentials` is dropped, its contents are zeroed in memory. Credentials uses an interior
/// Arc so that clones share one allocation rather than copying the secret around.
///
/// Credentials without an expiry are long-lived IAM user keys: [`can_expire`](Credentials::can_expire)
/// is `false` and they are never refreshed.
///
/// Equality compares the key material and expiry; the provider name is informational only.
#[derive(Clone)]
pub struct Credentials(Arc<Inner>);

#[derive(Clone)]
struct Inner {
    access_key_id: Zeroizing<String>,
    secret_access_key: Zeroizing<String>,
    session_token: Zeroizing<Option<String>>,

    /// A SystemTime at which the credentials should no longer be used.
    ///
    /// `None` for keys that never expire.
    expires_after: Option<SystemTime>,

    provider_name: &'static str,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut creds = f.debug_struct("Credentials");
        creds
            .field("provider_name", &self.0.provider_name)
            .field("access_key_id", &self.0.access_key_id.as_str())
            .field("secret_access_key", &"** redacted **");
        if self.0.session_token.is_some() {
            creds.field("session_token", &"** redacted **");
        }
        match self.expiry() {
            Some(expiry) => match crate::date_time::fmt_iso8601(expiry) {
                Ok(formatted) => creds.field("expires_after", &formatted),
                Err(_) => creds.field("expires_after", &expiry),
            },
            None => creds.field("expires_after", &"never"),
        };
        creds.finish()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.0.access_key_id == other.0.access_key_id
            && self.0.secret_access_key == other.0.secret_access_key
            && self.0.session_token == other.0.session_token
            && self.0.expires_after == other.0.expires_after
    }
}

impl Eq for Credentials {}

const STATIC_CREDENTIALS: &str = "Static";

impl Credentials {
    /// Creates `Credentials`.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        expires_after: Option<SystemTime>,
        provider_name: &'static str,
    ) -> Self {
        Credentials(Arc::new(Inner {
            access_key_id: Zeroizing::new(access_key_id.into()),
            secret_access_key: Zeroizing::new(secret_access_key.into()),
            session_token: Zeroizing::new(session_token),
            expires_after,
            provider_name,
        }))
    }

    /// Creates non-expiring `Credentials` from an access key pair.
    pub fn from_keys(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self::new(
            access_key_id,
            secret_access_key,
            session_token,
            None,
            STATIC_CREDENTIALS,
        )
    }

    /// Returns the access key ID.
    pub fn access_key_id(&self) -> &str {
        &self.0.access_key_id
    }

    /// Returns the secret access key.
    pub fn secret_access_key(&self) -> &str {
        &self.0.secret_access_key
    }

    /// Returns the session token.
    pub fn session_token(&self) -> Option<&str> {
        self.0.session_token.as_deref()
    }

    /// Returns the time when the credentials will expire.
    pub fn expiry(&self) -> Option<SystemTime> {
        self.0.expires_after
    }

    /// Returns the name of the provider that produced these credentials.
    pub fn provider_name(&self) -> &'static str {
        self.0.provider_name
    }

    /// Whether these credentials carry an expiry at all.
    pub fn can_expire(&self) -> bool {
        self.0.expires_after.is_some()
    }

    /// Returns true if the credentials expire before `now + window`.
    ///
    /// Credentials that cannot expire are never considered expiring.
    pub fn expires_within(&self, now: SystemTime, window: Duration) -> bool {
        match self.0.expires_after {
            Some(expiry) => now + window >= expiry,
            None => false,
        }
    }
}

#[cfg(feature = "test-util")]
impl Credentials {
    /// Creates test `Credentials` with a session token that expire at `expiry`.
    pub fn for_tests_expiring(expiry: SystemTime) -> Self {
        Self::new(
            "ASIANOTREAL",
            "notrealrnrELgWzOk3IfjzDKtFBhDby",
            Some("notarealsessiontoken".to_string()),
            Some(expiry),
            "test",
        )
    }
}
