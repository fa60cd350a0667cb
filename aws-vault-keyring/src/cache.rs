/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Cached session credentials, keyed by the identity of the chain that produced them.

use crate::store::{SecretStore, SharedSecretStore, StoreError};
use aws_vault_types::error::DisplayErrorContext;
use aws_vault_types::Credentials;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use zeroize::{Zeroize, Zeroizing};

const ITEM_PREFIX: &str = "aws-vault-session";
const CACHED_CREDENTIALS: &str = "CredentialCache";

/// Deterministic identity of a resolved credential chain
///
/// Two retrievals with equal keys are interchangeable. Any change to a chain parameter yields
/// a different key, so an old record is never reused for a new chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    profile_name: String,
    #[serde(default)]
    roles: Vec<RoleKey>,
    session_token_duration_secs: u64,
    assume_role_duration_secs: u64,
    #[serde(default)]
    mfa_serial: Option<String>,
    #[serde(default)]
    use_session_token: bool,
    #[serde(default)]
    sso_role: Option<String>,
}

impl CacheKey {
    /// Creates a key for `profile_name` with no roles, MFA or SSO.
    pub fn new(
        profile_name: impl Into<String>,
        session_token_duration: Duration,
        assume_role_duration: Duration,
    ) -> Self {
        CacheKey {
            profile_name: profile_name.into(),
            roles: Vec::new(),
            session_token_duration_secs: session_token_duration.as_secs(),
            assume_role_duration_secs: assume_role_duration.as_secs(),
            mfa_serial: None,
            use_session_token: false,
            sso_role: None,
        }
    }

    /// Sets the role assumptions of the chain, outermost first.
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleKey>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    /// Sets the role ARNs of the chain, outermost first, with no per-role parameters.
    pub fn with_role_arns<I, S>(self, role_arns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_roles(role_arns.into_iter().map(RoleKey::new))
    }

    /// Sets the MFA device serial.
    pub fn with_mfa_serial(mut self, mfa_serial: Option<String>) -> Self {
        self.mfa_serial = mfa_serial;
        self
    }

    /// Records whether a session token is part of the chain.
    pub fn with_session_token(mut self, use_session_token: bool) -> Self {
        self.use_session_token = use_session_token;
        self
    }

    /// Sets the SSO account and role the chain resolves to.
    pub fn with_sso_role(
        mut self,
        start_url: &str,
        account_id: &str,
        role_name: &str,
    ) -> Self {
        self.sso_role = Some(format!("{}|{}|{}", start_url, account_id, role_name));
        self
    }

    /// Returns the name of the profile the key was built for.
    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    /// Returns the role assumptions of the chain, outermost first.
    pub fn roles(&self) -> &[RoleKey] {
        &self.roles
    }

    /// Returns the role ARNs of the chain, outermost first.
    pub fn role_arns(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(RoleKey::role_arn)
    }

    /// Returns the name of the secret store item that holds the record for this key.
    ///
    /// The profile name stays readable so that operators can find their sessions in the
    /// keychain; the rest of the identity is hashed.
    pub fn item_name(&self) -> String {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, self.profile_name.as_bytes());
        hasher.update((self.roles.len() as u64).to_be_bytes());
        for role in &self.roles {
            role.hash_into(&mut hasher);
        }
        hasher.update(self.session_token_duration_secs.to_be_bytes());
        hasher.update(self.assume_role_duration_secs.to_be_bytes());
        update_optional(&mut hasher, self.mfa_serial.as_deref());
        hasher.update([self.use_session_token as u8]);
        update_optional(&mut hasher, self.sso_role.as_deref());
        format!(
            "{}:{}:{}",
            ITEM_PREFIX,
            self.profile_name,
            hex::encode(hasher.finalize())
        )
    }
}

/// One role assumption within a [`CacheKey`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleKey {
    role_arn: String,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    role_session_name: Option<String>,
    #[serde(default)]
    duration_secs: Option<u64>,
    #[serde(default)]
    mfa_serial: Option<String>,
}

impl RoleKey {
    /// Creates a key for assuming `role_arn` with default parameters.
    pub fn new(role_arn: impl Into<String>) -> Self {
        RoleKey {
            role_arn: role_arn.into(),
            external_id: None,
            role_session_name: None,
            duration_secs: None,
            mfa_serial: None,
        }
    }

    /// Sets the external ID sent with the assumption.
    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    /// Sets the role session name sent with the assumption.
    pub fn with_role_session_name(mut self, role_session_name: Option<String>) -> Self {
        self.role_session_name = role_session_name;
        self
    }

    /// Sets the duration requested for this assumption, when it overrides the chain's.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration_secs = duration.map(|duration| duration.as_secs());
        self
    }

    /// Sets the MFA device that gates this assumption.
    pub fn with_mfa_serial(mut self, mfa_serial: Option<String>) -> Self {
        self.mfa_serial = mfa_serial;
        self
    }

    /// Returns the ARN of the assumed role.
    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        update_field(hasher, self.role_arn.as_bytes());
        update_optional(hasher, self.external_id.as_deref());
        update_optional(hasher, self.role_session_name.as_deref());
        match self.duration_secs {
            Some(secs) => {
                hasher.update([1]);
                hasher.update(secs.to_be_bytes());
            }
            None => hasher.update([0]),
        }
        update_optional(hasher, self.mfa_serial.as_deref());
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn update_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update([1]);
            update_field(hasher, value.as_bytes());
        }
        None => hasher.update([0]),
    }
}

/// Credentials as they were cached, along with when they were obtained
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheRecord {
    key: CacheKey,
    credentials: Credentials,
    retrieved_at: SystemTime,
}

impl CacheRecord {
    /// Creates a record.
    pub fn new(key: CacheKey, credentials: Credentials, retrieved_at: SystemTime) -> Self {
        CacheRecord {
            key,
            credentials,
            retrieved_at,
        }
    }

    /// Returns the key the record was stored under.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the cached credentials.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns when the credentials were obtained.
    pub fn retrieved_at(&self) -> SystemTime {
        self.retrieved_at
    }

    /// Consumes the record, returning its credentials.
    pub fn into_credentials(self) -> Credentials {
        self.credentials
    }
}

// Persisted form. Unknown fields are ignored so that newer writers stay readable.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key: CacheKey,
    credentials: StoredCredentials,
    #[serde(with = "time::serde::rfc3339")]
    retrieved_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    expiration: Option<OffsetDateTime>,
}

impl Drop for StoredCredentials {
    fn drop(&mut self) {
        self.secret_access_key.zeroize();
        self.session_token.zeroize();
    }
}

impl From<&CacheRecord> for StoredRecord {
    fn from(record: &CacheRecord) -> Self {
        let credentials = &record.credentials;
        StoredRecord {
            key: record.key.clone(),
            credentials: StoredCredentials {
                access_key_id: credentials.access_key_id().to_string(),
                secret_access_key: credentials.secret_access_key().to_string(),
                session_token: credentials.session_token().map(ToString::to_string),
                expiration: credentials.expiry().map(OffsetDateTime::from),
            },
            retrieved_at: OffsetDateTime::from(record.retrieved_at),
        }
    }
}

impl From<StoredRecord> for CacheRecord {
    fn from(stored: StoredRecord) -> Self {
        let creds = &stored.credentials;
        let credentials = Credentials::new(
            creds.access_key_id.as_str(),
            creds.secret_access_key.as_str(),
            creds.session_token.clone(),
            creds.expiration.map(SystemTime::from),
            CACHED_CREDENTIALS,
        );
        CacheRecord {
            key: stored.key.clone(),
            credentials,
            retrieved_at: SystemTime::from(stored.retrieved_at),
        }
    }
}

/// Error storing or removing a cache record
#[derive(Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// The secret store rejected the operation
    Store(StoreError),

    /// The record could not be serialized
    Serialize(serde_json::Error),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Store(_) => write!(f, "failed to write the credential cache"),
            CacheError::Serialize(_) => write!(f, "failed to serialize cached credentials"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Store(err) => Some(err),
            CacheError::Serialize(err) => Some(err),
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::Store(err)
    }
}

/// Session credential cache on top of a [`SecretStore`]
///
/// Loads never fail: an unreadable, corrupt, or mismatched record is logged and reported as
/// absent. Stores and removals surface their errors and leave it to the caller to decide
/// whether they matter.
#[derive(Clone, Debug)]
pub struct CredentialCache {
    store: SharedSecretStore,
}

impl CredentialCache {
    /// Creates a cache backed by `store`.
    pub fn new(store: SharedSecretStore) -> Self {
        CredentialCache { store }
    }

    /// Returns the record cached for `key`, if there is a readable one.
    pub fn load(&self, key: &CacheKey) -> Option<CacheRecord> {
        let item_name = key.item_name();
        let data = match self.store.get(&item_name) {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(item = %item_name, "no cached session");
                return None;
            }
            Err(err) => {
                tracing::warn!(item = %item_name, error = %DisplayErrorContext(&err), "could not read cached session, ignoring it");
                return None;
            }
        };
        let stored: StoredRecord = match serde_json::from_slice(&data) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(item = %item_name, error = %err, "cached session is corrupt, ignoring it");
                return None;
            }
        };
        if stored.key != *key {
            tracing::warn!(item = %item_name, "cached session belongs to a different chain, ignoring it");
            return None;
        }
        Some(stored.into())
    }

    /// Creates or overwrites the record for `record.key()`.
    pub fn store(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let data = Zeroizing::new(
            serde_json::to_vec(&StoredRecord::from(record)).map_err(CacheError::Serialize)?,
        );
        self.store.set(&record.key.item_name(), &data)?;
        tracing::debug!(profile = %record.key.profile_name, "stored session in the credential cache");
        Ok(())
    }

    /// Removes the record for `key`, forcing the next retrieval to resolve from scratch.
    pub fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.store.remove(&key.item_name())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::InMemorySecretStore;
    use std::time::UNIX_EPOCH;
    use tracing_test::traced_test;

    const HOUR: Duration = Duration::from_secs(3600);

    fn key() -> CacheKey {
        CacheKey::new("prod", HOUR, HOUR).with_role_arns(["arn:aws:iam::111:role/Deploy"])
    }

    fn record(key: CacheKey) -> CacheRecord {
        let expiry = UNIX_EPOCH + Duration::from_nanos(1_700_000_900_123_456_789);
        CacheRecord::new(
            key,
            Credentials::for_tests_expiring(expiry),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        )
    }

    fn cache() -> (InMemorySecretStore, CredentialCache) {
        let store = InMemorySecretStore::new();
        let cache = CredentialCache::new(SharedSecretStore::new(store.clone()));
        (store, cache)
    }

    #[test]
    fn stored_record_loads_back_identical() {
        let (_, cache) = cache();
        let record = record(key());
        cache.store(&record).unwrap();
        let loaded = cache.load(&key()).expect("record was stored");
        assert_eq!(loaded, record);
        assert_eq!(loaded.credentials().expiry(), record.credentials().expiry());
        assert_eq!(loaded.credentials().provider_name(), CACHED_CREDENTIALS);
    }

    #[test]
    fn chain_parameters_change_the_item_name() {
        let base = key();
        let variants = [
            base.clone().with_role_arns(["arn:aws:iam::111:role/Other"]),
            CacheKey::new("prod", HOUR * 2, HOUR).with_roles(base.roles().to_vec()),
            CacheKey::new("prod", HOUR, HOUR * 2).with_roles(base.roles().to_vec()),
            base.clone().with_mfa_serial(Some("arn:aws:iam::111:mfa/me".into())),
            base.clone().with_session_token(true),
            base.clone().with_sso_role("https://example.awsapps.com/start", "111", "Admin"),
        ];
        for variant in variants {
            assert_ne!(variant.item_name(), base.item_name(), "{:?}", variant);
        }
        assert_eq!(key().item_name(), base.item_name());
        assert!(base.item_name().starts_with("aws-vault-session:prod:"));
    }

    #[test]
    fn role_parameters_change_the_item_name() {
        let deploy = || RoleKey::new("arn:aws:iam::111:role/Deploy");
        let base = key();
        assert_eq!(CacheKey::new("prod", HOUR, HOUR).with_roles([deploy()]), base);
        let variants = [
            deploy().with_external_id(Some("ext-A".into())),
            deploy().with_role_session_name(Some("ci".into())),
            deploy().with_duration(Some(Duration::from_secs(900))),
            deploy().with_mfa_serial(Some("arn:aws:iam::111:mfa/me".into())),
        ];
        let mut names = vec![base.item_name()];
        for role in variants {
            let variant = CacheKey::new("prod", HOUR, HOUR).with_roles([role]);
            assert_ne!(variant, base);
            names.push(variant.item_name());
        }
        let mut distinct = names.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), names.len(), "{:?}", names);

        let ext_a = CacheKey::new("prod", HOUR, HOUR)
            .with_roles([deploy().with_external_id(Some("ext-A".into()))]);
        let ext_b = CacheKey::new("prod", HOUR, HOUR)
            .with_roles([deploy().with_external_id(Some("ext-B".into()))]);
        assert_ne!(ext_a.item_name(), ext_b.item_name());
    }

    #[test]
    fn changed_chain_does_not_reuse_the_old_record() {
        let (_, cache) = cache();
        cache.store(&record(key())).unwrap();
        let changed = CacheKey::new("prod", HOUR, Duration::from_secs(900))
            .with_roles(key().roles().to_vec());
        assert!(cache.load(&changed).is_none());
    }

    #[test]
    #[traced_test]
    fn corrupt_record_is_treated_as_absent() {
        let (store, cache) = cache();
        store.set(&key().item_name(), b"{not json").unwrap();
        assert!(cache.load(&key()).is_none());
        assert!(logs_contain("cached session is corrupt"));
    }

    #[test]
    #[traced_test]
    fn mismatched_key_is_treated_as_absent() {
        let (store, cache) = cache();
        let other = CacheKey::new("dev", HOUR, HOUR);
        cache.store(&record(other.clone())).unwrap();
        let data = store.get(&other.item_name()).unwrap().unwrap();
        store.set(&key().item_name(), &data).unwrap();
        assert!(cache.load(&key()).is_none());
        assert!(logs_contain("different chain"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let (store, cache) = cache();
        let record = record(key());
        cache.store(&record).unwrap();
        let item = key().item_name();
        let data = store.get(&item).unwrap().unwrap();
        let mut json: serde_json::Value = serde_json::from_slice(&data).unwrap();
        json["written_by"] = "a newer release".into();
        json["key"]["web_identity_token_file"] = "/tmp/token".into();
        json["credentials"]["account_id"] = "111".into();
        store.set(&item, &serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(cache.load(&key()), Some(record));
    }

    #[test]
    #[traced_test]
    fn locked_store_degrades_load_and_surfaces_store() {
        let (store, cache) = cache();
        cache.store(&record(key())).unwrap();
        store.set_locked(true);
        assert!(cache.load(&key()).is_none());
        assert!(logs_contain("could not read cached session"));
        let err = cache.store(&record(key())).unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::Locked)));
        assert_eq!(
            DisplayErrorContext(&err).to_string(),
            "failed to write the credential cache: the secret store is locked"
        );
    }

    #[test]
    fn remove_forgets_the_record() {
        let (_, cache) = cache();
        cache.store(&record(key())).unwrap();
        cache.remove(&key()).unwrap();
        assert!(cache.load(&key()).is_none());
    }
}
