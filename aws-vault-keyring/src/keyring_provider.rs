/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Provider for the long-lived keys of a root profile.

use crate::store::{SecretStore, SharedSecretStore};
use aws_vault_types::provider::{self, future, CredentialsError, ProvideCredentials};
use aws_vault_types::Credentials;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

const KEYRING_PROVIDER: &str = "Keyring";

/// Long-lived IAM user keys held in the secret store
///
/// The keys of a profile are stored under the profile name itself. They never expire and are
/// the base credentials of every chain rooted at that profile.
#[derive(Clone, Debug)]
pub struct KeyringCredentialsProvider {
    profile_name: String,
    store: SharedSecretStore,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoredKeys {
    access_key_id: String,
    secret_access_key: String,
}

impl Drop for StoredKeys {
    fn drop(&mut self) {
        self.secret_access_key.zeroize();
    }
}

impl KeyringCredentialsProvider {
    /// Creates a provider for the keys of `profile_name`.
    pub fn new(profile_name: impl Into<String>, store: SharedSecretStore) -> Self {
        KeyringCredentialsProvider {
            profile_name: profile_name.into(),
            store,
        }
    }

    /// Stores the access key pair of `credentials` as this profile's long-lived keys.
    pub fn store_keys(&self, credentials: &Credentials) -> Result<(), CredentialsError> {
        let keys = StoredKeys {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
        };
        let data = Zeroizing::new(serde_json::to_vec(&keys).map_err(CredentialsError::unhandled)?);
        self.store
            .set(&self.profile_name, &data)
            .map_err(CredentialsError::provider_error)
    }

    fn load(&self) -> provider::Result {
        let data = self
            .store
            .get(&self.profile_name)
            .map_err(CredentialsError::provider_error)?
            .ok_or_else(|| {
                tracing::debug!(profile = %self.profile_name, "no long-lived keys in the secret store");
                CredentialsError::CredentialsNotLoaded
            })?;
        let keys: StoredKeys =
            serde_json::from_slice(&data).map_err(CredentialsError::invalid_configuration)?;
        Ok(Credentials::new(
            keys.access_key_id.as_str(),
            keys.secret_access_key.as_str(),
            None,
            None,
            KEYRING_PROVIDER,
        ))
    }
}

impl ProvideCredentials for KeyringCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::ready(self.load())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::InMemorySecretStore;

    #[tokio::test]
    async fn keys_round_trip_through_the_store() {
        let store = InMemorySecretStore::new();
        let provider = KeyringCredentialsProvider::new("prod", SharedSecretStore::new(store.clone()));
        provider
            .store_keys(&Credentials::from_keys("AKIDEXAMPLE", "secret", None))
            .unwrap();
        let creds = provider.provide_credentials().await.unwrap();
        assert_eq!(creds.access_key_id(), "AKIDEXAMPLE");
        assert_eq!(creds.secret_access_key(), "secret");
        assert!(!creds.can_expire());
        assert_eq!(store.item_names(), vec!["prod".to_string()]);
    }

    #[tokio::test]
    async fn missing_keys_are_not_loaded() {
        let provider =
            KeyringCredentialsProvider::new("prod", SharedSecretStore::new(InMemorySecretStore::new()));
        let err = provider.provide_credentials().await.unwrap_err();
        assert!(matches!(err, CredentialsError::CredentialsNotLoaded), "{:?}", err);
    }

    #[tokio::test]
    async fn locked_store_is_a_provider_error() {
        let store = InMemorySecretStore::new();
        store.set_locked(true);
        let provider = KeyringCredentialsProvider::new("prod", SharedSecretStore::new(store));
        let err = provider.provide_credentials().await.unwrap_err();
        assert!(matches!(err, CredentialsError::ProviderError(_)), "{:?}", err);
    }
}
