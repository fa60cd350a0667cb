/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The encrypted key/value store that holds long-lived keys and cached sessions.
//!
//! The OS keychain itself lives outside this crate. Anything that can get, set and remove an
//! opaque item by name can back the credential cache.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zeroize::Zeroizing;

/// Error returned by a [`SecretStore`]
#[derive(Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The backend is locked and needs to be unlocked by the operator
    Locked,

    /// The current process is not allowed to access the item
    PermissionDenied {
        /// Item that was being accessed
        item: String,
    },

    /// Any other backend failure
    Backend(Box<dyn Error + Send + Sync + 'static>),
}

impl StoreError {
    /// Creates a [`StoreError::Backend`] from the given source.
    pub fn backend(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        StoreError::Backend(source.into())
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Locked => write!(f, "the secret store is locked"),
            StoreError::PermissionDenied { item } => {
                write!(f, "permission denied accessing `{}`", item)
            }
            StoreError::Backend(_) => write!(f, "the secret store backend failed"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Backend(err) => Some(err.as_ref() as _),
            _ => None,
        }
    }
}

/// Opaque encrypted key/value storage
///
/// Implementations must tolerate concurrent writers from other processes: the last writer
/// wins, but a single item is never left half-written.
pub trait SecretStore: Send + Sync + Debug {
    /// Returns the item stored under `name`, or `None` if there is no such item.
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError>;

    /// Creates or replaces the item stored under `name`.
    fn set(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Removes the item stored under `name`. Removing a missing item is not an error.
    fn remove(&self, name: &str) -> Result<(), StoreError>;
}

/// A [`SecretStore`] that may be shared
///
/// The store is shared infrastructure: it outlives any one provider and the same handle may
/// be given to the credential cache and to the long-lived key provider.
#[derive(Clone, Debug)]
pub struct SharedSecretStore(Arc<dyn SecretStore>);

impl SharedSecretStore {
    /// Wraps `store` in an `Arc`.
    pub fn new(store: impl SecretStore + 'static) -> Self {
        Self(Arc::new(store))
    }
}

impl From<Arc<dyn SecretStore>> for SharedSecretStore {
    fn from(store: Arc<dyn SecretStore>) -> Self {
        Self(store)
    }
}

impl SecretStore for SharedSecretStore {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        self.0.get(name)
    }

    fn set(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.0.set(name, data)
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.0.remove(name)
    }
}

/// Process-local [`SecretStore`]
///
/// Clones share the same items. [`set_locked`](InMemorySecretStore::set_locked) makes every
/// operation fail with [`StoreError::Locked`], which is how a locked keychain looks to callers.
#[derive(Clone, Debug, Default)]
pub struct InMemorySecretStore {
    inner: Arc<Mutex<Items>>,
}

#[derive(Default)]
struct Items {
    locked: bool,
    items: HashMap<String, Zeroizing<Vec<u8>>>,
}

impl Debug for Items {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Items")
            .field("locked", &self.locked)
            .field("items", &self.items.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl InMemorySecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks or unlocks the store.
    pub fn set_locked(&self, locked: bool) {
        self.items().locked = locked;
    }

    /// Returns the names of all stored items, sorted.
    pub fn item_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.items().items.keys().cloned().collect();
        names.sort();
        names
    }

    fn items(&self) -> MutexGuard<'_, Items> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unlocked(&self) -> Result<MutexGuard<'_, Items>, StoreError> {
        let items = self.items();
        if items.locked {
            return Err(StoreError::Locked);
        }
        Ok(items)
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        Ok(self.unlocked()?.items.get(name).cloned())
    }

    fn set(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.unlocked()?
            .items
            .insert(name.to_string(), Zeroizing::new(data.to_vec()));
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.unlocked()?.items.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clones_share_items() {
        let store = InMemorySecretStore::new();
        let shared = SharedSecretStore::new(store.clone());
        shared.set("profile", b"data").unwrap();
        assert_eq!(store.get("profile").unwrap().unwrap().as_slice(), b"data");
        store.remove("profile").unwrap();
        assert!(shared.get("profile").unwrap().is_none());
        store.remove("profile").expect("removing a missing item is fine");
    }

    #[test]
    fn locked_store_refuses_every_operation() {
        let store = InMemorySecretStore::new();
        store.set("a", b"1").unwrap();
        store.set_locked(true);
        assert!(matches!(store.get("a"), Err(StoreError::Locked)));
        assert!(matches!(store.set("b", b"2"), Err(StoreError::Locked)));
        assert!(matches!(store.remove("a"), Err(StoreError::Locked)));
        store.set_locked(false);
        assert_eq!(store.item_names(), vec!["a".to_string()]);
    }
}
