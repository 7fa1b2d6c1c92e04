//! Durable key/value interface consumed by the registry, the ledger and the
//! scanning devices, and an in-memory implementation of it.

use crate::error::StorageError;
use alloc::vec::Vec;
use scale::{Decode, Encode};
use std::collections::HashMap;
use std::sync::RwLock;

/// Opaque token returned by the store on each write
pub type Version = u64;

/// Number of times a compare and swap is attempted again after a version conflict
pub const MAX_CAS_RETRIES: usize = 8;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Versioned {
    pub version: Version,
    pub value: Vec<u8>,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Versioned>, StorageError>;

    /// unconditional write
    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Version, StorageError>;

    /// Write the value only if the current version is `expected`.
    /// `None` means the key must not exist yet.
    fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<Version>,
        value: Vec<u8>,
    ) -> Result<Version, StorageError>;
}

/// read and decode the value saved under the given key
pub fn load<S, T>(store: &S, key: &[u8]) -> Result<Option<(Version, T)>, StorageError>
where
    S: KeyValueStore + ?Sized,
    T: Decode,
{
    match store.get(key)? {
        None => Ok(None),
        Some(Versioned { version, value }) => {
            let decoded = T::decode(&mut value.as_slice())?;
            Ok(Some((version, decoded)))
        }
    }
}

/// encode and save the value under the given key if the version did not change
pub fn swap<S, T>(
    store: &S,
    key: &[u8],
    expected: Option<Version>,
    value: &T,
) -> Result<Version, StorageError>
where
    S: KeyValueStore + ?Sized,
    T: Encode,
{
    store.compare_and_swap(key, expected, value.encode())
}

#[derive(Default, Debug)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Versioned>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Versioned>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Version, StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        let version = entries
            .get(key)
            .map(|v| v.version.saturating_add(1))
            .unwrap_or(1);
        entries.insert(key.to_vec(), Versioned { version, value });
        Ok(version)
    }

    fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<Version>,
        value: Vec<u8>,
    ) -> Result<Version, StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        let current = entries.get(key).map(|v| v.version);
        if current != expected {
            return Err(StorageError::VersionConflict);
        }
        let version = current.map(|v| v.saturating_add(1)).unwrap_or(1);
        entries.insert(key.to_vec(), Versioned { version, value });
        Ok(version)
    }
}
