use std::collections::HashMap;
use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use super::BlobMetadata;
use crate::key::ContentKey;
use crate::repo::BlobStoreGet;
use crate::repo::BlobStorePin;
use crate::repo::BlobStorePut;
use crate::repo::PinError;
use crate::timestamp;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Bytes,
    meta: BlobMetadata,
}

/// A mapping from [ContentKey]s to blobs, held in memory.
///
/// Pinning is enabled by default; [`MemoryBlobStore::without_pinning`] builds
/// a store that reports [`PinError::NotPinner`] instead.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentKey, StoredBlob>>,
    pins: Option<RwLock<HashSet<ContentKey>>>,
}

impl fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryBlobStore")
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            pins: Some(RwLock::new(HashSet::new())),
        }
    }

    pub fn without_pinning() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            pins: None,
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.blobs.read().contains_key(key)
    }

    pub fn metadata(&self, key: &ContentKey) -> Option<BlobMetadata> {
        self.blobs.read().get(key).map(|blob| blob.meta.clone())
    }

    pub fn is_pinned(&self, key: &ContentKey) -> bool {
        self.pins
            .as_ref()
            .is_some_and(|pins| pins.read().contains(key))
    }

    pub fn pinned(&self) -> Vec<ContentKey> {
        match &self.pins {
            Some(pins) => pins.read().iter().copied().collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStoreError {
    NotFound(ContentKey),
}

impl fmt::Display for MemoryStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStoreError::NotFound(key) => write!(f, "blob {key} not found"),
        }
    }
}

impl std::error::Error for MemoryStoreError {}

impl BlobStorePut for MemoryBlobStore {
    type PutError = Infallible;

    fn put(&self, name: &str, bytes: Bytes) -> Result<ContentKey, Self::PutError> {
        let key = ContentKey::digest(&bytes);
        let mut blobs = self.blobs.write();
        // identical bytes produce the same key, keep the first copy
        blobs.entry(key).or_insert_with(|| {
            trace!(%key, name, len = bytes.len(), "stored blob");
            StoredBlob {
                meta: BlobMetadata {
                    name: name.to_owned(),
                    length: bytes.len() as u64,
                    stored: timestamp::now(),
                },
                bytes,
            }
        });
        Ok(key)
    }
}

impl BlobStoreGet for MemoryBlobStore {
    type GetError = MemoryStoreError;

    fn get(&self, key: &ContentKey) -> Result<Bytes, Self::GetError> {
        self.blobs
            .read()
            .get(key)
            .map(|blob| blob.bytes.clone())
            .ok_or(MemoryStoreError::NotFound(*key))
    }
}

impl BlobStorePin for MemoryBlobStore {
    type PinError = MemoryStoreError;

    fn pin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        let pins = self.pins.as_ref().ok_or(PinError::NotPinner)?;
        if !self.contains(key) {
            return Err(PinError::Store(MemoryStoreError::NotFound(*key)));
        }
        pins.write().insert(*key);
        Ok(())
    }

    fn unpin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        let pins = self.pins.as_ref().ok_or(PinError::NotPinner)?;
        pins.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent() {
        let store = MemoryBlobStore::new();
        let a = store.put("a.csv", Bytes::from_static(b"x,y\n")).unwrap();
        let b = store.put("b.csv", Bytes::from_static(b"x,y\n")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.metadata(&a).unwrap().name, "a.csv");
        assert_eq!(store.get(&a).unwrap(), Bytes::from_static(b"x,y\n"));
    }

    #[test]
    fn missing_blob() {
        let store = MemoryBlobStore::new();
        let key = ContentKey::digest(b"nope");
        assert_eq!(store.get(&key), Err(MemoryStoreError::NotFound(key)));
    }

    #[test]
    fn pin_and_unpin() {
        let store = MemoryBlobStore::new();
        let key = store.put("body.json", Bytes::from_static(b"[]")).unwrap();
        store.pin(&key).unwrap();
        assert!(store.is_pinned(&key));
        store.unpin(&key).unwrap();
        assert!(!store.is_pinned(&key));
        // unpinning again is a no-op
        store.unpin(&key).unwrap();
    }

    #[test]
    fn pinning_unknown_blob_fails() {
        let store = MemoryBlobStore::new();
        let key = ContentKey::digest(b"elsewhere");
        assert!(matches!(
            store.pin(&key),
            Err(PinError::Store(MemoryStoreError::NotFound(_)))
        ));
    }

    #[test]
    fn not_a_pinner() {
        let store = MemoryBlobStore::without_pinning();
        let key = store.put("body.json", Bytes::from_static(b"[]")).unwrap();
        assert!(matches!(store.pin(&key), Err(PinError::NotPinner)));
        assert!(matches!(store.unpin(&key), Err(PinError::NotPinner)));
        assert!(store.pinned().is_empty());
    }
}
