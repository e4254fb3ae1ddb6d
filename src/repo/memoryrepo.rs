use std::collections::HashMap;
use std::convert::Infallible;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::blob::MemoryBlobStore;
use crate::key::ContentKey;
use crate::refs::DatasetRef;
use crate::refs::Event;
use crate::refs::RefName;
use crate::repo::BlobStoreGet;
use crate::repo::BlobStorePin;
use crate::repo::BlobStorePut;
use crate::repo::EventLog;
use crate::repo::PinError;
use crate::repo::PushResult;
use crate::repo::RefStore;
use crate::timestamp;

#[derive(Debug, Default)]
struct RefTable {
    /// Reference plus its creation sequence number.
    refs: HashMap<RefName, (u64, DatasetRef)>,
    next_seq: u64,
}

impl RefTable {
    fn insert(&mut self, name: &RefName, mut record: DatasetRef) -> DatasetRef {
        record.owner = name.owner.clone();
        record.name = name.name.clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.refs.insert(name.clone(), (seq, record.clone()));
        record
    }
}

/// In-memory reference index and event log.
#[derive(Debug, Default)]
pub struct MemoryRefStore {
    table: RwLock<RefTable>,
    events: RwLock<Vec<Event>>,
}

impl MemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RefStore for MemoryRefStore {
    type RefError = Infallible;

    fn get_ref(&self, name: &RefName) -> Result<Option<DatasetRef>, Self::RefError> {
        Ok(self.table.read().refs.get(name).map(|(_, r)| r.clone()))
    }

    fn update(
        &self,
        name: &RefName,
        old: Option<ContentKey>,
        new: ContentKey,
    ) -> Result<PushResult, Self::RefError> {
        let mut guard = self.table.write();
        let table = &mut *guard;
        let current = table.refs.get(name).map(|(_, r)| r.path);
        if current != old {
            return Ok(PushResult::Conflict(current));
        }
        let stored = match table.refs.get_mut(name) {
            Some((_, existing)) => {
                existing.path = new;
                existing.updated = timestamp::now();
                existing.clone()
            }
            None => table.insert(name, DatasetRef::new(name, new)),
        };
        Ok(PushResult::Success(stored))
    }

    fn create(&self, name: &RefName, record: DatasetRef) -> Result<PushResult, Self::RefError> {
        let mut table = self.table.write();
        if let Some((_, existing)) = table.refs.get(name) {
            return Ok(PushResult::Conflict(Some(existing.path)));
        }
        Ok(PushResult::Success(table.insert(name, record)))
    }

    fn delete(&self, name: &RefName, old: ContentKey) -> Result<PushResult, Self::RefError> {
        let mut table = self.table.write();
        let current = table.refs.get(name).map(|(_, r)| r.path);
        if current != Some(old) {
            return Ok(PushResult::Conflict(current));
        }
        match table.refs.remove(name) {
            Some((_, removed)) => Ok(PushResult::Success(removed)),
            None => Ok(PushResult::Conflict(None)),
        }
    }

    fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, Self::RefError> {
        let table = self.table.read();
        let mut refs: Vec<_> = table.refs.values().collect();
        refs.sort_by_key(|(seq, _)| *seq);
        Ok(refs
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn set_published(
        &self,
        name: &RefName,
        published: bool,
    ) -> Result<Option<DatasetRef>, Self::RefError> {
        let mut table = self.table.write();
        Ok(table.refs.get_mut(name).map(|(_, r)| {
            r.published = published;
            r.clone()
        }))
    }
}

impl EventLog for MemoryRefStore {
    type EventError = Infallible;

    fn append_event(&self, event: Event) -> Result<(), Self::EventError> {
        self.events.write().push(event);
        Ok(())
    }

    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, Self::EventError> {
        Ok(self
            .events
            .read()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Simple in-memory implementation of every storage capability.
///
/// Useful for unit tests or ephemeral repositories where persistence is not
/// required.
#[derive(Debug, Default)]
pub struct MemoryRepo {
    pub blobs: MemoryBlobStore,
    pub refs: MemoryRefStore,
}

impl MemoryRepo {
    /// A repository whose blob store cannot pin.
    pub fn without_pinning() -> Self {
        Self {
            blobs: MemoryBlobStore::without_pinning(),
            refs: MemoryRefStore::new(),
        }
    }
}

impl BlobStorePut for MemoryRepo {
    type PutError = <MemoryBlobStore as BlobStorePut>::PutError;

    fn put(&self, name: &str, bytes: Bytes) -> Result<ContentKey, Self::PutError> {
        self.blobs.put(name, bytes)
    }
}

impl BlobStoreGet for MemoryRepo {
    type GetError = <MemoryBlobStore as BlobStoreGet>::GetError;

    fn get(&self, key: &ContentKey) -> Result<Bytes, Self::GetError> {
        self.blobs.get(key)
    }
}

impl BlobStorePin for MemoryRepo {
    type PinError = <MemoryBlobStore as BlobStorePin>::PinError;

    fn pin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        self.blobs.pin(key)
    }

    fn unpin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        self.blobs.unpin(key)
    }
}

impl RefStore for MemoryRepo {
    type RefError = Infallible;

    fn get_ref(&self, name: &RefName) -> Result<Option<DatasetRef>, Self::RefError> {
        self.refs.get_ref(name)
    }

    fn update(
        &self,
        name: &RefName,
        old: Option<ContentKey>,
        new: ContentKey,
    ) -> Result<PushResult, Self::RefError> {
        self.refs.update(name, old, new)
    }

    fn create(&self, name: &RefName, record: DatasetRef) -> Result<PushResult, Self::RefError> {
        self.refs.create(name, record)
    }

    fn delete(&self, name: &RefName, old: ContentKey) -> Result<PushResult, Self::RefError> {
        self.refs.delete(name, old)
    }

    fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, Self::RefError> {
        self.refs.references(limit, offset)
    }

    fn set_published(
        &self,
        name: &RefName,
        published: bool,
    ) -> Result<Option<DatasetRef>, Self::RefError> {
        self.refs.set_published(name, published)
    }
}

impl EventLog for MemoryRepo {
    type EventError = Infallible;

    fn append_event(&self, event: Event) -> Result<(), Self::EventError> {
        self.refs.append_event(event)
    }

    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, Self::EventError> {
        self.refs.events(limit, offset)
    }
}
