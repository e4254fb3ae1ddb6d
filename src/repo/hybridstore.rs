use bytes::Bytes;

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

/// Store that delegates blob and reference operations to two independent stores.
///
/// This allows mixing different storage implementations in one repository,
/// e.g. blobs in an object store with an in-memory reference index.
#[derive(Debug)]
pub struct HybridStore<B, R> {
    /// Storage for dataset and body blobs.
    pub blobs: B,
    /// Reference index and event log.
    pub refs: R,
}

impl<B, R> HybridStore<B, R> {
    /// Creates a new `HybridStore` from the given blob and reference stores.
    pub fn new(blobs: B, refs: R) -> Self {
        Self { blobs, refs }
    }
}

impl<B, R> BlobStorePut for HybridStore<B, R>
where
    B: BlobStorePut,
{
    type PutError = B::PutError;

    fn put(&self, name: &str, bytes: Bytes) -> Result<ContentKey, Self::PutError> {
        self.blobs.put(name, bytes)
    }
}

impl<B, R> BlobStoreGet for HybridStore<B, R>
where
    B: BlobStoreGet,
{
    type GetError = B::GetError;

    fn get(&self, key: &ContentKey) -> Result<Bytes, Self::GetError> {
        self.blobs.get(key)
    }
}

impl<B, R> BlobStorePin for HybridStore<B, R>
where
    B: BlobStorePin,
{
    type PinError = B::PinError;

    fn pin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        self.blobs.pin(key)
    }

    fn unpin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        self.blobs.unpin(key)
    }
}

impl<B, R> RefStore for HybridStore<B, R>
where
    R: RefStore,
{
    type RefError = R::RefError;

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

impl<B, R> EventLog for HybridStore<B, R>
where
    R: EventLog,
{
    type EventError = R::EventError;

    fn append_event(&self, event: Event) -> Result<(), Self::EventError> {
        self.refs.append_event(event)
    }

    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, Self::EventError> {
        self.refs.events(limit, offset)
    }
}
