//! Storage capabilities and the repository operations built on them.
//!
//! A repository needs three things from its storage:
//!
//! - a content-addressed blob store ([`BlobStorePut`], [`BlobStoreGet`] and,
//!   optionally, [`BlobStorePin`]),
//! - a reference index mapping `(owner, name)` to the current version of a
//!   dataset ([`RefStore`]),
//! - an append-only log of reference changes ([`EventLog`]).
//!
//! [`Repository`] orchestrates them. It owns no persistent state of its own;
//! every write goes to the blob store first and only becomes visible once a
//! reference is moved to it with a compare-and-swap.
//!
//! ```
//! use datapile::body::BodyFile;
//! use datapile::dataset::{base_schema_array, Commit, DataFormat, Dataset, Structure};
//! use datapile::repo::memoryrepo::MemoryRepo;
//! use datapile::repo::Repository;
//!
//! let repo = Repository::new(MemoryRepo::default(), "peer");
//! let ds = Dataset::new(
//!     Structure::new(DataFormat::Csv, base_schema_array()),
//!     Commit::new("initial commit"),
//! );
//! let body = BodyFile::new("body.csv", &b"city,pop\ntoronto,2800000\n"[..]);
//! let reference = repo.create_dataset("cities", ds, Some(body), true).unwrap();
//! assert_eq!(reference.alias(), "peer/cities");
//! ```

pub mod hybridstore;
pub mod memoryrepo;
pub mod objectstore;

use std::error::Error;
use std::fmt;
use std::fmt::Debug;

use bytes::Bytes;
use tracing::debug;
use tracing::info;

use crate::body::BodyError;
use crate::body::BodyFile;
use crate::body::BodyResolver;
use crate::config::Config;
use crate::dataset::validate;
use crate::dataset::validate::ValidationError;
use crate::dataset::Dataset;
use crate::dataset::DatasetPod;
use crate::key::ContentKey;
use crate::refs::DatasetRef;
use crate::refs::Event;
use crate::refs::EventType;
use crate::refs::RefName;
use crate::timestamp;

/// Stores immutable blobs under the key of their contents.
pub trait BlobStorePut {
    type PutError: Error + Debug + Send + Sync + 'static;

    /// Stores `bytes` and returns their key. Storing bytes that are already
    /// present succeeds and returns the existing key. `name` is a hint for
    /// logs and stores that keep file names.
    fn put(&self, name: &str, bytes: Bytes) -> Result<ContentKey, Self::PutError>;
}

pub trait BlobStoreGet {
    type GetError: Error + Debug + Send + Sync + 'static;

    fn get(&self, key: &ContentKey) -> Result<Bytes, Self::GetError>;
}

/// Optional pinning capability.
///
/// Stores that cannot pin keep the default methods, which fail with
/// [`PinError::NotPinner`].
pub trait BlobStorePin {
    type PinError: Error + Debug + Send + Sync + 'static;

    fn pin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        let _ = key;
        Err(PinError::NotPinner)
    }

    /// Unpinning a key that is not pinned succeeds.
    fn unpin(&self, key: &ContentKey) -> Result<(), PinError<Self::PinError>> {
        let _ = key;
        Err(PinError::NotPinner)
    }
}

pub trait BlobStore: BlobStorePut + BlobStoreGet + BlobStorePin {}

impl<T> BlobStore for T where T: BlobStorePut + BlobStoreGet + BlobStorePin {}

#[derive(Debug)]
pub enum PinError<E> {
    /// The store has no pinning capability.
    NotPinner,
    Store(E),
}

impl<E: fmt::Display> fmt::Display for PinError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinError::NotPinner => write!(f, "repo doesn't support pinning"),
            PinError::Store(e) => write!(f, "pinning failed: {e}"),
        }
    }
}

impl<E: Error + 'static> Error for PinError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PinError::NotPinner => None,
            PinError::Store(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushResult {
    /// Carries the reference exactly as this call wrote it (or removed it).
    Success(DatasetRef),
    /// The reference did not hold the expected value; carries the one it held.
    Conflict(Option<ContentKey>),
}

/// The reference index.
pub trait RefStore {
    type RefError: Error + Debug + Send + Sync + 'static;

    fn get_ref(&self, name: &RefName) -> Result<Option<DatasetRef>, Self::RefError>;

    /// Moves `name` from `old` to `new`.
    ///
    /// # Returns
    /// * `Success(stored)` - the reference now points at `new`. A new reference
    ///   starts unpublished; an existing one keeps its publication flag and
    ///   creation time.
    /// * `Conflict(current)` - the reference did not point at `old` (`None`
    ///   meaning absent) and was left untouched.
    fn update(
        &self,
        name: &RefName,
        old: Option<ContentKey>,
        new: ContentKey,
    ) -> Result<PushResult, Self::RefError>;

    /// Creates `name` from `record` unless the name is already bound.
    /// `record.owner` and `record.name` are replaced by `name`.
    fn create(&self, name: &RefName, record: DatasetRef) -> Result<PushResult, Self::RefError>;

    /// Removes `name` if it still points at `old`.
    fn delete(&self, name: &RefName, old: ContentKey) -> Result<PushResult, Self::RefError>;

    /// All references in creation order.
    fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, Self::RefError>;

    /// Sets the publication flag and returns the updated reference, `None` if
    /// the reference does not exist.
    fn set_published(
        &self,
        name: &RefName,
        published: bool,
    ) -> Result<Option<DatasetRef>, Self::RefError>;
}

pub trait EventLog {
    type EventError: Error + Debug + Send + Sync + 'static;

    fn append_event(&self, event: Event) -> Result<(), Self::EventError>;

    /// Events newest first.
    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, Self::EventError>;
}

/// Everything a [`Repository`] needs from its storage.
pub trait RepoStorage: BlobStore + RefStore + EventLog {}

impl<T> RepoStorage for T where T: BlobStore + RefStore + EventLog {}

pub enum RepoError<Storage: RepoStorage> {
    Validation(ValidationError),
    Body(BodyError),
    /// The reference was moved by someone else, or `previous_path` does not
    /// match the current version.
    VersionConflict {
        name: RefName,
        expected: Option<ContentKey>,
        actual: Option<ContentKey>,
    },
    RefNotFound(RefName),
    /// The storage cannot pin.
    NotPinner,
    BlobPut(<Storage as BlobStorePut>::PutError),
    BlobGet(<Storage as BlobStoreGet>::GetError),
    Pin(<Storage as BlobStorePin>::PinError),
    Refs(<Storage as RefStore>::RefError),
    Events(<Storage as EventLog>::EventError),
    Encode(serde_json::Error),
    Decode {
        key: ContentKey,
        source: serde_json::Error,
    },
}

impl<Storage: RepoStorage> RepoError<Storage> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepoError::VersionConflict { .. })
    }

    fn from_pin(err: PinError<<Storage as BlobStorePin>::PinError>) -> Self {
        match err {
            PinError::NotPinner => RepoError::NotPinner,
            PinError::Store(e) => RepoError::Pin(e),
        }
    }
}

impl<Storage: RepoStorage> Debug for RepoError<Storage> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::Validation(e) => f.debug_tuple("Validation").field(e).finish(),
            RepoError::Body(e) => f.debug_tuple("Body").field(e).finish(),
            RepoError::VersionConflict {
                name,
                expected,
                actual,
            } => f
                .debug_struct("VersionConflict")
                .field("name", name)
                .field("expected", expected)
                .field("actual", actual)
                .finish(),
            RepoError::RefNotFound(name) => f.debug_tuple("RefNotFound").field(name).finish(),
            RepoError::NotPinner => write!(f, "NotPinner"),
            RepoError::BlobPut(e) => f.debug_tuple("BlobPut").field(e).finish(),
            RepoError::BlobGet(e) => f.debug_tuple("BlobGet").field(e).finish(),
            RepoError::Pin(e) => f.debug_tuple("Pin").field(e).finish(),
            RepoError::Refs(e) => f.debug_tuple("Refs").field(e).finish(),
            RepoError::Events(e) => f.debug_tuple("Events").field(e).finish(),
            RepoError::Encode(e) => f.debug_tuple("Encode").field(e).finish(),
            RepoError::Decode { key, source } => f
                .debug_struct("Decode")
                .field("key", key)
                .field("source", source)
                .finish(),
        }
    }
}

impl<Storage: RepoStorage> fmt::Display for RepoError<Storage> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::Validation(e) => write!(f, "invalid dataset: {e}"),
            RepoError::Body(e) => write!(f, "{e}"),
            RepoError::VersionConflict {
                name,
                expected,
                actual,
            } => {
                let show = |key: &Option<ContentKey>| match key {
                    Some(key) => key.to_string(),
                    None => "nothing".to_owned(),
                };
                write!(
                    f,
                    "version conflict on {name}: expected {}, found {}",
                    show(expected),
                    show(actual)
                )
            }
            RepoError::RefNotFound(name) => write!(f, "reference {name} not found"),
            RepoError::NotPinner => write!(f, "repo doesn't support pinning"),
            RepoError::BlobPut(e) => write!(f, "storing blob: {e}"),
            RepoError::BlobGet(e) => write!(f, "loading blob: {e}"),
            RepoError::Pin(e) => write!(f, "pinning: {e}"),
            RepoError::Refs(e) => write!(f, "reference index: {e}"),
            RepoError::Events(e) => write!(f, "event log: {e}"),
            RepoError::Encode(e) => write!(f, "encoding dataset: {e}"),
            RepoError::Decode { key, source } => write!(f, "decoding dataset {key}: {source}"),
        }
    }
}

impl<Storage: RepoStorage> Error for RepoError<Storage> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RepoError::Validation(e) => Some(e),
            RepoError::Body(e) => Some(e),
            RepoError::BlobPut(e) => Some(e),
            RepoError::BlobGet(e) => Some(e),
            RepoError::Pin(e) => Some(e),
            RepoError::Refs(e) => Some(e),
            RepoError::Events(e) => Some(e),
            RepoError::Encode(e) => Some(e),
            RepoError::Decode { source, .. } => Some(source),
            RepoError::VersionConflict { .. } | RepoError::RefNotFound(_) | RepoError::NotPinner => {
                None
            }
        }
    }
}

impl<Storage: RepoStorage> From<ValidationError> for RepoError<Storage> {
    fn from(e: ValidationError) -> Self {
        RepoError::Validation(e)
    }
}

impl<Storage: RepoStorage> From<BodyError> for RepoError<Storage> {
    fn from(e: BodyError) -> Self {
        RepoError::Body(e)
    }
}

/// Dataset operations over a storage backend.
///
/// Every method takes `&self`; share a repository between threads by wrapping
/// it in an `Arc`. Concurrent writers to the same name are serialized by the
/// compare-and-swap in [`RefStore::update`], the loser gets
/// [`RepoError::VersionConflict`].
pub struct Repository<Storage: RepoStorage> {
    storage: Storage,
    owner: String,
    resolver: BodyResolver,
    pin_on_create: bool,
}

impl<Storage: RepoStorage> Debug for Repository<Storage> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl<Storage: RepoStorage> Repository<Storage> {
    pub fn new(storage: Storage, owner: impl Into<String>) -> Self {
        Self {
            storage,
            owner: owner.into(),
            resolver: BodyResolver::default(),
            pin_on_create: false,
        }
    }

    pub fn with_config(storage: Storage, config: &Config) -> Self {
        Self {
            storage,
            owner: config.owner.clone(),
            resolver: BodyResolver::from_config(config),
            pin_on_create: config.pin_on_create,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn into_storage(self) -> Storage {
        self.storage
    }

    /// Resolves the body of `pod` and saves it as a new version of `name`.
    /// Pins when the repository is configured to pin on create.
    pub fn create_dataset_from_pod(
        &self,
        name: &str,
        pod: &DatasetPod,
    ) -> Result<DatasetRef, RepoError<Storage>> {
        let dataset = pod.dataset();
        validate::ref_name(name)?;
        validate::dataset(&dataset)?;
        let body = self.resolver.resolve(pod)?;
        self.create_dataset(name, dataset, Some(body), self.pin_on_create)
    }

    /// Saves a new version of `name` owned by this repository.
    ///
    /// If `dataset.previous_path` is set it must name the current version of
    /// the reference; if it is unset no reference may exist yet. Anything else
    /// fails with [`RepoError::VersionConflict`] and leaves the reference as
    /// it was. The body is always consumed.
    pub fn create_dataset(
        &self,
        name: &str,
        mut dataset: Dataset,
        body: Option<BodyFile>,
        pin: bool,
    ) -> Result<DatasetRef, RepoError<Storage>> {
        validate::ref_name(name)?;
        validate::dataset(&dataset)?;
        let body = body.ok_or_else(BodyError::not_found)?;
        let ref_name = RefName::new(self.owner.clone(), name);

        let body_name = body.file_name().to_owned();
        let body_bytes = body.into_bytes().map_err(BodyError::Read)?;
        let body_key = self
            .storage
            .put(&body_name, body_bytes)
            .map_err(RepoError::BlobPut)?;

        let current = self
            .storage
            .get_ref(&ref_name)
            .map_err(RepoError::Refs)?
            .map(|r| r.path);
        if dataset.previous_path != current {
            return Err(RepoError::VersionConflict {
                name: ref_name,
                expected: dataset.previous_path,
                actual: current,
            });
        }

        dataset.body_path = Some(body_key);
        if let Some(commit) = dataset.commit.as_mut() {
            commit.timestamp.get_or_insert_with(timestamp::now);
        }
        let encoded = serde_json::to_vec(&dataset).map_err(RepoError::Encode)?;
        let ds_key = self
            .storage
            .put("dataset.json", encoded.into())
            .map_err(RepoError::BlobPut)?;

        let stored = match self
            .storage
            .update(&ref_name, current, ds_key)
            .map_err(RepoError::Refs)?
        {
            PushResult::Success(stored) => stored,
            PushResult::Conflict(actual) => {
                return Err(RepoError::VersionConflict {
                    name: ref_name,
                    expected: current,
                    actual,
                })
            }
        };

        // the version is visible from here on, log it before anything can fail
        let kind = if current.is_some() {
            EventType::Updated
        } else {
            EventType::Created
        };
        self.log(Event::new(kind, ref_name.clone(), Some(ds_key)))?;
        info!(reference = %ref_name, path = %ds_key, body = %body_key, "saved dataset");

        if pin {
            match self.pin_keys(&[ds_key, body_key]) {
                Ok(()) => {
                    self.log(Event::new(EventType::Pinned, ref_name, Some(ds_key)))?;
                }
                Err(RepoError::NotPinner) => {
                    debug!(reference = %ref_name, "storage does not pin, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(stored)
    }

    /// Current reference of `name` for this repository's owner.
    pub fn get_ref(&self, name: &str) -> Result<DatasetRef, RepoError<Storage>> {
        let ref_name = RefName::new(self.owner.clone(), name);
        self.storage
            .get_ref(&ref_name)
            .map_err(RepoError::Refs)?
            .ok_or(RepoError::RefNotFound(ref_name))
    }

    pub fn read_dataset(&self, reference: &DatasetRef) -> Result<Dataset, RepoError<Storage>> {
        self.load_dataset(&reference.path)
    }

    fn load_dataset(&self, key: &ContentKey) -> Result<Dataset, RepoError<Storage>> {
        let bytes = self.storage.get(key).map_err(RepoError::BlobGet)?;
        serde_json::from_slice(&bytes).map_err(|source| RepoError::Decode { key: *key, source })
    }

    /// The stored body of a dataset, empty when the dataset has none.
    pub fn read_body(&self, dataset: &Dataset) -> Result<Bytes, RepoError<Storage>> {
        match &dataset.body_path {
            Some(key) => self.storage.get(key).map_err(RepoError::BlobGet),
            None => Ok(Bytes::new()),
        }
    }

    /// Walks the version chain from `reference` backwards, newest first.
    pub fn history(
        &self,
        reference: &DatasetRef,
        limit: usize,
    ) -> Result<Vec<(ContentKey, Dataset)>, RepoError<Storage>> {
        let mut versions = Vec::new();
        let mut next = Some(reference.path);
        while let Some(key) = next {
            if versions.len() >= limit {
                break;
            }
            let dataset = self.load_dataset(&key)?;
            next = dataset.previous_path;
            versions.push((key, dataset));
        }
        Ok(versions)
    }

    /// Lists references in creation order.
    ///
    /// Unless `show_all_owners` is set only references of this repository's
    /// owner are returned; with `published_only` only published ones. Both
    /// filters apply before `offset` and `limit`.
    pub fn list_datasets(
        &self,
        limit: usize,
        offset: usize,
        show_all_owners: bool,
        published_only: bool,
    ) -> Result<Vec<DatasetRef>, RepoError<Storage>> {
        let refs = self
            .storage
            .references(usize::MAX, 0)
            .map_err(RepoError::Refs)?;
        Ok(refs
            .into_iter()
            .filter(|r| show_all_owners || r.owner == self.owner)
            .filter(|r| !published_only || r.published)
            .skip(offset)
            .take(limit)
            .collect())
    }

    pub fn set_publish_status(
        &self,
        reference: &DatasetRef,
        published: bool,
    ) -> Result<DatasetRef, RepoError<Storage>> {
        let name = reference.ref_name();
        let updated = self
            .storage
            .set_published(&name, published)
            .map_err(RepoError::Refs)?
            .ok_or_else(|| RepoError::RefNotFound(name.clone()))?;
        let kind = if published {
            EventType::Published
        } else {
            EventType::Unpublished
        };
        self.log(Event::new(kind, name, Some(updated.path)))?;
        Ok(updated)
    }

    /// Pins a dataset version and its body.
    pub fn pin_dataset(&self, reference: &DatasetRef) -> Result<(), RepoError<Storage>> {
        self.storage
            .pin(&reference.path)
            .map_err(RepoError::from_pin)?;
        let dataset = self.read_dataset(reference)?;
        if let Some(body) = dataset.body_path {
            self.storage.pin(&body).map_err(RepoError::from_pin)?;
        }
        self.log(Event::new(
            EventType::Pinned,
            reference.ref_name(),
            Some(reference.path),
        ))
    }

    pub fn unpin_dataset(&self, reference: &DatasetRef) -> Result<(), RepoError<Storage>> {
        self.storage
            .unpin(&reference.path)
            .map_err(RepoError::from_pin)?;
        let dataset = self.read_dataset(reference)?;
        if let Some(body) = dataset.body_path {
            self.storage.unpin(&body).map_err(RepoError::from_pin)?;
        }
        self.log(Event::new(
            EventType::Unpinned,
            reference.ref_name(),
            Some(reference.path),
        ))
    }

    /// Moves the binding of `reference` to `new_name` under the same owner.
    pub fn rename_dataset(
        &self,
        reference: &DatasetRef,
        new_name: &str,
    ) -> Result<DatasetRef, RepoError<Storage>> {
        validate::ref_name(new_name)?;
        let from = reference.ref_name();
        let to = RefName::new(from.owner.clone(), new_name);
        let current = self
            .storage
            .get_ref(&from)
            .map_err(RepoError::Refs)?
            .ok_or_else(|| RepoError::RefNotFound(from.clone()))?;

        let mut moved = current.clone();
        moved.owner = to.owner.clone();
        moved.name = to.name.clone();
        moved.created = timestamp::now();
        moved.updated = moved.created;
        let renamed = match self
            .storage
            .create(&to, moved)
            .map_err(RepoError::Refs)?
        {
            PushResult::Success(stored) => stored,
            PushResult::Conflict(actual) => {
                return Err(RepoError::VersionConflict {
                    name: to,
                    expected: None,
                    actual,
                })
            }
        };

        match self.storage.delete(&from, current.path) {
            Ok(PushResult::Success(_)) => {}
            Ok(PushResult::Conflict(actual)) => {
                self.release(&to, current.path)?;
                return Err(RepoError::VersionConflict {
                    name: from,
                    expected: Some(current.path),
                    actual,
                });
            }
            Err(e) => {
                self.release(&to, current.path)?;
                return Err(RepoError::Refs(e));
            }
        }

        let mut event = Event::new(EventType::Renamed, to.clone(), Some(current.path));
        event.renamed_from = Some(from.clone());
        self.log(event)?;
        info!(from = %from, to = %to, "renamed dataset");
        Ok(renamed)
    }

    /// Removes a binding created by a rename that could not complete.
    fn release(&self, name: &RefName, path: ContentKey) -> Result<(), RepoError<Storage>> {
        match self.storage.delete(name, path).map_err(RepoError::Refs)? {
            PushResult::Success(_) => Ok(()),
            PushResult::Conflict(actual) => Err(RepoError::VersionConflict {
                name: name.clone(),
                expected: Some(path),
                actual,
            }),
        }
    }

    /// Unpins a dataset and removes its reference. The stored versions stay
    /// in the blob store.
    pub fn delete_dataset(&self, reference: &DatasetRef) -> Result<(), RepoError<Storage>> {
        let name = reference.ref_name();
        let current = self
            .storage
            .get_ref(&name)
            .map_err(RepoError::Refs)?
            .ok_or_else(|| RepoError::RefNotFound(name.clone()))?;

        match self.unpin_dataset(&current) {
            Ok(()) | Err(RepoError::NotPinner) => {}
            Err(e) => return Err(e),
        }

        if let PushResult::Conflict(actual) = self
            .storage
            .delete(&name, current.path)
            .map_err(RepoError::Refs)?
        {
            return Err(RepoError::VersionConflict {
                name,
                expected: Some(current.path),
                actual,
            });
        }
        self.log(Event::new(EventType::Deleted, name.clone(), Some(current.path)))?;
        info!(reference = %name, "deleted dataset");
        Ok(())
    }

    /// Logged events, newest first.
    pub fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, RepoError<Storage>> {
        self.storage
            .events(limit, offset)
            .map_err(RepoError::Events)
    }

    fn pin_keys(&self, keys: &[ContentKey]) -> Result<(), RepoError<Storage>> {
        for key in keys {
            self.storage.pin(key).map_err(RepoError::from_pin)?;
        }
        Ok(())
    }

    fn log(&self, event: Event) -> Result<(), RepoError<Storage>> {
        debug!(kind = %event.kind, reference = %event.reference, "event");
        self.storage.append_event(event).map_err(RepoError::Events)
    }
}
