use std::error::Error;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::executor::block_on;
use futures::StreamExt;
use itertools::Itertools;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::parse_url;
use object_store::GetResult;
use object_store::ObjectStore;
use object_store::PutMode;
use object_store::UpdateVersion;
use quick_cache::sync::Cache;
use tracing::debug;
use tracing::trace;
use url::Url;

use crate::config::Config;
use crate::config::ConfigError;
use crate::key::ContentKey;
use crate::refs::DatasetRef;
use crate::refs::Event;
use crate::refs::RefName;
use crate::timestamp;

use super::BlobStoreGet;
use super::BlobStorePin;
use super::BlobStorePut;
use super::EventLog;
use super::PushResult;
use super::RefStore;
use super::Repository;

const BLOB_INFIX: &str = "blobs";
const REF_INFIX: &str = "refs";
const EVENT_INFIX: &str = "events";

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Repository storage backed by an [`object_store`] compatible backend.
///
/// All data is stored in an external service (e.g. S3, local filesystem) via
/// the `object_store` crate:
///
/// - `<prefix>/blobs/<hex>` immutable blobs,
/// - `<prefix>/refs/<owner>/<name>` references as JSON, updated with
///   conditional puts,
/// - `<prefix>/events/<nanos>-<uuid>` one JSON object per event.
///
/// Reference updates rely on conditional puts, which not every backend
/// implements (the local filesystem backend does not). Pinning is not
/// supported.
pub struct ObjectStoreRemote {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    blob_cache: Cache<ContentKey, Bytes>,
}

impl fmt::Debug for ObjectStoreRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreRemote")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreRemote {
    /// Creates storage pointing at the object store described by `url`.
    pub fn with_url(url: &Url) -> Result<ObjectStoreRemote, object_store::Error> {
        let (store, path) = parse_url(url)?;
        Ok(Self::new(Arc::from(store), path))
    }

    /// Opens the store named by `config.storage_url`, or a fresh in-memory
    /// store when no URL is configured.
    pub fn from_config(config: &Config) -> Result<ObjectStoreRemote, OpenError> {
        match config.storage_url().map_err(OpenError::Config)? {
            Some(url) => {
                debug!(%url, "opening object store");
                Self::with_url(&url).map_err(OpenError::Store)
            }
            None => Ok(Self::new(Arc::new(InMemory::new()), Path::default())),
        }
    }

    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        ObjectStoreRemote {
            store,
            prefix,
            blob_cache: Cache::new(DEFAULT_CACHE_CAPACITY),
        }
    }

    fn blob_path(&self, key: &ContentKey) -> Path {
        self.prefix.child(BLOB_INFIX).child(key.to_hex())
    }

    fn ref_path(&self, name: &RefName) -> Path {
        self.prefix
            .child(REF_INFIX)
            .child(name.owner.as_str())
            .child(name.name.as_str())
    }

    fn list(&self, infix: &str) -> Result<Vec<Path>, object_store::Error> {
        let prefix = self.prefix.child(infix);
        let metas: Vec<_> = block_on(self.store.list(Some(&prefix)).collect::<Vec<_>>());
        metas
            .into_iter()
            .map(|meta| meta.map(|meta| meta.location))
            .collect()
    }

    fn read_ref(&self, path: &Path) -> Result<Option<(DatasetRef, UpdateVersion)>, IndexErr> {
        match block_on(self.store.get(path)) {
            Ok(object) => {
                let (record, version) = decode_versioned(path, object)?;
                Ok(Some((record, version)))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(IndexErr::Store(e)),
        }
    }

    fn write_ref(&self, path: &Path, record: &DatasetRef, mode: PutMode) -> object_store::Result<()> {
        let json = match serde_json::to_vec(record) {
            Ok(json) => json,
            Err(e) => {
                return Err(object_store::Error::Generic {
                    store: "datapile",
                    source: Box::new(e),
                })
            }
        };
        block_on(self.store.put_opts(path, Bytes::from(json).into(), mode.into())).map(|_| ())
    }
}

fn decode_versioned(path: &Path, object: GetResult) -> Result<(DatasetRef, UpdateVersion), IndexErr> {
    let version = UpdateVersion {
        e_tag: object.meta.e_tag.clone(),
        version: object.meta.version.clone(),
    };
    let bytes = block_on(object.bytes())?;
    let record = serde_json::from_slice(&bytes).map_err(|source| IndexErr::Decode {
        path: path.to_string(),
        source,
    })?;
    Ok((record, version))
}

impl BlobStorePut for ObjectStoreRemote {
    type PutError = object_store::Error;

    fn put(&self, name: &str, bytes: Bytes) -> Result<ContentKey, Self::PutError> {
        let key = ContentKey::digest(&bytes);
        let path = self.blob_path(&key);
        let result = block_on(async {
            self.store
                .put_opts(&path, bytes.clone().into(), PutMode::Create.into())
                .await
        });
        match result {
            Ok(_) | Err(object_store::Error::AlreadyExists { .. }) => {
                trace!(%key, name, "stored blob");
                self.blob_cache.insert(key, bytes);
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }
}

impl BlobStoreGet for ObjectStoreRemote {
    type GetError = object_store::Error;

    fn get(&self, key: &ContentKey) -> Result<Bytes, Self::GetError> {
        if let Some(bytes) = self.blob_cache.get(key) {
            return Ok(bytes);
        }
        let path = self.blob_path(key);
        let object = block_on(async { self.store.get(&path).await })?;
        let bytes = block_on(object.bytes())?;
        self.blob_cache.insert(*key, bytes.clone());
        Ok(bytes)
    }
}

impl BlobStorePin for ObjectStoreRemote {
    type PinError = std::convert::Infallible;
}

impl RefStore for ObjectStoreRemote {
    type RefError = IndexErr;

    fn get_ref(&self, name: &RefName) -> Result<Option<DatasetRef>, Self::RefError> {
        Ok(self.read_ref(&self.ref_path(name))?.map(|(record, _)| record))
    }

    fn update(
        &self,
        name: &RefName,
        old: Option<ContentKey>,
        new: ContentKey,
    ) -> Result<PushResult, Self::RefError> {
        let path = self.ref_path(name);
        if let Some(old) = old {
            loop {
                let Some((mut record, version)) = self.read_ref(&path)? else {
                    return Ok(PushResult::Conflict(None));
                };
                if record.path != old {
                    return Ok(PushResult::Conflict(Some(record.path)));
                }
                record.path = new;
                record.updated = timestamp::now();
                match self.write_ref(&path, &record, PutMode::Update(version)) {
                    Ok(()) => return Ok(PushResult::Success(record)),
                    Err(object_store::Error::Precondition { .. }) => continue,
                    Err(e) => return Err(IndexErr::Store(e)),
                }
            }
        } else {
            self.create(name, DatasetRef::new(name, new))
        }
    }

    fn create(&self, name: &RefName, mut record: DatasetRef) -> Result<PushResult, Self::RefError> {
        let path = self.ref_path(name);
        record.owner = name.owner.clone();
        record.name = name.name.clone();
        loop {
            match self.write_ref(&path, &record, PutMode::Create) {
                Ok(()) => return Ok(PushResult::Success(record)),
                Err(object_store::Error::AlreadyExists { .. }) => match self.read_ref(&path)? {
                    Some((existing, _)) => return Ok(PushResult::Conflict(Some(existing.path))),
                    // deleted in between, try again
                    None => continue,
                },
                Err(e) => return Err(IndexErr::Store(e)),
            }
        }
    }

    fn delete(&self, name: &RefName, old: ContentKey) -> Result<PushResult, Self::RefError> {
        let path = self.ref_path(name);
        let Some((record, _)) = self.read_ref(&path)? else {
            return Ok(PushResult::Conflict(None));
        };
        if record.path != old {
            return Ok(PushResult::Conflict(Some(record.path)));
        }
        // object_store has no conditional delete, an update landing between
        // the read above and this call is lost.
        block_on(self.store.delete(&path))?;
        Ok(PushResult::Success(record))
    }

    fn references(&self, limit: usize, offset: usize) -> Result<Vec<DatasetRef>, Self::RefError> {
        let mut refs = Vec::new();
        for path in self.list(REF_INFIX)? {
            // listed objects may vanish before we read them
            if let Some((record, _)) = self.read_ref(&path)? {
                refs.push(record);
            }
        }
        Ok(refs
            .into_iter()
            .sorted_by(|a, b| {
                timestamp::unix_nanos(&a.created)
                    .cmp(&timestamp::unix_nanos(&b.created))
                    .then_with(|| a.owner.cmp(&b.owner))
                    .then_with(|| a.name.cmp(&b.name))
            })
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn set_published(
        &self,
        name: &RefName,
        published: bool,
    ) -> Result<Option<DatasetRef>, Self::RefError> {
        let path = self.ref_path(name);
        loop {
            let Some((mut record, version)) = self.read_ref(&path)? else {
                return Ok(None);
            };
            record.published = published;
            match self.write_ref(&path, &record, PutMode::Update(version)) {
                Ok(()) => return Ok(Some(record)),
                Err(object_store::Error::Precondition { .. }) => continue,
                Err(e) => return Err(IndexErr::Store(e)),
            }
        }
    }
}

impl EventLog for ObjectStoreRemote {
    type EventError = IndexErr;

    fn append_event(&self, event: Event) -> Result<(), Self::EventError> {
        let nanos = timestamp::unix_nanos(&event.timestamp).max(0);
        let name = format!("{nanos:020}-{}", uuid::Uuid::new_v4());
        let path = self.prefix.child(EVENT_INFIX).child(name);
        let json = serde_json::to_vec(&event).map_err(IndexErr::Encode)?;
        block_on(
            self.store
                .put_opts(&path, Bytes::from(json).into(), PutMode::Create.into()),
        )?;
        debug!(kind = %event.kind, %path, "appended event");
        Ok(())
    }

    fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>, Self::EventError> {
        let paths = self.list(EVENT_INFIX)?;
        paths
            .into_iter()
            .sorted_by(|a, b| b.cmp(a))
            .skip(offset)
            .take(limit)
            .map(|path| {
                let object = block_on(self.store.get(&path))?;
                let bytes = block_on(object.bytes())?;
                serde_json::from_slice(&bytes).map_err(|source| IndexErr::Decode {
                    path: path.to_string(),
                    source,
                })
            })
            .collect()
    }
}

impl Repository<ObjectStoreRemote> {
    /// A repository over the object store named in `config`.
    pub fn open(config: &Config) -> Result<Self, OpenError> {
        let storage = ObjectStoreRemote::from_config(config)?;
        Ok(Repository::with_config(storage, config))
    }
}

#[derive(Debug)]
pub enum OpenError {
    Config(ConfigError),
    Store(object_store::Error),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "bad storage configuration: {e}"),
            Self::Store(e) => write!(f, "opening object store: {e}"),
        }
    }
}

impl Error for OpenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Store(e) => Some(e),
        }
    }
}

/// Errors of the reference index and event log.
#[derive(Debug)]
pub enum IndexErr {
    Store(object_store::Error),
    Encode(serde_json::Error),
    Decode {
        path: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for IndexErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "object store error: {e}"),
            Self::Encode(e) => write!(f, "encoding failed: {e}"),
            Self::Decode { path, source } => write!(f, "bad record at {path}: {source}"),
        }
    }
}

impl Error for IndexErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode { source, .. } => Some(source),
        }
    }
}

impl From<object_store::Error> for IndexErr {
    fn from(err: object_store::Error) -> Self {
        Self::Store(err)
    }
}
