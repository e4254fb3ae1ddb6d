//! Versioned, content-addressed dataset repository.
//!
//! Dataset versions and their bodies are stored as immutable blobs keyed by
//! their BLAKE3 digest ([`key::ContentKey`]). A reference index maps
//! `owner/name` to the current version; every version points back at the one
//! it replaced. [`repo::Repository`] ties the pieces together and is generic
//! over the storage backend:
//!
//! - [`repo::memoryrepo::MemoryRepo`] keeps everything in memory,
//! - [`repo::objectstore::ObjectStoreRemote`] persists through `object_store`,
//! - [`repo::hybridstore::HybridStore`] combines a blob store with a separate
//!   reference index.

pub mod blob;
pub mod body;
pub mod config;
pub mod dataset;
pub mod key;
pub mod refs;
pub mod repo;
pub mod timestamp;

pub mod prelude {
    pub use crate::body::dataset_pod_body_file;
    pub use crate::body::BodyFile;
    pub use crate::config::Config;
    pub use crate::dataset::base_schema_array;
    pub use crate::dataset::base_schema_object;
    pub use crate::dataset::Commit;
    pub use crate::dataset::DataFormat;
    pub use crate::dataset::Dataset;
    pub use crate::dataset::DatasetPod;
    pub use crate::dataset::Meta;
    pub use crate::dataset::Structure;
    pub use crate::key::ContentKey;
    pub use crate::refs::DatasetRef;
    pub use crate::refs::EventType;
    pub use crate::refs::RefName;
    pub use crate::repo::RepoError;
    pub use crate::repo::Repository;
}
