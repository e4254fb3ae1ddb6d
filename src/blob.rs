//! Blob stores keep immutable byte sequences addressed by their
//! [`ContentKey`](crate::key::ContentKey).

pub mod memoryblobstore;

pub use memoryblobstore::MemoryBlobStore;

use hifitime::Epoch;

/// What a store knows about a blob besides its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobMetadata {
    /// Name the blob was first stored under.
    pub name: String,
    pub length: u64,
    pub stored: Epoch,
}
