//! Storage layer.
//!
//! Two capability seams back the domain repositories:
//! - [`KeyValueStore`]: per-user partitions of flat records (events, profiles)
//!   with conditional single-record writes.
//! - [`ObjectStore`]: versioned documents written with compare-on-version
//!   (weekly boards).
//!
//! Both have an in-memory backend and a Firestore backend.

pub mod boards;
pub mod condition;
pub mod events;
pub mod firestore;
pub mod memory;
pub mod profiles;

pub use boards::BoardStore;
pub use condition::{Item, Patch, PatchOp, Predicate};
pub use events::EventStore;
pub use firestore::FirestoreDb;
pub use memory::{MemoryKeyValueStore, MemoryObjectStore};
pub use profiles::ProfileStore;

use crate::error::StoreError;
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    /// Event and profile records (keyed by partition/sort key)
    pub const ITEMS: &str = "items";
    /// Weekly board documents
    pub const BOARDS: &str = "boards";
    /// Pending rating update envelopes
    pub const RATING_UPDATES: &str = "rating_updates";
}

/// Primary key of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    /// Partition key, e.g. `USER#{user_id}`
    pub pk: String,
    /// Sort key, e.g. `PROFILE` or `EVENT#{start_time}`
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

/// Inclusive sort key range within one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKeyRange {
    pub start: String,
    pub end: String,
}

impl SortKeyRange {
    pub fn contains(&self, sk: &str) -> bool {
        sk >= self.start.as_str() && sk <= self.end.as_str()
    }
}

/// One write of an all-or-nothing batch.
#[derive(Debug, Clone)]
pub enum TransactWrite {
    Put {
        key: ItemKey,
        item: Item,
        predicate: Predicate,
    },
    Delete {
        key: ItemKey,
    },
}

impl TransactWrite {
    pub fn key(&self) -> &ItemKey {
        match self {
            TransactWrite::Put { key, .. } | TransactWrite::Delete { key } => key,
        }
    }
}

/// Per-partition record store with conditional writes.
///
/// Stored items carry their `pk` and `sk` as fields.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Point lookup.
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// Records of one partition within a sort key range, ascending, at most `limit`.
    async fn query(
        &self,
        pk: &str,
        range: &SortKeyRange,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError>;

    /// Replace the record if `predicate` holds for the current one.
    async fn put_conditional(
        &self,
        key: &ItemKey,
        item: Item,
        predicate: &Predicate,
    ) -> Result<(), StoreError>;

    /// Apply `patch` if `predicate` holds; returns the record after the update.
    async fn update_conditional(
        &self,
        key: &ItemKey,
        patch: &Patch,
        predicate: &Predicate,
    ) -> Result<Item, StoreError>;

    /// Unconditional delete; deleting a missing record succeeds.
    async fn delete(&self, key: &ItemKey) -> Result<(), StoreError>;

    /// Apply all writes or none. All keys must share one partition.
    async fn transact_write(&self, writes: Vec<TransactWrite>) -> Result<(), StoreError>;
}

/// Stored object together with its opaque version tag.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedObject {
    pub body: Vec<u8>,
    pub version: String,
}

/// Versioned document store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_with_version(&self, key: &str) -> Result<Option<VersionedObject>, StoreError>;

    /// Write `body` if the stored version still equals `expected_version`.
    ///
    /// `None` means the object must not exist yet. Returns the new version tag.
    async fn put_if_version_matches(
        &self,
        key: &str,
        body: Vec<u8>,
        expected_version: Option<&str>,
    ) -> Result<String, StoreError>;
}

/// Version tag of an object body (content hash, hex encoded).
pub fn version_tag(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(body))
}

/// Reject batches spanning more than one partition.
pub(crate) fn single_partition(writes: &[TransactWrite]) -> Result<(), StoreError> {
    if let Some(first) = writes.first() {
        if writes.iter().any(|w| w.key().pk != first.key().pk) {
            return Err(StoreError::InvalidArgument(
                "transaction spans multiple partitions".to_string(),
            ));
        }
    }
    Ok(())
}
