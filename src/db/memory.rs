//! Process-local store backends.
//!
//! Used for local development and tests. Each partition (or object) is
//! guarded by its map shard lock for the duration of a conditional write, so
//! the check and the write are atomic per record just like in Firestore.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;

use super::{
    single_partition, version_tag, Item, ItemKey, KeyValueStore, ObjectStore, Patch, Predicate,
    SortKeyRange, TransactWrite, VersionedObject,
};
use crate::error::StoreError;

/// In-memory [`KeyValueStore`]: partition key -> (sort key -> item).
#[derive(Default)]
pub struct MemoryKeyValueStore {
    partitions: DashMap<String, BTreeMap<String, Item>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all partitions.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn with_key(mut item: Item, key: &ItemKey) -> Item {
    item.insert("pk".to_string(), key.pk.clone().into());
    item.insert("sk".to_string(), key.sk.clone().into());
    item
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        Ok(self
            .partitions
            .get(&key.pk)
            .and_then(|partition| partition.get(&key.sk).cloned()))
    }

    async fn query(
        &self,
        pk: &str,
        range: &SortKeyRange,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        if range.start > range.end {
            return Ok(Vec::new());
        }
        Ok(self
            .partitions
            .get(pk)
            .map(|partition| {
                partition
                    .range(range.start.clone()..=range.end.clone())
                    .take(limit)
                    .map(|(_, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_conditional(
        &self,
        key: &ItemKey,
        item: Item,
        predicate: &Predicate,
    ) -> Result<(), StoreError> {
        let mut partition = self.partitions.entry(key.pk.clone()).or_default();
        if !predicate.evaluate(partition.get(&key.sk)) {
            return Err(StoreError::PreconditionFailed);
        }
        partition.insert(key.sk.clone(), with_key(item, key));
        Ok(())
    }

    async fn update_conditional(
        &self,
        key: &ItemKey,
        patch: &Patch,
        predicate: &Predicate,
    ) -> Result<Item, StoreError> {
        let mut partition = self.partitions.entry(key.pk.clone()).or_default();
        let current = partition.get(&key.sk);
        if !predicate.evaluate(current) {
            return Err(StoreError::PreconditionFailed);
        }
        let mut updated = current.cloned().unwrap_or_default();
        patch.apply(&mut updated)?;
        let updated = with_key(updated, key);
        partition.insert(key.sk.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ItemKey) -> Result<(), StoreError> {
        if let Some(mut partition) = self.partitions.get_mut(&key.pk) {
            partition.remove(&key.sk);
        }
        Ok(())
    }

    async fn transact_write(&self, writes: Vec<TransactWrite>) -> Result<(), StoreError> {
        single_partition(&writes)?;
        let Some(first) = writes.first() else {
            return Ok(());
        };

        let mut partition = self.partitions.entry(first.key().pk.clone()).or_default();

        // Check every guard before touching anything.
        for write in &writes {
            if let TransactWrite::Put { key, predicate, .. } = write {
                if !predicate.evaluate(partition.get(&key.sk)) {
                    return Err(StoreError::PreconditionFailed);
                }
            }
        }

        for write in writes {
            match write {
                TransactWrite::Put { key, item, .. } => {
                    let item = with_key(item, &key);
                    partition.insert(key.sk, item);
                }
                TransactWrite::Delete { key } => {
                    partition.remove(&key.sk);
                }
            }
        }
        Ok(())
    }
}

/// In-memory [`ObjectStore`] with content-hash version tags.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, VersionedObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_with_version(&self, key: &str) -> Result<Option<VersionedObject>, StoreError> {
        Ok(self.objects.get(key).map(|object| object.clone()))
    }

    async fn put_if_version_matches(
        &self,
        key: &str,
        body: Vec<u8>,
        expected_version: Option<&str>,
    ) -> Result<String, StoreError> {
        match self.objects.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected_version != Some(occupied.get().version.as_str()) {
                    return Err(StoreError::PreconditionFailed);
                }
                let version = version_tag(&body);
                occupied.insert(VersionedObject {
                    body,
                    version: version.clone(),
                });
                Ok(version)
            }
            Entry::Vacant(vacant) => {
                if expected_version.is_some() {
                    return Err(StoreError::PreconditionFailed);
                }
                let version = version_tag(&body);
                vacant.insert(VersionedObject {
                    body,
                    version: version.clone(),
                });
                Ok(version)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: serde_json::Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_put_conditional_not_exists() {
        let store = MemoryKeyValueStore::new();
        let key = ItemKey::new("USER#a", "PROFILE");

        store
            .put_conditional(&key, item(json!({"username": "a"})), &Predicate::NotExists)
            .await
            .unwrap();
        let second = store
            .put_conditional(&key, item(json!({"username": "b"})), &Predicate::NotExists)
            .await;

        assert_eq!(second, Err(StoreError::PreconditionFailed));
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored["username"], json!("a"));
        assert_eq!(stored["pk"], json!("USER#a"));
    }

    #[tokio::test]
    async fn test_update_conditional_returns_new_values() {
        let store = MemoryKeyValueStore::new();
        let key = ItemKey::new("USER#a", "PROFILE");
        store
            .put_conditional(&key, item(json!({"streak": 4})), &Predicate::Always)
            .await
            .unwrap();

        let updated = store
            .update_conditional(&key, &Patch::new().add("streak", 1), &Predicate::Exists)
            .await
            .unwrap();
        assert_eq!(updated["streak"], json!(5));

        let missing = store
            .update_conditional(
                &ItemKey::new("USER#b", "PROFILE"),
                &Patch::new().add("streak", 1),
                &Predicate::Exists,
            )
            .await;
        assert_eq!(missing, Err(StoreError::PreconditionFailed));
    }

    #[tokio::test]
    async fn test_query_range_is_ordered_and_limited() {
        let store = MemoryKeyValueStore::new();
        for sk in ["EVENT#3", "EVENT#1", "EVENT#2", "PROFILE"] {
            store
                .put_conditional(&ItemKey::new("USER#a", sk), Item::new(), &Predicate::Always)
                .await
                .unwrap();
        }
        let range = SortKeyRange {
            start: "EVENT#1".to_string(),
            end: "EVENT#3".to_string(),
        };

        let all = store.query("USER#a", &range, 10).await.unwrap();
        let sks: Vec<_> = all.iter().map(|i| i["sk"].clone()).collect();
        assert_eq!(sks, vec![json!("EVENT#1"), json!("EVENT#2"), json!("EVENT#3")]);

        assert_eq!(store.query("USER#a", &range, 2).await.unwrap().len(), 2);
        assert!(store.query("USER#b", &range, 10).await.unwrap().is_empty());

        let inverted = SortKeyRange {
            start: "EVENT#3".to_string(),
            end: "EVENT#1".to_string(),
        };
        assert!(store.query("USER#a", &inverted, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transact_write_is_all_or_nothing() {
        let store = MemoryKeyValueStore::new();
        let locked = ItemKey::new("USER#a", "EVENT#2");
        store
            .put_conditional(&locked, item(json!({"immutable": true})), &Predicate::Always)
            .await
            .unwrap();

        let guard = Predicate::Any(vec![
            Predicate::NotExists,
            Predicate::equals("immutable", false),
        ]);
        let result = store
            .transact_write(vec![
                TransactWrite::Put {
                    key: ItemKey::new("USER#a", "EVENT#1"),
                    item: Item::new(),
                    predicate: guard.clone(),
                },
                TransactWrite::Put {
                    key: locked.clone(),
                    item: Item::new(),
                    predicate: guard,
                },
            ])
            .await;

        assert_eq!(result, Err(StoreError::PreconditionFailed));
        assert!(store
            .get(&ItemKey::new("USER#a", "EVENT#1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_transact_write_rejects_cross_partition() {
        let store = MemoryKeyValueStore::new();
        let result = store
            .transact_write(vec![
                TransactWrite::Delete {
                    key: ItemKey::new("USER#a", "EVENT#1"),
                },
                TransactWrite::Delete {
                    key: ItemKey::new("USER#b", "EVENT#1"),
                },
            ])
            .await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_object_versions() {
        let store = MemoryObjectStore::new();

        let v1 = store
            .put_if_version_matches("2026-42.json", b"one".to_vec(), None)
            .await
            .unwrap();
        // First writer wins for a fresh key
        assert_eq!(
            store
                .put_if_version_matches("2026-42.json", b"other".to_vec(), None)
                .await,
            Err(StoreError::PreconditionFailed)
        );

        let v2 = store
            .put_if_version_matches("2026-42.json", b"two".to_vec(), Some(&v1))
            .await
            .unwrap();
        assert_ne!(v1, v2);

        // Stale version tag is rejected
        assert_eq!(
            store
                .put_if_version_matches("2026-42.json", b"three".to_vec(), Some(&v1))
                .await,
            Err(StoreError::PreconditionFailed)
        );

        let stored = store.get_with_version("2026-42.json").await.unwrap().unwrap();
        assert_eq!(stored.body, b"two".to_vec());
        assert_eq!(stored.version, v2);
    }
}
