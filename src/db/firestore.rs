// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore backend for the storage seams.
//!
//! Layout:
//! - `items/{pk}|{sk}`: event and profile records, body kept as JSON text
//! - `boards/{key}`: weekly board documents with a content version tag
//!
//! Conditional writes run as Firestore transactions: the current document is
//! read inside the transaction, the predicate is checked, and the write is
//! committed. Firestore aborts the commit if the document changed after the
//! read, in which case the whole read-check-write is retried.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{
    collections, single_partition, version_tag, Item, ItemKey, KeyValueStore, ObjectStore, Patch,
    Predicate, SortKeyRange, TransactWrite, VersionedObject,
};
use crate::error::{AppError, StoreError};
use async_trait::async_trait;
use firestore::errors::FirestoreError;
use firestore::{FirestoreConsistencySelector, FirestoreQueryDirection, FirestoreTransaction};

// Firestore limits transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Commit attempts before contention is reported as a transport error.
const COMMIT_ATTEMPTS: u32 = 5;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

/// Stored shape of a key-value record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    pk: String,
    sk: String,
    /// Record fields as a JSON object
    body: String,
}

/// Stored shape of a versioned object.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObject {
    key: String,
    body: String,
    version: String,
}

pub(crate) fn transport(e: impl std::fmt::Display) -> StoreError {
    StoreError::Transport(e.to_string())
}

fn item_doc_id(key: &ItemKey) -> String {
    format!(
        "{}|{}",
        urlencoding::encode(&key.pk),
        urlencoding::encode(&key.sk)
    )
}

fn decode_item(stored: StoredItem) -> Result<Item, StoreError> {
    match serde_json::from_str(&stored.body) {
        Ok(Value::Object(item)) => Ok(item),
        Ok(_) => Err(StoreError::Transport(format!(
            "record {}/{} is not an object",
            stored.pk, stored.sk
        ))),
        Err(e) => Err(transport(e)),
    }
}

fn encode_item(key: &ItemKey, mut item: Item) -> Result<StoredItem, StoreError> {
    item.insert("pk".to_string(), key.pk.clone().into());
    item.insert("sk".to_string(), key.sk.clone().into());
    let body = serde_json::to_string(&item).map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
    Ok(StoredItem {
        pk: key.pk.clone(),
        sk: key.sk.clone(),
        body,
    })
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client for testing.
    ///
    /// All operations return a transport error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    pub(crate) fn get_client(&self) -> Result<&firestore::FirestoreDb, StoreError> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Transport("Database not connected (offline mode)".to_string()))
    }

    /// Begin a transaction and a client whose reads join it.
    pub(crate) async fn begin(
        &self,
    ) -> Result<(FirestoreTransaction<'_>, firestore::FirestoreDb), StoreError> {
        let client = self.get_client()?;
        let transaction = client
            .begin_transaction()
            .await
            .map_err(|e| StoreError::Transport(format!("Failed to begin transaction: {}", e)))?;
        let reader = client.clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
            transaction.transaction_id().clone(),
        ));
        Ok((transaction, reader))
    }

    async fn read_item_in(
        reader: &firestore::FirestoreDb,
        key: &ItemKey,
    ) -> Result<Option<Item>, StoreError> {
        let stored: Option<StoredItem> = reader
            .fluent()
            .select()
            .by_id_in(collections::ITEMS)
            .obj()
            .one(&item_doc_id(key))
            .await
            .map_err(|e| StoreError::Transport(format!("Failed to read in transaction: {}", e)))?;
        stored.map(decode_item).transpose()
    }

    fn stage_put(
        &self,
        transaction: &mut FirestoreTransaction<'_>,
        key: &ItemKey,
        item: Item,
    ) -> Result<(), StoreError> {
        let stored = encode_item(key, item)?;
        self.get_client()?
            .fluent()
            .update()
            .in_col(collections::ITEMS)
            .document_id(item_doc_id(key))
            .object(&stored)
            .add_to_transaction(transaction)
            .map_err(|e| StoreError::Transport(format!("Failed to add write to transaction: {}", e)))?;
        Ok(())
    }

    fn stage_delete(
        &self,
        transaction: &mut FirestoreTransaction<'_>,
        key: &ItemKey,
    ) -> Result<(), StoreError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::ITEMS)
            .document_id(item_doc_id(key))
            .add_to_transaction(transaction)
            .map_err(|e| {
                StoreError::Transport(format!("Failed to add deletion to transaction: {}", e))
            })?;
        Ok(())
    }
}

/// Outcome of one read-check-write attempt.
pub(crate) enum Attempt<T> {
    Done(T),
    /// Commit lost to a concurrent writer; read again
    Contended(String),
}

/// Commit a transaction.
///
/// Only aborted or precondition-failed commits are contention: the server
/// did not apply them. Any other failure may or may not have been applied,
/// so it is reported as a transport error and never retried.
pub(crate) async fn commit<T>(
    transaction: FirestoreTransaction<'_>,
    value: T,
) -> Result<Attempt<T>, StoreError> {
    match transaction.commit().await {
        Ok(_) => Ok(Attempt::Done(value)),
        Err(e) if is_contention(&e) => Ok(Attempt::Contended(e.to_string())),
        Err(e) => Err(StoreError::Transport(format!(
            "Transaction commit failed: {}",
            e
        ))),
    }
}

/// Whether a Firestore error is a lost optimistic-concurrency race.
pub(crate) fn is_contention(err: &FirestoreError) -> bool {
    is_contention_status(&format!("{:?}", err))
}

/// gRPC status codes Firestore uses for transactions that lost a race.
fn is_contention_status(detail: &str) -> bool {
    ["Aborted", "FailedPrecondition", "ABORTED", "FAILED_PRECONDITION"]
        .iter()
        .any(|code| detail.contains(code))
}

pub(crate) async fn abandon(transaction: FirestoreTransaction<'_>) {
    if let Err(e) = transaction.rollback().await {
        tracing::warn!(error = %e, "Transaction rollback failed");
    }
}

#[async_trait]
impl KeyValueStore for FirestoreDb {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let stored: Option<StoredItem> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ITEMS)
            .obj()
            .one(&item_doc_id(key))
            .await
            .map_err(transport)?;
        stored.map(decode_item).transpose()
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
        let pk = pk.to_string();
        let start = range.start.clone();
        let end = range.end.clone();

        let stored: Vec<StoredItem> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ITEMS)
            .filter(move |q| {
                q.for_all([
                    q.field("pk").eq(pk.clone()),
                    q.field("sk").greater_than_or_equal(start.clone()),
                    q.field("sk").less_than_or_equal(end.clone()),
                ])
            })
            .order_by([("sk", FirestoreQueryDirection::Ascending)])
            .limit(limit as u32)
            .obj()
            .query()
            .await
            .map_err(transport)?;

        stored.into_iter().map(decode_item).collect()
    }

    async fn put_conditional(
        &self,
        key: &ItemKey,
        item: Item,
        predicate: &Predicate,
    ) -> Result<(), StoreError> {
        let mut last_error = String::new();
        for attempt in 1..=COMMIT_ATTEMPTS {
            let (mut transaction, reader) = self.begin().await?;
            let staged = async {
                let current = Self::read_item_in(&reader, key).await?;
                if !predicate.evaluate(current.as_ref()) {
                    return Err(StoreError::PreconditionFailed);
                }
                self.stage_put(&mut transaction, key, item.clone())
            }
            .await;
            if let Err(e) = staged {
                abandon(transaction).await;
                return Err(e);
            }
            match commit(transaction, ()).await? {
                Attempt::Done(()) => return Ok(()),
                Attempt::Contended(e) => {
                    tracing::debug!(pk = %key.pk, sk = %key.sk, attempt, error = %e, "Put commit contended");
                    last_error = e;
                }
            }
        }
        Err(StoreError::Transport(format!(
            "Transaction commit failed: {}",
            last_error
        )))
    }

    async fn update_conditional(
        &self,
        key: &ItemKey,
        patch: &Patch,
        predicate: &Predicate,
    ) -> Result<Item, StoreError> {
        let mut last_error = String::new();
        for attempt in 1..=COMMIT_ATTEMPTS {
            let (mut transaction, reader) = self.begin().await?;
            let staged = async {
                let current = Self::read_item_in(&reader, key).await?;
                if !predicate.evaluate(current.as_ref()) {
                    return Err(StoreError::PreconditionFailed);
                }
                let mut updated = current.unwrap_or_default();
                patch.apply(&mut updated)?;
                self.stage_put(&mut transaction, key, updated.clone())?;
                Ok(updated)
            }
            .await;
            let updated = match staged {
                Ok(updated) => updated,
                Err(e) => {
                    abandon(transaction).await;
                    return Err(e);
                }
            };
            match commit(transaction, updated).await? {
                Attempt::Done(mut updated) => {
                    updated.insert("pk".to_string(), key.pk.clone().into());
                    updated.insert("sk".to_string(), key.sk.clone().into());
                    return Ok(updated);
                }
                Attempt::Contended(e) => {
                    tracing::debug!(pk = %key.pk, sk = %key.sk, attempt, error = %e, "Update commit contended");
                    last_error = e;
                }
            }
        }
        Err(StoreError::Transport(format!(
            "Transaction commit failed: {}",
            last_error
        )))
    }

    async fn delete(&self, key: &ItemKey) -> Result<(), StoreError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::ITEMS)
            .document_id(item_doc_id(key))
            .execute()
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn transact_write(&self, writes: Vec<TransactWrite>) -> Result<(), StoreError> {
        single_partition(&writes)?;
        if writes.is_empty() {
            return Ok(());
        }
        if writes.len() > BATCH_SIZE {
            return Err(StoreError::InvalidArgument(format!(
                "transaction of {} writes exceeds limit of {}",
                writes.len(),
                BATCH_SIZE
            )));
        }

        let mut last_error = String::new();
        for attempt in 1..=COMMIT_ATTEMPTS {
            let (mut transaction, reader) = self.begin().await?;
            let staged = async {
                // All reads happen before any write is staged.
                for write in &writes {
                    if let TransactWrite::Put { key, predicate, .. } = write {
                        let current = Self::read_item_in(&reader, key).await?;
                        if !predicate.evaluate(current.as_ref()) {
                            return Err(StoreError::PreconditionFailed);
                        }
                    }
                }

                for write in &writes {
                    match write {
                        TransactWrite::Put { key, item, .. } => {
                            self.stage_put(&mut transaction, key, item.clone())?
                        }
                        TransactWrite::Delete { key } => self.stage_delete(&mut transaction, key)?,
                    }
                }
                Ok(())
            }
            .await;
            if let Err(e) = staged {
                abandon(transaction).await;
                return Err(e);
            }

            match commit(transaction, ()).await? {
                Attempt::Done(()) => return Ok(()),
                Attempt::Contended(e) => {
                    tracing::debug!(writes = writes.len(), attempt, error = %e, "Batch commit contended");
                    last_error = e;
                }
            }
        }
        Err(StoreError::Transport(format!(
            "Transaction commit failed: {}",
            last_error
        )))
    }
}

#[async_trait]
impl ObjectStore for FirestoreDb {
    async fn get_with_version(&self, key: &str) -> Result<Option<VersionedObject>, StoreError> {
        let stored: Option<StoredObject> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::BOARDS)
            .obj()
            .one(&urlencoding::encode(key))
            .await
            .map_err(transport)?;

        Ok(stored.map(|object| VersionedObject {
            body: object.body.into_bytes(),
            version: object.version,
        }))
    }

    async fn put_if_version_matches(
        &self,
        key: &str,
        body: Vec<u8>,
        expected_version: Option<&str>,
    ) -> Result<String, StoreError> {
        let body = String::from_utf8(body)
            .map_err(|_| StoreError::InvalidArgument("object body is not UTF-8".to_string()))?;
        let doc_id = urlencoding::encode(key).into_owned();
        let version = version_tag(body.as_bytes());

        let (mut transaction, reader) = self.begin().await?;
        let staged = async {
            let current: Option<StoredObject> = reader
                .fluent()
                .select()
                .by_id_in(collections::BOARDS)
                .obj()
                .one(&doc_id)
                .await
                .map_err(|e| {
                    StoreError::Transport(format!("Failed to read in transaction: {}", e))
                })?;

            if current.as_ref().map(|object| object.version.as_str()) != expected_version {
                return Err(StoreError::PreconditionFailed);
            }

            let object = StoredObject {
                key: key.to_string(),
                body,
                version: version.clone(),
            };
            self.get_client()?
                .fluent()
                .update()
                .in_col(collections::BOARDS)
                .document_id(&doc_id)
                .object(&object)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    StoreError::Transport(format!("Failed to add write to transaction: {}", e))
                })?;
            Ok(())
        }
        .await;
        if let Err(e) = staged {
            abandon(transaction).await;
            return Err(e);
        }

        // A contended commit means someone else wrote the object after our read.
        match commit(transaction, version).await? {
            Attempt::Done(version) => Ok(version),
            Attempt::Contended(e) => {
                tracing::debug!(key, error = %e, "Object commit contended");
                Err(StoreError::PreconditionFailed)
            }
        }
    }
}
