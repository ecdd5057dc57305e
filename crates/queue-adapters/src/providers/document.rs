//! Document-collection queue provider.
//!
//! Each queue is a collection of documents in a [`DocumentStore`]. Two
//! collection flavours exist, fixed by the provider configuration:
//!
//! - **Uncapped** collections behave like the other providers and are
//!   created on first write.
//! - **Capped** collections hold at most `max_documents` documents and evict
//!   the oldest on overflow. Documents cannot be removed individually, so a
//!   claim consumes the document: it is claimed without expiry and stays
//!   hidden until evicted. In exchange, inserts are pushed to tailing
//!   readers, which gives native await.
//!
//! Document ids are monotonic ULIDs, so id order is insertion order.

use crate::client::{InsertSubscription, QueueProvider};
use crate::error::QueueError;
use crate::message::{MessageId, QueueId, QueueName};
use crate::provider::{Capabilities, DocumentConfig, ProviderType, ReceiveParam, SendParam};
use crate::record::{Claim, MessageRecord, NewRecord, RecordMatch, ScanFilter, VisibilityUpdate};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;

const UNCAPPED_CAPABILITIES: Capabilities = Capabilities {
    delete_message: true,
    count_messages: true,
    list_queues: true,
    await_messages: false,
    auto_create_queues: true,
    send_params: &[SendParam::Schedule, SendParam::RepeatingInterval],
    receive_params: &[
        ReceiveParam::VisibilityTimeout,
        ReceiveParam::ClassFilter,
        ReceiveParam::PeekMode,
    ],
};

const CAPPED_CAPABILITIES: Capabilities = Capabilities {
    delete_message: false,
    count_messages: true,
    list_queues: true,
    await_messages: true,
    auto_create_queues: false,
    send_params: &[],
    receive_params: &[ReceiveParam::ClassFilter],
};

struct Collection {
    /// Maximum document count for capped collections
    capped: Option<usize>,
    documents: VecDeque<MessageRecord>,
    /// Bumped on every insert
    inserts: watch::Sender<u64>,
}

impl Collection {
    fn new(capped: Option<usize>) -> Self {
        let (inserts, _) = watch::channel(0);
        Self {
            capped,
            documents: VecDeque::new(),
            inserts,
        }
    }

    fn position(&self, id: &MessageId, expected: &RecordMatch) -> Option<usize> {
        self.documents
            .iter()
            .position(|doc| &doc.id == id && doc.matches(expected))
    }
}

struct StoreState {
    collections: BTreeMap<String, Collection>,
    ids: ulid::Generator,
}

/// In-process document database shared by any number of providers.
///
/// Clones refer to the same database, so providers built over clones of one
/// store act as independent consumers of the same collections.
#[derive(Clone)]
pub struct DocumentStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                collections: BTreeMap::new(),
                ids: ulid::Generator::new(),
            })),
        }
    }

    fn lock(&self, operation: &str) -> Result<MutexGuard<'_, StoreState>, QueueError> {
        self.state.lock().map_err(|_| {
            QueueError::storage(ProviderType::Document, operation, "store lock poisoned")
        })
    }
}

/// Queue provider over the collections of a [`DocumentStore`]
#[derive(Debug, Clone)]
pub struct DocumentProvider {
    store: DocumentStore,
    config: DocumentConfig,
}

impl DocumentProvider {
    pub fn new(store: DocumentStore, config: DocumentConfig) -> Self {
        Self { store, config }
    }

    pub fn is_capped(&self) -> bool {
        self.config.capped.is_some()
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }
}

fn with_collection<'a>(
    state: &'a mut StoreState,
    queue_id: &QueueId,
) -> Result<&'a mut Collection, QueueError> {
    state
        .collections
        .get_mut(queue_id.as_str())
        .ok_or_else(|| QueueError::queue_not_found(queue_id.as_str()))
}

#[async_trait]
impl QueueProvider for DocumentProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Document
    }

    fn capabilities(&self) -> Capabilities {
        if self.is_capped() {
            CAPPED_CAPABILITIES
        } else {
            UNCAPPED_CAPABILITIES
        }
    }

    async fn connect(&self) -> Result<(), QueueError> {
        self.store.lock("connect").map(|_| ())
    }

    async fn queue_exists(&self, name: &QueueName) -> Result<bool, QueueError> {
        let state = self.store.lock("queue_exists")?;
        Ok(state.collections.contains_key(name.as_str()))
    }

    async fn create_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        let mut state = self.store.lock("create_queue")?;
        if state.collections.contains_key(name.as_str()) {
            return Ok(false);
        }
        let capped = self.config.capped.map(|capped| capped.max_documents);
        state
            .collections
            .insert(name.as_str().to_string(), Collection::new(capped));
        debug!(collection = %name, capped = ?capped, "Collection created");
        Ok(true)
    }

    async fn delete_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        let mut state = self.store.lock("delete_queue")?;
        Ok(state.collections.remove(name.as_str()).is_some())
    }

    async fn get_queue_id(&self, name: &QueueName) -> Result<QueueId, QueueError> {
        let state = self.store.lock("get_queue_id")?;
        if state.collections.contains_key(name.as_str()) {
            Ok(QueueId::new(name.as_str()))
        } else {
            Err(QueueError::queue_not_found(name.as_str()))
        }
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        let state = self.store.lock("list_queues")?;
        state
            .collections
            .keys()
            .map(|name| QueueName::new(name.clone()).map_err(QueueError::from))
            .collect()
    }

    async fn insert_record(
        &self,
        queue_id: &QueueId,
        record: NewRecord,
    ) -> Result<MessageId, QueueError> {
        let mut state = self.store.lock("insert_record")?;
        let id = state
            .ids
            .generate()
            .map_err(|e| QueueError::storage(ProviderType::Document, "insert_record", e))?;
        let id = MessageId::new(id.to_string());

        let collection = with_collection(&mut state, queue_id)?;
        if let Some(max) = collection.capped {
            while collection.documents.len() >= max {
                let Some(evicted) = collection.documents.pop_front() else {
                    break;
                };
                debug!(message_id = %evicted.id, "Capped collection full, evicting oldest document");
            }
        }
        collection
            .documents
            .push_back(MessageRecord::from_new(id.clone(), queue_id.clone(), record));
        collection.inserts.send_modify(|inserted| *inserted += 1);
        Ok(id)
    }

    async fn claim_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        claim: &Claim,
    ) -> Result<Option<MessageRecord>, QueueError> {
        let mut state = self.store.lock("claim_visible")?;
        let collection = with_collection(&mut state, queue_id)?;

        Ok(collection
            .documents
            .iter_mut()
            .find(|doc| doc.is_claimable(filter))
            .map(|doc| {
                doc.apply_claim(claim);
                doc.clone()
            }))
    }

    async fn peek_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, QueueError> {
        let mut state = self.store.lock("peek_visible")?;
        let collection = with_collection(&mut state, queue_id)?;

        Ok(collection
            .documents
            .iter()
            .filter(|doc| doc.is_claimable(filter))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_visibility(
        &self,
        queue_id: &QueueId,
        id: &MessageId,
        expected: &RecordMatch,
        update: VisibilityUpdate,
    ) -> Result<bool, QueueError> {
        let mut state = self.store.lock("update_visibility")?;
        let collection = with_collection(&mut state, queue_id)?;

        let Some(index) = collection.position(id, expected) else {
            return Ok(false);
        };
        if let Some(doc) = collection.documents.get_mut(index) {
            doc.apply_update(&update);
        }
        Ok(true)
    }

    async fn delete_record(
        &self,
        queue_id: &QueueId,
        id: &MessageId,
        expected: &RecordMatch,
    ) -> Result<bool, QueueError> {
        if self.is_capped() {
            return Err(QueueError::unsupported(
                ProviderType::Document,
                "delete_message on a capped collection",
            ));
        }

        let mut state = self.store.lock("delete_record")?;
        let collection = with_collection(&mut state, queue_id)?;

        Ok(collection
            .position(id, expected)
            .and_then(|index| collection.documents.remove(index))
            .is_some())
    }

    async fn count_visible(&self, queue_id: &QueueId) -> Result<u64, QueueError> {
        let mut state = self.store.lock("count_visible")?;
        let collection = with_collection(&mut state, queue_id)?;

        let count = collection
            .documents
            .iter()
            .filter(|doc| doc.handle.is_none())
            .count();
        Ok(count as u64)
    }

    async fn subscribe(&self, queue_id: &QueueId) -> Result<InsertSubscription, QueueError> {
        if !self.is_capped() {
            return Err(QueueError::unsupported(
                ProviderType::Document,
                "await_messages on an uncapped collection",
            ));
        }

        let mut state = self.store.lock("subscribe")?;
        let collection = with_collection(&mut state, queue_id)?;
        Ok(InsertSubscription::new(
            collection.inserts.subscribe(),
            self.config.tail_timeout(),
        ))
    }
}
