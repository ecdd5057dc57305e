//! In-memory queue provider implementation for testing and development.
//!
//! All queues live in one map behind a single lock, which makes every
//! primitive, claims included, trivially atomic. Clones share the same state,
//! so two clients built from clones of one provider behave like two consumers
//! of one backend.
//!
//! This provider is intended for:
//! - Unit testing of queue consumers
//! - Reference semantics for the persistent providers

use crate::client::{InsertSubscription, QueueProvider};
use crate::error::QueueError;
use crate::message::{MessageId, QueueId, QueueName};
use crate::provider::{Capabilities, ProviderType, ReceiveParam, SendParam};
use crate::record::{Claim, MessageRecord, NewRecord, RecordMatch, ScanFilter, VisibilityUpdate};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const CAPABILITIES: Capabilities = Capabilities {
    delete_message: true,
    count_messages: true,
    list_queues: true,
    await_messages: false,
    auto_create_queues: false,
    send_params: &[SendParam::Schedule, SendParam::RepeatingInterval],
    receive_params: &[
        ReceiveParam::VisibilityTimeout,
        ReceiveParam::ClassFilter,
        ReceiveParam::PeekMode,
    ],
};

/// Records of one queue, keyed by insertion sequence
type QueueRecords = BTreeMap<u64, MessageRecord>;

#[derive(Default)]
struct MemoryState {
    queues: BTreeMap<QueueName, QueueRecords>,
    next_id: u64,
}

impl MemoryState {
    fn records(&self, queue_id: &QueueId) -> Result<&QueueRecords, QueueError> {
        self.queues
            .get(queue_id.as_str())
            .ok_or_else(|| QueueError::queue_not_found(queue_id.as_str()))
    }

    fn records_mut(&mut self, queue_id: &QueueId) -> Result<&mut QueueRecords, QueueError> {
        self.queues
            .get_mut(queue_id.as_str())
            .ok_or_else(|| QueueError::queue_not_found(queue_id.as_str()))
    }
}

/// In-memory queue provider
#[derive(Clone, Default)]
pub struct InMemoryProvider {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, MemoryState>, QueueError> {
        self.state.read().map_err(|_| {
            QueueError::storage(ProviderType::InMemory, operation, "state lock poisoned")
        })
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, MemoryState>, QueueError> {
        self.state.write().map_err(|_| {
            QueueError::storage(ProviderType::InMemory, operation, "state lock poisoned")
        })
    }
}

impl std::fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    async fn connect(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn queue_exists(&self, name: &QueueName) -> Result<bool, QueueError> {
        Ok(self.read("queue_exists")?.queues.contains_key(name))
    }

    async fn create_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        let mut state = self.write("create_queue")?;
        if state.queues.contains_key(name) {
            return Ok(false);
        }
        state.queues.insert(name.clone(), QueueRecords::new());
        Ok(true)
    }

    async fn delete_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        Ok(self.write("delete_queue")?.queues.remove(name).is_some())
    }

    async fn get_queue_id(&self, name: &QueueName) -> Result<QueueId, QueueError> {
        if self.read("get_queue_id")?.queues.contains_key(name) {
            Ok(QueueId::new(name.as_str()))
        } else {
            Err(QueueError::queue_not_found(name.as_str()))
        }
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        Ok(self.read("list_queues")?.queues.keys().cloned().collect())
    }

    async fn insert_record(
        &self,
        queue_id: &QueueId,
        record: NewRecord,
    ) -> Result<MessageId, QueueError> {
        let mut state = self.write("insert_record")?;
        state.next_id += 1;
        let seq = state.next_id;
        let id = MessageId::new(seq.to_string());

        let records = state.records_mut(queue_id)?;
        records.insert(
            seq,
            MessageRecord::from_new(id.clone(), queue_id.clone(), record),
        );
        Ok(id)
    }

    async fn claim_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        claim: &Claim,
    ) -> Result<Option<MessageRecord>, QueueError> {
        let mut state = self.write("claim_visible")?;
        let records = state.records_mut(queue_id)?;

        Ok(records
            .values_mut()
            .find(|record| record.is_claimable(filter))
            .map(|record| {
                record.apply_claim(claim);
                record.clone()
            }))
    }

    async fn peek_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, QueueError> {
        let state = self.read("peek_visible")?;
        Ok(state
            .records(queue_id)?
            .values()
            .filter(|record| record.is_claimable(filter))
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
        let mut state = self.write("update_visibility")?;
        let records = state.records_mut(queue_id)?;

        match find_matching(records, id, expected) {
            Some(seq) => {
                if let Some(record) = records.get_mut(&seq) {
                    record.apply_update(&update);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_record(
        &self,
        queue_id: &QueueId,
        id: &MessageId,
        expected: &RecordMatch,
    ) -> Result<bool, QueueError> {
        let mut state = self.write("delete_record")?;
        let records = state.records_mut(queue_id)?;

        Ok(find_matching(records, id, expected)
            .and_then(|seq| records.remove(&seq))
            .is_some())
    }

    async fn count_visible(&self, queue_id: &QueueId) -> Result<u64, QueueError> {
        let state = self.read("count_visible")?;
        let count = state
            .records(queue_id)?
            .values()
            .filter(|record| record.handle.is_none())
            .count();
        Ok(count as u64)
    }

    async fn subscribe(&self, _queue_id: &QueueId) -> Result<InsertSubscription, QueueError> {
        Err(QueueError::unsupported(
            ProviderType::InMemory,
            "await_messages",
        ))
    }
}

/// Sequence key of the record `id`, if it satisfies `expected`
fn find_matching(records: &QueueRecords, id: &MessageId, expected: &RecordMatch) -> Option<u64> {
    let seq = id.as_str().parse::<u64>().ok()?;
    records
        .get(&seq)
        .filter(|record| record.matches(expected))
        .map(|_| seq)
}
