//! Provider contract and the client that runs the delivery protocol on top of it.
//!
//! [`QueueProvider`] is the seam every storage backend implements: queue
//! lifecycle plus a handful of record primitives, one of which
//! ([`QueueProvider::claim_visible`]) must be atomic. [`QueueClient`] drives
//! the visibility protocol through those primitives:
//!
//! - `send` stores a record and stamps fresh delivery info on the message
//! - `receive` claims visible records one at a time, in insertion order
//! - `delete` erases a record, or reschedules it when it repeats
//!
//! The client never locks anything itself; exclusivity comes entirely from
//! the provider's claim primitive.

use crate::awaiting::{AwaitControl, BatchHandler};
use crate::clock::{Clock, SystemClock};
use crate::error::{QueueError, ValidationError};
use crate::message::{
    DeliveryInfo, DeliveryOptions, Handle, Message, MessageId, MessageSet, QueueId, QueueName,
    ReceiveOptions, SendOptions, Timestamp, DEFAULT_METADATUM_KEY,
};
use crate::provider::{Capabilities, ProviderConfig, ProviderType, ReceiveParam, SendParam};
use crate::providers::{DocumentProvider, DocumentStore, InMemoryProvider, SqliteProvider};
use crate::record::{Claim, MessageRecord, NewRecord, RecordMatch, ScanFilter, VisibilityUpdate};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Interface implemented by specific storage backends (memory, SQLite, documents)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Static capability set of this provider
    fn capabilities(&self) -> Capabilities;

    /// Establish or validate the backend connection; idempotent
    async fn connect(&self) -> Result<(), QueueError>;

    async fn queue_exists(&self, name: &QueueName) -> Result<bool, QueueError>;

    /// Returns `false` when the queue already exists
    async fn create_queue(&self, name: &QueueName) -> Result<bool, QueueError>;

    /// Returns `false` when the queue does not exist
    async fn delete_queue(&self, name: &QueueName) -> Result<bool, QueueError>;

    /// Fails with `QueueNotFound` when the queue does not exist
    async fn get_queue_id(&self, name: &QueueName) -> Result<QueueId, QueueError>;

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError>;

    /// Store a new record and return its generated id
    async fn insert_record(
        &self,
        queue_id: &QueueId,
        record: NewRecord,
    ) -> Result<MessageId, QueueError>;

    /// Atomically claim the oldest record accepted by `filter`.
    ///
    /// Implementations must guarantee that two concurrent callers never both
    /// receive the same record. A candidate lost to another claimer is
    /// skipped.
    async fn claim_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        claim: &Claim,
    ) -> Result<Option<MessageRecord>, QueueError>;

    /// Oldest records accepted by `filter`, left untouched
    async fn peek_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, QueueError>;

    /// Replace the visibility fields of a record if it matches `expected`
    async fn update_visibility(
        &self,
        queue_id: &QueueId,
        id: &MessageId,
        expected: &RecordMatch,
        update: VisibilityUpdate,
    ) -> Result<bool, QueueError>;

    /// Erase a record if it matches `expected`
    async fn delete_record(
        &self,
        queue_id: &QueueId,
        id: &MessageId,
        expected: &RecordMatch,
    ) -> Result<bool, QueueError>;

    /// Approximate number of unclaimed records, scheduled ones included
    async fn count_visible(&self, queue_id: &QueueId) -> Result<u64, QueueError>;

    /// Notifications for records inserted into `queue_id`
    async fn subscribe(&self, queue_id: &QueueId) -> Result<InsertSubscription, QueueError>;
}

/// Push notifications of inserts into one queue.
///
/// Each wait is bounded so that records which become visible through schedule
/// or claim expiry, which produce no notification, are still picked up.
#[derive(Debug)]
pub struct InsertSubscription {
    receiver: watch::Receiver<u64>,
    max_wait: Duration,
}

impl InsertSubscription {
    pub fn new(receiver: watch::Receiver<u64>, max_wait: Duration) -> Self {
        Self { receiver, max_wait }
    }

    /// Forget inserts seen so far
    pub fn mark_seen(&mut self) {
        let _seen = *self.receiver.borrow_and_update();
    }

    /// Wait for the next insert; `false` when the wait timed out or the
    /// queue went away
    pub async fn wait(&mut self) -> bool {
        matches!(
            tokio::time::timeout(self.max_wait, self.receiver.changed()).await,
            Ok(Ok(()))
        )
    }
}

// ============================================================================
// QueueClient
// ============================================================================

/// Runs the delivery protocol against one provider.
///
/// Cloning is cheap and clones share the lazily established connection.
#[derive(Clone)]
pub struct QueueClient {
    provider: Arc<dyn QueueProvider>,
    clock: Arc<dyn Clock>,
    connection: Arc<OnceCell<()>>,
    metadatum_key: String,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("provider", &self.provider.provider_type())
            .field("clock", &self.clock)
            .field("connected", &self.connection.initialized())
            .field("metadatum_key", &self.metadatum_key)
            .finish()
    }
}

impl QueueClient {
    /// Create new client over `provider`, using the wall clock
    pub fn new(provider: Arc<dyn QueueProvider>) -> Self {
        Self {
            provider,
            clock: Arc::new(SystemClock),
            connection: Arc::new(OnceCell::new()),
            metadatum_key: DEFAULT_METADATUM_KEY.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Carry delivery info under `key` instead of the default `__queue`
    pub fn with_metadatum_key(mut self, key: impl Into<String>) -> Self {
        self.metadatum_key = key.into();
        self
    }

    pub fn metadatum_key(&self) -> &str {
        &self.metadatum_key
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.provider.capabilities()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Connect on first use; later calls return immediately
    pub async fn connect(&self) -> Result<(), QueueError> {
        self.connection
            .get_or_try_init(|| async {
                self.provider.connect().await?;
                info!(provider = %self.provider_type(), "Connected to queue provider");
                Ok::<(), QueueError>(())
            })
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queue lifecycle
    // ------------------------------------------------------------------------

    pub async fn create_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        self.connect().await?;
        let created = self.provider.create_queue(name).await?;
        if created {
            info!(queue = %name, provider = %self.provider_type(), "Queue created");
        }
        Ok(created)
    }

    pub async fn delete_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        self.connect().await?;
        let deleted = self.provider.delete_queue(name).await?;
        if deleted {
            info!(queue = %name, provider = %self.provider_type(), "Queue deleted");
        }
        Ok(deleted)
    }

    pub async fn queue_exists(&self, name: &QueueName) -> Result<bool, QueueError> {
        self.connect().await?;
        self.provider.queue_exists(name).await
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        if !self.capabilities().list_queues {
            return Err(QueueError::unsupported(self.provider_type(), "list_queues"));
        }
        self.connect().await?;
        self.provider.list_queues().await
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Store `message` and return it carrying fresh delivery info.
    ///
    /// Delivery info already present on the message (for instance because it
    /// was received earlier) is dropped before storing.
    #[instrument(skip(self, message, options), fields(queue = %queue, provider = %self.provider_type()))]
    pub async fn send_message(
        &self,
        queue: &QueueName,
        mut message: Message,
        options: &SendOptions,
    ) -> Result<Message, QueueError> {
        let capabilities = self.capabilities();
        self.check_send_options(&capabilities, options)?;

        self.connect().await?;
        let queue_id = self.queue_id_for_write(queue, &capabilities).await?;

        message.clear_delivery_info(&self.metadatum_key);
        let record = NewRecord {
            content: message.content.clone(),
            metadata: message.metadata.clone(),
            message_type: message.message_type.clone(),
            created_at: self.now(),
            schedule_at: options.schedule,
            repeating_interval: options.repeating_interval,
        };
        let message_id = self.provider.insert_record(&queue_id, record).await?;
        debug!(message_id = %message_id, schedule = ?options.schedule, "Message stored");

        let info = DeliveryInfo {
            handle: None,
            message_id,
            queue_id,
            queue_name: queue.as_str().to_string(),
            adapter: self.provider_type(),
            options: DeliveryOptions {
                schedule: options.schedule,
                repeating_interval: options.repeating_interval,
            },
        };
        message.set_delivery_info(&self.metadatum_key, &info);
        Ok(message)
    }

    /// Claim up to `max_messages` visible messages, oldest first.
    ///
    /// Zero returns an empty set without touching the provider. In peek mode
    /// nothing is claimed.
    #[instrument(skip(self, options), fields(queue = %queue, provider = %self.provider_type()))]
    pub async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        options: &ReceiveOptions,
    ) -> Result<MessageSet, QueueError> {
        if max_messages == 0 {
            return Ok(MessageSet::empty(
                queue,
                self.provider_type(),
                &self.metadatum_key,
            ));
        }
        self.check_receive_options(options)?;

        self.connect().await?;
        let queue_id = self.provider.get_queue_id(queue).await?;
        let filter = ScanFilter {
            now: self.now(),
            message_type: options.class_filter.clone(),
        };
        let limit = usize::try_from(max_messages).unwrap_or(usize::MAX);

        let records = if options.peek_mode {
            self.provider.peek_visible(&queue_id, &filter, limit).await?
        } else {
            let expires_at = options
                .visibility_timeout
                .map(|timeout| filter.now.add_duration(timeout));
            let mut claimed = Vec::new();
            while claimed.len() < limit {
                let claim = Claim {
                    handle: Handle::generate(),
                    expires_at,
                };
                match self
                    .provider
                    .claim_visible(&queue_id, &filter, &claim)
                    .await?
                {
                    Some(record) => {
                        debug!(message_id = %record.id, expires_at = ?expires_at, "Message claimed");
                        claimed.push(record);
                    }
                    None => break,
                }
            }
            claimed
        };

        debug!(
            received = records.len(),
            peek = options.peek_mode,
            "Receive complete"
        );
        Ok(MessageSet::new(
            records,
            queue,
            self.provider_type(),
            &self.metadatum_key,
        ))
    }

    /// Acknowledge a received message.
    ///
    /// Repeating messages are rescheduled rather than erased. Returns `false`
    /// when no matching record exists, for instance because the message was
    /// already deleted or its claim was taken over by another receiver.
    #[instrument(skip(self, message), fields(queue = %queue, provider = %self.provider_type()))]
    pub async fn delete_message(
        &self,
        queue: &QueueName,
        message: &mut Message,
    ) -> Result<bool, QueueError> {
        let info = message.delivery_info(&self.metadatum_key).ok_or_else(|| {
            ValidationError::MissingDeliveryInfo {
                key: self.metadatum_key.clone(),
            }
        })?;
        if !self.capabilities().delete_message {
            return Err(QueueError::unsupported(
                self.provider_type(),
                "delete_message",
            ));
        }

        self.connect().await?;
        let queue_id = self.provider.get_queue_id(queue).await?;
        let now = self.now();
        // Without a handle the caller owns nothing and must not override a
        // live claim held by another receiver
        let expected = match info.handle.clone() {
            Some(handle) => RecordMatch::Handle(handle),
            None => RecordMatch::Unclaimed(now),
        };

        let done = match info.options.repeating_interval {
            Some(interval) => {
                let next = now.add_seconds(interval);
                let rescheduled = self
                    .provider
                    .update_visibility(
                        &queue_id,
                        &info.message_id,
                        &expected,
                        VisibilityUpdate::reschedule(next),
                    )
                    .await?;
                if rescheduled {
                    debug!(message_id = %info.message_id, next = %next, "Repeating message rescheduled");
                }
                rescheduled
            }
            None => {
                self.provider
                    .delete_record(&queue_id, &info.message_id, &expected)
                    .await?
            }
        };

        if done {
            message.clear_delivery_info(&self.metadatum_key);
        } else {
            debug!(message_id = %info.message_id, "No matching record to delete");
        }
        Ok(done)
    }

    /// Approximate number of unclaimed messages; never exact under
    /// concurrent use
    pub async fn count_messages(&self, queue: &QueueName) -> Result<u64, QueueError> {
        if !self.capabilities().count_messages {
            return Err(QueueError::unsupported(
                self.provider_type(),
                "count_messages",
            ));
        }
        self.connect().await?;
        let queue_id = self.provider.get_queue_id(queue).await?;
        self.provider.count_visible(&queue_id).await
    }

    /// Blocking receive driven by the provider's insert notifications.
    ///
    /// Receives one message at a time and hands every batch, empty or not, to
    /// `handler`. After an empty batch the loop waits for the next insert
    /// instead of sleeping.
    #[instrument(skip(self, handler, options), fields(queue = %queue, provider = %self.provider_type()))]
    pub async fn await_native(
        &self,
        queue: &QueueName,
        handler: &mut dyn BatchHandler,
        options: &ReceiveOptions,
    ) -> Result<(), QueueError> {
        if !self.capabilities().await_messages {
            return Err(QueueError::unsupported(
                self.provider_type(),
                "await_messages",
            ));
        }

        self.connect().await?;
        let queue_id = self.provider.get_queue_id(queue).await?;
        let mut subscription = self.provider.subscribe(&queue_id).await?;

        loop {
            subscription.mark_seen();
            let batch = self.receive_messages(queue, 1, options).await?;
            let idle = batch.is_empty();

            if handler.on_batch(batch).await? == AwaitControl::Stop {
                debug!("Await loop stopped by handler");
                return Ok(());
            }
            if idle {
                let notified = subscription.wait().await;
                debug!(notified, "Await loop woke up");
            }
        }
    }

    fn check_send_options(
        &self,
        capabilities: &Capabilities,
        options: &SendOptions,
    ) -> Result<(), QueueError> {
        if options.schedule.is_some() && !capabilities.supports_send_param(SendParam::Schedule) {
            return Err(QueueError::unsupported(
                self.provider_type(),
                "send parameter 'schedule'",
            ));
        }
        if let Some(interval) = options.repeating_interval {
            if !capabilities.supports_send_param(SendParam::RepeatingInterval) {
                return Err(QueueError::unsupported(
                    self.provider_type(),
                    "send parameter 'repeating_interval'",
                ));
            }
            if interval == 0 {
                return Err(ValidationError::OutOfRange {
                    field: "repeating_interval".to_string(),
                    message: "must be at least one second".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn check_receive_options(&self, options: &ReceiveOptions) -> Result<(), QueueError> {
        let capabilities = self.capabilities();
        let requested = [
            (
                ReceiveParam::VisibilityTimeout,
                options.visibility_timeout.is_some(),
            ),
            (ReceiveParam::ClassFilter, options.class_filter.is_some()),
            (ReceiveParam::PeekMode, options.peek_mode),
        ];

        for (param, set) in requested {
            if set && !capabilities.supports_receive_param(param) {
                return Err(QueueError::unsupported(
                    self.provider_type(),
                    format!("receive parameter '{}'", param.as_str()),
                ));
            }
        }
        Ok(())
    }

    async fn queue_id_for_write(
        &self,
        queue: &QueueName,
        capabilities: &Capabilities,
    ) -> Result<QueueId, QueueError> {
        if capabilities.auto_create_queues && self.provider.create_queue(queue).await? {
            info!(queue = %queue, "Queue created on first write");
        }
        self.provider.get_queue_id(queue).await
    }
}

// ============================================================================
// QueueClientFactory
// ============================================================================

/// Builds clients from configuration values
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create the provider described by `config`.
    ///
    /// No I/O happens here; providers connect on first use.
    pub fn create_provider(config: &ProviderConfig) -> Arc<dyn QueueProvider> {
        match config {
            ProviderConfig::InMemory => Arc::new(InMemoryProvider::new()),
            ProviderConfig::Sqlite(sqlite) => Arc::new(SqliteProvider::new(sqlite.clone())),
            ProviderConfig::Document(document) => Arc::new(DocumentProvider::new(
                DocumentStore::new(),
                document.clone(),
            )),
        }
    }

    /// Create queue client from configuration
    pub fn create_client(config: &ProviderConfig) -> QueueClient {
        QueueClient::new(Self::create_provider(config))
    }

    /// Create test client with in-memory provider
    pub fn create_test_client() -> QueueClient {
        QueueClient::new(Arc::new(InMemoryProvider::new()))
    }
}
