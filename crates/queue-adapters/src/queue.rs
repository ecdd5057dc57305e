//! Named queue handle binding a client to per-queue options.

use crate::awaiting::{await_messages, AwaitControl, AwaitSettings, BatchHandler};
use crate::client::QueueClient;
use crate::error::{ConfigurationError, QueueError, ValidationError};
use crate::message::{
    Message, MessageSet, Metadata, QueueName, ReceiveOptions, SendOptions, Timestamp,
    DEFAULT_MESSAGE_TYPE, DEFAULT_METADATUM_KEY,
};
use crate::provider::{ReceiveParam, SendParam};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Per-queue options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Type tag given to raw content sent through the queue
    pub message_type: String,
    /// Metadatum carrying delivery info
    pub message_metadatum_key: String,
    /// Sleep after an empty receive while emulating await
    pub polling_interval_ms: u64,
    /// Poll when the provider cannot push
    pub enable_await_emulation: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            message_metadatum_key: DEFAULT_METADATUM_KEY.to_string(),
            polling_interval_ms: 1000,
            enable_await_emulation: true,
        }
    }
}

impl QueueOptions {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn with_metadatum_key(mut self, key: impl Into<String>) -> Self {
        self.message_metadatum_key = key.into();
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_await_emulation(mut self, enabled: bool) -> Self {
        self.enable_await_emulation = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.polling_interval_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "polling_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.message_metadatum_key.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "message_metadatum_key must not be empty".to_string(),
            });
        }
        if self.message_type.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "message_type must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn await_settings(&self) -> AwaitSettings {
        AwaitSettings {
            polling_interval: self.polling_interval(),
            enable_emulation: self.enable_await_emulation,
        }
    }
}

/// What can be handed to [`Queue::send`]
#[derive(Debug, Clone, PartialEq)]
pub enum SendInput {
    /// Raw content, wrapped in a message of the queue's type
    Content(Bytes),
    /// Raw content plus metadata, wrapped the same way
    WithMetadata(Bytes, Metadata),
    /// Sent as is
    Message(Message),
}

impl From<&str> for SendInput {
    fn from(content: &str) -> Self {
        Self::Content(Bytes::copy_from_slice(content.as_bytes()))
    }
}

impl From<String> for SendInput {
    fn from(content: String) -> Self {
        Self::Content(Bytes::from(content))
    }
}

impl From<Bytes> for SendInput {
    fn from(content: Bytes) -> Self {
        Self::Content(content)
    }
}

impl From<Vec<u8>> for SendInput {
    fn from(content: Vec<u8>) -> Self {
        Self::Content(Bytes::from(content))
    }
}

impl From<Message> for SendInput {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl<B: Into<Bytes>> From<(B, Metadata)> for SendInput {
    fn from((content, metadata): (B, Metadata)) -> Self {
        Self::WithMetadata(content.into(), metadata)
    }
}

/// Hooks around each await iteration.
///
/// Returning `Stop` ends the loop once the current iteration finishes,
/// whatever the batch handler decided.
pub trait AwaitObserver: Send + Sync {
    /// Called before the handler, for non-empty batches only
    fn on_received(&self, _queue: &QueueName, _batch: &MessageSet) -> AwaitControl {
        AwaitControl::Continue
    }

    /// Called after the handler on every iteration
    fn on_idle(&self, _queue: &QueueName) -> AwaitControl {
        AwaitControl::Continue
    }
}

/// Handle on one named queue.
#[derive(Clone)]
pub struct Queue {
    name: QueueName,
    client: QueueClient,
    options: QueueOptions,
    observers: Vec<Arc<dyn AwaitObserver>>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("client", &self.client)
            .field("options", &self.options)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Queue {
    /// Bind `client` to the queue `name`.
    ///
    /// The client is reconfigured to carry delivery info under the queue's
    /// metadatum key. Nothing is connected until the first operation.
    pub fn new(
        name: QueueName,
        client: QueueClient,
        options: QueueOptions,
    ) -> Result<Self, QueueError> {
        options.validate()?;
        let client = client.with_metadatum_key(options.message_metadatum_key.clone());
        Ok(Self {
            name,
            client,
            options,
            observers: Vec::new(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn AwaitObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    // ------------------------------------------------------------------------
    // Capability checks
    // ------------------------------------------------------------------------

    /// True when await works here, natively or by emulation
    pub fn can_await(&self) -> bool {
        self.client.capabilities().await_messages || self.options.enable_await_emulation
    }

    pub fn can_delete_message(&self) -> bool {
        self.client.capabilities().delete_message
    }

    pub fn can_count_messages(&self) -> bool {
        self.client.capabilities().count_messages
    }

    pub fn can_list_queues(&self) -> bool {
        self.client.capabilities().list_queues
    }

    pub fn is_send_param_supported(&self, param: SendParam) -> bool {
        self.client.capabilities().supports_send_param(param)
    }

    pub fn is_receive_param_supported(&self, param: ReceiveParam) -> bool {
        self.client.capabilities().supports_receive_param(param)
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub async fn connect(&self) -> Result<(), QueueError> {
        self.client.connect().await
    }

    /// Create the queue; `false` when it already exists
    pub async fn create(&self) -> Result<bool, QueueError> {
        self.client.create_queue(&self.name).await
    }

    pub async fn exists(&self) -> Result<bool, QueueError> {
        self.client.queue_exists(&self.name).await
    }

    pub async fn send(&self, input: impl Into<SendInput>) -> Result<Message, QueueError> {
        self.send_with(input, &SendOptions::default()).await
    }

    pub async fn send_with(
        &self,
        input: impl Into<SendInput>,
        options: &SendOptions,
    ) -> Result<Message, QueueError> {
        let message = self.wrap(input.into());
        self.client.send_message(&self.name, message, options).await
    }

    /// Claim at most one message
    pub async fn receive(&self) -> Result<MessageSet, QueueError> {
        self.receive_with(None, &ReceiveOptions::default()).await
    }

    /// Claim up to `max_messages` (one when `None`); zero is rejected
    pub async fn receive_with(
        &self,
        max_messages: Option<u32>,
        options: &ReceiveOptions,
    ) -> Result<MessageSet, QueueError> {
        let max_messages = match max_messages {
            None => 1,
            Some(0) => {
                return Err(ValidationError::OutOfRange {
                    field: "max_messages".to_string(),
                    message: "must be greater than zero".to_string(),
                }
                .into())
            }
            Some(count) => count,
        };
        self.client
            .receive_messages(&self.name, max_messages, options)
            .await
    }

    /// Send content that is not delivered before `at`, optionally repeating
    /// every `repeating_interval` seconds after each delete
    pub async fn schedule(
        &self,
        input: impl Into<SendInput>,
        at: Timestamp,
        repeating_interval: Option<u64>,
    ) -> Result<Message, QueueError> {
        self.schedule_with(input, at, repeating_interval, SendOptions::default())
            .await
    }

    pub async fn schedule_with(
        &self,
        input: impl Into<SendInput>,
        at: Timestamp,
        repeating_interval: Option<u64>,
        options: SendOptions,
    ) -> Result<Message, QueueError> {
        if !self.is_send_param_supported(SendParam::Schedule) {
            return Err(QueueError::unsupported(
                self.client.provider_type(),
                "schedule",
            ));
        }
        let mut options = options.with_schedule(at);
        if let Some(interval) = repeating_interval {
            if !self.is_send_param_supported(SendParam::RepeatingInterval) {
                return Err(QueueError::unsupported(
                    self.client.provider_type(),
                    "schedule with repeating interval",
                ));
            }
            options = options.with_repeating_interval(interval);
        }
        self.send_with(input, &options).await
    }

    /// Remove a scheduled message for good, repeating or not
    pub async fn unschedule(&self, message: &mut Message) -> Result<bool, QueueError> {
        if !self.is_send_param_supported(SendParam::Schedule) || !self.can_delete_message() {
            return Err(QueueError::unsupported(
                self.client.provider_type(),
                "unschedule",
            ));
        }

        let key = self.options.message_metadatum_key.as_str();
        let mut info = message
            .delivery_info(key)
            .ok_or_else(|| ValidationError::MissingDeliveryInfo {
                key: key.to_string(),
            })?;
        info.options.schedule = None;
        info.options.repeating_interval = None;
        message.set_delivery_info(key, &info);

        self.client.delete_message(&self.name, message).await
    }

    pub async fn delete(&self, message: &mut Message) -> Result<bool, QueueError> {
        self.client.delete_message(&self.name, message).await
    }

    pub async fn count(&self) -> Result<u64, QueueError> {
        self.client.count_messages(&self.name).await
    }

    /// Blocking receive; runs until `handler` or an observer stops it
    pub async fn await_messages(
        &self,
        handler: &mut dyn BatchHandler,
        options: &ReceiveOptions,
    ) -> Result<(), QueueError> {
        let mut checkpoints = CheckpointHandler {
            queue: &self.name,
            observers: &self.observers,
            inner: handler,
        };
        await_messages(
            &self.client,
            &self.name,
            &mut checkpoints,
            options,
            self.options.await_settings(),
        )
        .await
    }

    fn wrap(&self, input: SendInput) -> Message {
        match input {
            SendInput::Message(message) => message,
            SendInput::Content(content) => {
                Message::new(content).with_message_type(self.options.message_type.clone())
            }
            SendInput::WithMetadata(content, metadata) => Message::new(content)
                .with_metadata(metadata)
                .with_message_type(self.options.message_type.clone()),
        }
    }
}

/// Fires observer checkpoints around the caller's handler
struct CheckpointHandler<'a> {
    queue: &'a QueueName,
    observers: &'a [Arc<dyn AwaitObserver>],
    inner: &'a mut dyn BatchHandler,
}

#[async_trait]
impl BatchHandler for CheckpointHandler<'_> {
    async fn on_batch(&mut self, batch: MessageSet) -> Result<AwaitControl, QueueError> {
        let mut stop_requested = false;

        if !batch.is_empty() {
            for observer in self.observers {
                stop_requested |= observer.on_received(self.queue, &batch) == AwaitControl::Stop;
            }
        }

        let control = self.inner.on_batch(batch).await?;

        for observer in self.observers {
            stop_requested |= observer.on_idle(self.queue) == AwaitControl::Stop;
        }

        if stop_requested {
            debug!(queue = %self.queue, "Await loop stop requested by observer");
            return Ok(AwaitControl::Stop);
        }
        Ok(control)
    }
}
