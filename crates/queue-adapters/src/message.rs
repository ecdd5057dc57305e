//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use crate::provider::ProviderType;
use crate::record::MessageRecord;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Metadatum under which delivery info travels unless a queue overrides it.
pub const DEFAULT_METADATUM_KEY: &str = "__queue";

/// Type tag given to messages built from raw content.
pub const DEFAULT_MESSAGE_TYPE: &str = "message";

/// Free-form message metadata, ordered by key.
pub type Metadata = BTreeMap<String, Value>;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 255 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-255 characters".to_string(),
            });
        }

        // Names double as collection and table keys in the backends
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, '-', '_' and '.' allowed".to_string(),
            });
        }

        if name.starts_with(['-', '.']) || name.ends_with(['-', '.']) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing '-' or '.'".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::borrow::Borrow<str> for QueueName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Backend-defined queue identifier, stable for the lifetime of the queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend-defined message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token proving ownership of a claimed message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    /// Generate a fresh, unguessable handle
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(handle: String) -> Self {
        Self(handle)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Timestamp with whole-second precision.
///
/// Every visibility and schedule comparison goes through this type so that
/// all backends agree on the same resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    /// Seconds since the Unix epoch
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Create timestamp from DateTime, dropping sub-second precision
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Get underlying DateTime, if representable
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }

    pub fn add_seconds(&self, secs: u64) -> Self {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(secs))
    }

    /// Add a duration, truncated to whole seconds
    pub fn add_duration(&self, duration: Duration) -> Self {
        self.add_seconds(duration.as_secs())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S UTC")),
            None => write!(f, "@{}", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Delivery Info
// ============================================================================

/// Send parameters echoed back in delivery info so they can be undone later
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeliveryOptions {
    #[serde(default)]
    pub schedule: Option<Timestamp>,
    /// Seconds between deliveries of a repeating message
    #[serde(default)]
    pub repeating_interval: Option<u64>,
}

/// Delivery info embedded in a message's metadata once it has been sent or
/// received.
///
/// This is the only link between a received message and its stored record,
/// so it travels with the message wherever the message is serialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryInfo {
    /// Set while the message is claimed by a receiver
    pub handle: Option<Handle>,
    pub message_id: MessageId,
    pub queue_id: QueueId,
    pub queue_name: String,
    pub adapter: ProviderType,
    #[serde(default)]
    pub options: DeliveryOptions,
}

impl DeliveryInfo {
    /// Render as a metadata value.
    ///
    /// Built by hand so that embedding can never fail; the shape matches the
    /// `Deserialize` derive above.
    pub fn to_value(&self) -> Value {
        let mut options = serde_json::Map::new();
        if let Some(schedule) = self.options.schedule {
            options.insert("schedule".to_string(), Value::from(schedule.as_secs()));
        }
        if let Some(interval) = self.options.repeating_interval {
            options.insert("repeating_interval".to_string(), Value::from(interval));
        }

        let mut info = serde_json::Map::new();
        info.insert(
            "handle".to_string(),
            self.handle
                .as_ref()
                .map_or(Value::Null, |h| Value::from(h.as_str())),
        );
        info.insert(
            "message_id".to_string(),
            Value::from(self.message_id.as_str()),
        );
        info.insert("queue_id".to_string(), Value::from(self.queue_id.as_str()));
        info.insert(
            "queue_name".to_string(),
            Value::from(self.queue_name.as_str()),
        );
        info.insert("adapter".to_string(), Value::from(self.adapter.as_str()));
        info.insert("options".to_string(), Value::Object(options));
        Value::Object(info)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message travelling through the queue system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "bytes_serde")]
    pub content: Bytes,
    #[serde(default)]
    pub metadata: Metadata,
    /// Type tag matched exactly by the receive-side class filter
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Message {
    /// Create new message with content
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
            message_type: default_message_type(),
        }
    }

    /// Add a metadatum
    pub fn with_metadatum(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the whole metadata map
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the type tag used by class filters
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    /// Content as UTF-8, if it is valid UTF-8
    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn metadatum(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn set_metadatum(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Delivery info stored under `key`, if present and well formed
    pub fn delivery_info(&self, key: &str) -> Option<DeliveryInfo> {
        self.metadata
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn set_delivery_info(&mut self, key: &str, info: &DeliveryInfo) {
        self.metadata.insert(key.to_string(), info.to_value());
    }

    /// Remove delivery info, returning whatever was stored under `key`
    pub fn clear_delivery_info(&mut self, key: &str) -> Option<Value> {
        self.metadata.remove(key)
    }

    /// Serialize to JSON so a received message can be handed to another process
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<&str> for Message {
    fn from(content: &str) -> Self {
        Self::new(Bytes::copy_from_slice(content.as_bytes()))
    }
}

impl From<String> for Message {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

impl From<Bytes> for Message {
    fn from(content: Bytes) -> Self {
        Self::new(content)
    }
}

impl From<Vec<u8>> for Message {
    fn from(content: Vec<u8>) -> Self {
        Self::new(content)
    }
}

// ============================================================================
// Message Set
// ============================================================================

/// Ordered, finite result of a receive.
///
/// Messages are built from the stored records on access, so iterating the set
/// twice yields equal but independent `Message` values.
#[derive(Debug, Clone)]
pub struct MessageSet {
    records: Vec<MessageRecord>,
    queue_name: String,
    adapter: ProviderType,
    metadatum_key: String,
}

impl MessageSet {
    pub(crate) fn new(
        records: Vec<MessageRecord>,
        queue_name: &QueueName,
        adapter: ProviderType,
        metadatum_key: &str,
    ) -> Self {
        Self {
            records,
            queue_name: queue_name.as_str().to_string(),
            adapter,
            metadatum_key: metadatum_key.to_string(),
        }
    }

    pub(crate) fn empty(queue_name: &QueueName, adapter: ProviderType, metadatum_key: &str) -> Self {
        Self::new(Vec::new(), queue_name, adapter, metadatum_key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Materialize the message at `index`
    pub fn get(&self, index: usize) -> Option<Message> {
        self.records.get(index).map(|record| self.materialize(record))
    }

    /// Iterate from the first message; each call starts over
    pub fn iter(&self) -> MessageSetIter<'_> {
        MessageSetIter {
            set: self,
            index: 0,
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.iter().collect()
    }

    fn materialize(&self, record: &MessageRecord) -> Message {
        let info = DeliveryInfo {
            handle: record.handle.clone(),
            message_id: record.id.clone(),
            queue_id: record.queue_id.clone(),
            queue_name: self.queue_name.clone(),
            adapter: self.adapter,
            options: DeliveryOptions {
                schedule: record.schedule_at,
                repeating_interval: record.repeating_interval,
            },
        };

        let mut message = Message {
            content: record.content.clone(),
            metadata: record.metadata.clone(),
            message_type: record.message_type.clone(),
        };
        message.set_delivery_info(&self.metadatum_key, &info);
        message
    }
}

/// Iterator over a [`MessageSet`]
pub struct MessageSetIter<'a> {
    set: &'a MessageSet,
    index: usize,
}

impl Iterator for MessageSetIter<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Self::Item> {
        let message = self.set.get(self.index)?;
        self.index += 1;
        Some(message)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.set.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MessageSetIter<'_> {}

impl<'a> IntoIterator for &'a MessageSet {
    type Item = Message;
    type IntoIter = MessageSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for MessageSet {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_messages().into_iter()
    }
}

// ============================================================================
// Send and Receive Options
// ============================================================================

/// Options for sending messages to queues
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Absolute time before which the message is not delivered
    pub schedule: Option<Timestamp>,
    /// Seconds after each delete at which the message is delivered again
    pub repeating_interval: Option<u64>,
}

impl SendOptions {
    /// Create new send options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scheduled delivery time
    pub fn with_schedule(mut self, at: Timestamp) -> Self {
        self.schedule = Some(at);
        self
    }

    /// Make the message repeat every `seconds` after each delete
    pub fn with_repeating_interval(mut self, seconds: u64) -> Self {
        self.repeating_interval = Some(seconds);
        self
    }
}

/// Options for receiving messages from queues
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// How long a claimed message stays hidden; `None` hides it until deleted
    pub visibility_timeout: Option<Duration>,
    /// Only messages with exactly this type tag are considered
    pub class_filter: Option<String>,
    /// Report matching messages without claiming them
    pub peek_mode: bool,
}

impl ReceiveOptions {
    /// Create new receive options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn with_class_filter(mut self, message_type: impl Into<String>) -> Self {
        self.class_filter = Some(message_type.into());
        self
    }

    /// Enable peek-only mode (inspect without claiming)
    pub fn peek(mut self) -> Self {
        self.peek_mode = true;
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
