//! Provider types, capabilities and configuration.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Enumeration of supported storage providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    InMemory,
    Sqlite,
    Document,
}

impl ProviderType {
    /// Stable name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Sqlite => "sqlite",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_memory" => Ok(Self::InMemory),
            "sqlite" => Ok(Self::Sqlite),
            "document" => Ok(Self::Document),
            other => Err(ValidationError::InvalidFormat {
                field: "provider".to_string(),
                message: format!("unknown provider '{}'", other),
            }),
        }
    }
}

/// Parameters a provider may accept on send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendParam {
    /// Absolute time before which the message is never delivered
    Schedule,
    /// Delete reschedules the message this many seconds later
    RepeatingInterval,
}

impl SendParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::RepeatingInterval => "repeating_interval",
        }
    }
}

impl FromStr for SendParam {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(Self::Schedule),
            "repeating_interval" => Ok(Self::RepeatingInterval),
            other => Err(ValidationError::InvalidFormat {
                field: "send_param".to_string(),
                message: format!("unknown send parameter '{}'", other),
            }),
        }
    }
}

/// Parameters a provider may accept on receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveParam {
    VisibilityTimeout,
    ClassFilter,
    PeekMode,
}

impl ReceiveParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisibilityTimeout => "visibility_timeout",
            Self::ClassFilter => "class_filter",
            Self::PeekMode => "peek_mode",
        }
    }
}

impl FromStr for ReceiveParam {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visibility_timeout" => Ok(Self::VisibilityTimeout),
            "class_filter" => Ok(Self::ClassFilter),
            "peek_mode" => Ok(Self::PeekMode),
            other => Err(ValidationError::InvalidFormat {
                field: "receive_param".to_string(),
                message: format!("unknown receive parameter '{}'", other),
            }),
        }
    }
}

/// Static capability set declared by a provider.
///
/// Capabilities never change for the lifetime of a provider value, so callers
/// can check them before attempting an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Received messages can be deleted (acknowledged)
    pub delete_message: bool,
    /// Approximate count of unclaimed messages is available
    pub count_messages: bool,
    /// Queue names can be enumerated
    pub list_queues: bool,
    /// Provider pushes insert notifications, so awaiting needs no polling
    pub await_messages: bool,
    /// Sending to a missing queue creates it instead of failing
    pub auto_create_queues: bool,
    pub send_params: &'static [SendParam],
    pub receive_params: &'static [ReceiveParam],
}

impl Capabilities {
    pub fn supports_send_param(&self, param: SendParam) -> bool {
        self.send_params.contains(&param)
    }

    pub fn supports_receive_param(&self, param: ReceiveParam) -> bool {
        self.receive_params.contains(&param)
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    InMemory,
    Sqlite(SqliteConfig),
    Document(DocumentConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::InMemory
    }
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::InMemory => ProviderType::InMemory,
            Self::Sqlite(_) => ProviderType::Sqlite,
            Self::Document(_) => ProviderType::Document,
        }
    }
}

/// SQLite provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file; `:memory:` gives a private per-connection database
    pub path: PathBuf,
    /// How long a statement waits on a lock held by another connection
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Document collection provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Collections are capped to this many documents when set
    #[serde(default)]
    pub capped: Option<CappedCollection>,
    /// Upper bound on a single wait for insert notifications
    #[serde(default = "default_tail_timeout_ms")]
    pub tail_timeout_ms: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            capped: None,
            tail_timeout_ms: default_tail_timeout_ms(),
        }
    }
}

impl DocumentConfig {
    pub fn capped(max_documents: usize) -> Self {
        Self {
            capped: Some(CappedCollection { max_documents }),
            ..Self::default()
        }
    }

    pub fn tail_timeout(&self) -> Duration {
        Duration::from_millis(self.tail_timeout_ms)
    }
}

fn default_tail_timeout_ms() -> u64 {
    1_000
}

/// Size bound of a capped collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappedCollection {
    pub max_documents: usize,
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
