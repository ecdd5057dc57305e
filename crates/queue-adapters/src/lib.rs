//! # Queue Adapters
//!
//! Message queue client with interchangeable storage backends: in-memory,
//! SQLite, and capped or uncapped document collections.
//!
//! This library provides:
//! - At-least-once delivery through claims with visibility timeouts
//! - Scheduled and repeating messages
//! - One blocking-receive call over push-capable and poll-only backends
//! - Capability checks so callers can branch before attempting an operation
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Messages, message sets and delivery info
//! - [`record`] - Stored records and the visibility rules applied to them
//! - [`provider`] - Provider types, capabilities and configuration
//! - [`client`] - Provider trait and the client running the delivery protocol
//! - [`awaiting`] - Blocking receive, native or emulated by polling
//! - [`queue`] - Named queue handle with per-queue options
//! - [`config`] - Loading runtime configuration from files and environment
//! - [`providers`] - Backend implementations

// Module declarations
pub mod awaiting;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod queue;
pub mod record;

// Re-export commonly used types at crate root for convenience
pub use awaiting::{AwaitControl, AwaitSettings, BatchHandler};
pub use client::{InsertSubscription, QueueClient, QueueClientFactory, QueueProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RuntimeConfig;
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    DeliveryInfo, DeliveryOptions, Handle, Message, MessageId, MessageSet, Metadata, QueueId,
    QueueName, ReceiveOptions, SendOptions, Timestamp, DEFAULT_MESSAGE_TYPE,
    DEFAULT_METADATUM_KEY,
};
pub use provider::{
    Capabilities, CappedCollection, DocumentConfig, ProviderConfig, ProviderType, ReceiveParam,
    SendParam, SqliteConfig,
};
pub use providers::{DocumentProvider, DocumentStore, InMemoryProvider, SqliteProvider};
pub use queue::{AwaitObserver, Queue, QueueOptions, SendInput};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
