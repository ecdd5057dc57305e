//! Common fixtures for queue-adapters integration tests
//!
//! This module provides:
//! - One fixture per backend, each driven by a manual clock
//! - Producer/consumer pairs that share storage but not client state
//! - Tracing setup controlled by `RUST_LOG`

#![allow(dead_code)]

use queue_adapters::{
    DocumentConfig, DocumentProvider, DocumentStore, InMemoryProvider, ManualClock, Queue,
    QueueClient, QueueName, QueueOptions, QueueProvider, SqliteConfig, SqliteProvider, Timestamp,
};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

/// Wall-clock start used by every fixture
pub const START: i64 = 1_700_000_000;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

pub fn visibility(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Storage a fixture can hand out any number of independent clients for
enum Storage {
    Memory(InMemoryProvider),
    Sqlite(TempDir),
    Document(DocumentStore, DocumentConfig),
}

/// One backend under test plus the clock its clients share
pub struct Backend {
    pub label: &'static str,
    pub clock: ManualClock,
    storage: Storage,
}

impl Backend {
    pub fn memory() -> Self {
        Self::with_storage("memory", Storage::Memory(InMemoryProvider::new()))
    }

    pub fn sqlite() -> Self {
        let dir = TempDir::new().unwrap();
        Self::with_storage("sqlite", Storage::Sqlite(dir))
    }

    pub fn document() -> Self {
        Self::with_storage(
            "document",
            Storage::Document(DocumentStore::new(), DocumentConfig::default()),
        )
    }

    pub fn capped_document(max_documents: usize) -> Self {
        Self::with_storage(
            "capped-document",
            Storage::Document(DocumentStore::new(), DocumentConfig::capped(max_documents)),
        )
    }

    fn with_storage(label: &'static str, storage: Storage) -> Self {
        init_tracing();
        Self {
            label,
            clock: ManualClock::new(Timestamp::from_secs(START)),
            storage,
        }
    }

    /// A fresh provider over this backend's storage.
    ///
    /// SQLite providers open their own connection, so two clients behave
    /// like two processes sharing one database file.
    pub fn provider(&self) -> Arc<dyn QueueProvider> {
        match &self.storage {
            Storage::Memory(provider) => Arc::new(provider.clone()),
            Storage::Sqlite(dir) => Arc::new(SqliteProvider::new(SqliteConfig::new(
                dir.path().join("queues.db"),
            ))),
            Storage::Document(store, config) => {
                Arc::new(DocumentProvider::new(store.clone(), config.clone()))
            }
        }
    }

    pub fn client(&self) -> QueueClient {
        QueueClient::new(self.provider()).with_clock(Arc::new(self.clock.clone()))
    }

    pub fn queue(&self, name: &str) -> Queue {
        self.queue_with(name, QueueOptions::default())
    }

    pub fn queue_with(&self, name: &str, options: QueueOptions) -> Queue {
        Queue::new(queue_name(name), self.client(), options).unwrap()
    }

    /// A created queue ready for sending
    pub async fn ready_queue(&self, name: &str) -> Queue {
        let queue = self.queue(name);
        queue.create().await.unwrap();
        queue
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(secs);
    }

    pub fn at(&self, offset: i64) -> Timestamp {
        Timestamp::from_secs(START + offset)
    }
}

/// Backends supporting the full delivery protocol
pub fn full_backends() -> Vec<Backend> {
    vec![Backend::memory(), Backend::sqlite(), Backend::document()]
}
