//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider`
//! trait for the in-memory, SQLite and document-collection backends.

pub mod document;
pub mod memory;
pub mod sqlite;

pub use document::{DocumentProvider, DocumentStore};
pub use memory::InMemoryProvider;
pub use sqlite::SqliteProvider;
