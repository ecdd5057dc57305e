//! SQLite queue provider.
//!
//! Queues and messages live in two tables of one database file. Claims use a
//! conditional `UPDATE` that re-checks visibility, so any number of providers
//! (in this process or others) can share a file and exactly one of them wins
//! each record.
//!
//! `rusqlite` is blocking; every statement runs on the blocking thread pool
//! against a connection that is opened on first use and then reused.

use crate::client::{InsertSubscription, QueueProvider};
use crate::error::{QueueError, SerializationError};
use crate::message::{Handle, Metadata, MessageId, QueueId, QueueName, Timestamp};
use crate::provider::{Capabilities, ProviderType, ReceiveParam, SendParam, SqliteConfig};
use crate::record::{Claim, MessageRecord, NewRecord, RecordMatch, ScanFilter, VisibilityUpdate};
use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "sqlite_tests.rs"]
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

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queues (
    queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS messages (
    message_id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_id INTEGER NOT NULL,
    message_type TEXT NOT NULL,
    content BLOB NOT NULL,
    metadata TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    handle TEXT,
    handle_expires_at INTEGER,
    schedule_at INTEGER,
    repeating_interval INTEGER
);

CREATE INDEX IF NOT EXISTS idx_messages_queue ON messages (queue_id, message_id);
"#;

const RECORD_COLUMNS: &str = "message_id, queue_id, message_type, content, metadata, created_at, \
     handle, handle_expires_at, schedule_at, repeating_interval";

// ?1 queue id, ?2 type filter, ?3 now
const CLAIMABLE: &str = "queue_id = ?1 \
     AND (?2 IS NULL OR message_type = ?2) \
     AND (schedule_at IS NULL OR schedule_at <= ?3) \
     AND (handle IS NULL OR handle_expires_at < ?3)";

/// SQLite-backed queue provider
#[derive(Clone)]
pub struct SqliteProvider {
    config: Arc<SqliteConfig>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl std::fmt::Debug for SqliteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteProvider")
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}

impl SqliteProvider {
    /// Create a provider for the database at `config.path`; nothing is
    /// opened until the first operation
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config: Arc::new(config),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Run `f` against the shared connection on the blocking pool
    async fn with_connection<T, F>(&self, operation: &'static str, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                QueueError::storage(ProviderType::Sqlite, operation, "connection lock poisoned")
            })?;
            if guard.is_none() {
                *guard = Some(open_connection(&config)?);
            }
            let Some(conn) = guard.as_ref() else {
                return Err(QueueError::ConnectionFailed {
                    provider: ProviderType::Sqlite,
                    message: "connection unavailable".to_string(),
                });
            };
            f(conn).map_err(|e| QueueError::storage(ProviderType::Sqlite, operation, e))
        })
        .await
        .map_err(|e| QueueError::storage(ProviderType::Sqlite, operation, e))?
    }
}

fn open_connection(config: &SqliteConfig) -> Result<Connection, QueueError> {
    let connection_failed = |e: rusqlite::Error| QueueError::ConnectionFailed {
        provider: ProviderType::Sqlite,
        message: format!("{}: {}", config.path.display(), e),
    };

    let conn = Connection::open(&config.path).map_err(connection_failed)?;
    conn.busy_timeout(config.busy_timeout())
        .map_err(connection_failed)?;
    conn.execute_batch(SCHEMA).map_err(connection_failed)?;

    info!(path = %config.path.display(), "Opened SQLite queue database");
    Ok(conn)
}

/// Numeric row id behind a queue or message id; `None` for ids this
/// provider never handed out
fn row_id(id: &str) -> Option<i64> {
    id.parse::<i64>().ok()
}

fn queue_row_id(queue_id: &QueueId) -> Result<i64, QueueError> {
    row_id(queue_id.as_str()).ok_or_else(|| QueueError::queue_not_found(queue_id.as_str()))
}

/// Row guard for conditional writes: ?3 is the expected handle and `?{now}`
/// the time a handle-less caller requires the row to be unclaimed at
fn match_predicate(now: usize) -> String {
    format!(
        "((?3 IS NOT NULL AND handle = ?3) \
         OR (?3 IS NULL AND (handle IS NULL OR handle_expires_at < ?{now})))"
    )
}

fn to_sql_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let metadata_json: String = row.get(4)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let content: Vec<u8> = row.get(3)?;

    Ok(MessageRecord {
        id: MessageId::new(row.get::<_, i64>(0)?.to_string()),
        queue_id: QueueId::new(row.get::<_, i64>(1)?.to_string()),
        message_type: row.get(2)?,
        content: Bytes::from(content),
        metadata,
        created_at: Timestamp::from_secs(row.get(5)?),
        handle: row.get::<_, Option<String>>(6)?.map(Handle::from_string),
        handle_expires_at: row.get::<_, Option<i64>>(7)?.map(Timestamp::from_secs),
        schedule_at: row.get::<_, Option<i64>>(8)?.map(Timestamp::from_secs),
        repeating_interval: row
            .get::<_, Option<i64>>(9)?
            .and_then(|secs| u64::try_from(secs).ok()),
    })
}

#[async_trait]
impl QueueProvider for SqliteProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Sqlite
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    async fn connect(&self) -> Result<(), QueueError> {
        self.with_connection("connect", |_| Ok(())).await
    }

    async fn queue_exists(&self, name: &QueueName) -> Result<bool, QueueError> {
        let name = name.as_str().to_string();
        self.with_connection("queue_exists", move |conn| {
            conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM queues WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn create_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        let name = name.as_str().to_string();
        self.with_connection("create_queue", move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO queues (name) VALUES (?1)",
                params![name],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn delete_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        let name = name.as_str().to_string();
        self.with_connection("delete_queue", move |conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let queue_id: Option<i64> = tx
                .query_row(
                    "SELECT queue_id FROM queues WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(queue_id) = queue_id else {
                return Ok(false);
            };

            let purged = tx.execute(
                "DELETE FROM messages WHERE queue_id = ?1",
                params![queue_id],
            )?;
            tx.execute("DELETE FROM queues WHERE queue_id = ?1", params![queue_id])?;
            tx.commit()?;
            debug!(queue = %name, purged, "Queue and its messages removed");
            Ok(true)
        })
        .await
    }

    async fn get_queue_id(&self, name: &QueueName) -> Result<QueueId, QueueError> {
        let lookup = name.as_str().to_string();
        let queue_id: Option<i64> = self
            .with_connection("get_queue_id", move |conn| {
                conn.query_row(
                    "SELECT queue_id FROM queues WHERE name = ?1",
                    params![lookup],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        queue_id
            .map(|id| QueueId::new(id.to_string()))
            .ok_or_else(|| QueueError::queue_not_found(name.as_str()))
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        let names: Vec<String> = self
            .with_connection("list_queues", |conn| {
                let mut stmt = conn.prepare_cached("SELECT name FROM queues ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await?;

        Ok(names
            .into_iter()
            .filter_map(|name| match QueueName::new(name) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(error = %e, "Skipping queue with invalid name");
                    None
                }
            })
            .collect())
    }

    async fn insert_record(
        &self,
        queue_id: &QueueId,
        record: NewRecord,
    ) -> Result<MessageId, QueueError> {
        let qid = queue_row_id(queue_id)?;
        let metadata =
            serde_json::to_string(&record.metadata).map_err(SerializationError::from)?;

        let id = self
            .with_connection("insert_record", move |conn| {
                conn.execute(
                    "INSERT INTO messages (queue_id, message_type, content, metadata, created_at, \
                     schedule_at, repeating_interval) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        qid,
                        record.message_type,
                        record.content.as_ref(),
                        metadata,
                        record.created_at.as_secs(),
                        record.schedule_at.map(|at| at.as_secs()),
                        record.repeating_interval.map(to_sql_secs),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(MessageId::new(id.to_string()))
    }

    async fn claim_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        claim: &Claim,
    ) -> Result<Option<MessageRecord>, QueueError> {
        let qid = queue_row_id(queue_id)?;
        let filter = filter.clone();
        let claim = claim.clone();

        self.with_connection("claim_visible", move |conn| {
            let now = filter.now.as_secs();
            let message_type = filter.message_type.as_deref();
            let select = format!(
                "SELECT message_id FROM messages WHERE {} ORDER BY message_id LIMIT 1",
                CLAIMABLE
            );
            let update = format!(
                "UPDATE messages SET handle = ?5, handle_expires_at = ?6 \
                 WHERE message_id = ?4 AND {}",
                CLAIMABLE
            );

            // A candidate lost to another connection no longer matches, so
            // the next select moves on to the following record
            loop {
                let candidate: Option<i64> = conn
                    .query_row(&select, params![qid, message_type, now], |row| row.get(0))
                    .optional()?;
                let Some(message_id) = candidate else {
                    return Ok(None);
                };

                let won = conn.execute(
                    &update,
                    params![
                        qid,
                        message_type,
                        now,
                        message_id,
                        claim.handle.as_str(),
                        claim.expires_at.map(|at| at.as_secs()),
                    ],
                )?;
                if won == 1 {
                    let record = conn.query_row(
                        &format!("SELECT {} FROM messages WHERE message_id = ?1", RECORD_COLUMNS),
                        params![message_id],
                        read_record,
                    )?;
                    return Ok(Some(record));
                }
                debug!(message_id, "Lost claim race, skipping record");
            }
        })
        .await
    }

    async fn peek_visible(
        &self,
        queue_id: &QueueId,
        filter: &ScanFilter,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, QueueError> {
        let qid = queue_row_id(queue_id)?;
        let filter = filter.clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_connection("peek_visible", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE {} ORDER BY message_id LIMIT ?4",
                RECORD_COLUMNS, CLAIMABLE
            ))?;
            let rows = stmt.query_map(
                params![qid, filter.message_type, filter.now.as_secs(), limit],
                read_record,
            )?;
            rows.collect()
        })
        .await
    }

    async fn update_visibility(
        &self,
        queue_id: &QueueId,
        id: &MessageId,
        expected: &RecordMatch,
        update: VisibilityUpdate,
    ) -> Result<bool, QueueError> {
        let qid = queue_row_id(queue_id)?;
        let Some(message_id) = row_id(id.as_str()) else {
            return Ok(false);
        };
        let handle = expected.handle().map(|h| h.as_str().to_string());
        let unclaimed_at = expected.unclaimed_at().map(|at| at.as_secs());

        self.with_connection("update_visibility", move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE messages SET handle = ?4, handle_expires_at = ?5, schedule_at = ?6 \
                     WHERE message_id = ?1 AND queue_id = ?2 AND {}",
                    match_predicate(7)
                ),
                params![
                    message_id,
                    qid,
                    handle,
                    update.handle.as_ref().map(|h| h.as_str()),
                    update.handle_expires_at.map(|at| at.as_secs()),
                    update.schedule_at.map(|at| at.as_secs()),
                    unclaimed_at,
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete_record(
        &self,
        queue_id: &QueueId,
        id: &MessageId,
        expected: &RecordMatch,
    ) -> Result<bool, QueueError> {
        let qid = queue_row_id(queue_id)?;
        let Some(message_id) = row_id(id.as_str()) else {
            return Ok(false);
        };
        let handle = expected.handle().map(|h| h.as_str().to_string());
        let unclaimed_at = expected.unclaimed_at().map(|at| at.as_secs());

        self.with_connection("delete_record", move |conn| {
            let deleted = conn.execute(
                &format!(
                    "DELETE FROM messages WHERE message_id = ?1 AND queue_id = ?2 AND {}",
                    match_predicate(4)
                ),
                params![message_id, qid, handle, unclaimed_at],
            )?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn count_visible(&self, queue_id: &QueueId) -> Result<u64, QueueError> {
        let qid = queue_row_id(queue_id)?;
        let count: i64 = self
            .with_connection("count_visible", move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE queue_id = ?1 AND handle IS NULL",
                    params![qid],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn subscribe(&self, _queue_id: &QueueId) -> Result<InsertSubscription, QueueError> {
        Err(QueueError::unsupported(ProviderType::Sqlite, "await_messages"))
    }
}
