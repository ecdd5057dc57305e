//! Stored message records and the criteria providers evaluate against them.

use crate::message::{Handle, Metadata, MessageId, QueueId, Timestamp};
use bytes::Bytes;

/// A message as persisted by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub queue_id: QueueId,
    pub content: Bytes,
    /// Caller metadata; never contains delivery info
    pub metadata: Metadata,
    pub message_type: String,
    pub created_at: Timestamp,
    pub handle: Option<Handle>,
    pub handle_expires_at: Option<Timestamp>,
    pub schedule_at: Option<Timestamp>,
    /// Seconds; delete reschedules instead of erasing when set
    pub repeating_interval: Option<u64>,
}

impl MessageRecord {
    /// Build the stored form of a freshly inserted record
    pub fn from_new(id: MessageId, queue_id: QueueId, record: NewRecord) -> Self {
        Self {
            id,
            queue_id,
            content: record.content,
            metadata: record.metadata,
            message_type: record.message_type,
            created_at: record.created_at,
            handle: None,
            handle_expires_at: None,
            schedule_at: record.schedule_at,
            repeating_interval: record.repeating_interval,
        }
    }

    /// Unclaimed, or claimed with an expiry already in the past.
    ///
    /// A claim without expiry never lapses.
    pub fn is_visible(&self, now: Timestamp) -> bool {
        match (&self.handle, self.handle_expires_at) {
            (None, _) => true,
            (Some(_), Some(expires_at)) => expires_at < now,
            (Some(_), None) => false,
        }
    }

    pub fn is_schedule_hidden(&self, now: Timestamp) -> bool {
        self.schedule_at.is_some_and(|at| at > now)
    }

    /// Whether a receive evaluating `filter` may claim this record
    pub fn is_claimable(&self, filter: &ScanFilter) -> bool {
        filter.accepts_type(&self.message_type)
            && !self.is_schedule_hidden(filter.now)
            && self.is_visible(filter.now)
    }

    pub fn apply_claim(&mut self, claim: &Claim) {
        self.handle = Some(claim.handle.clone());
        self.handle_expires_at = claim.expires_at;
    }

    pub fn apply_update(&mut self, update: &VisibilityUpdate) {
        self.handle = update.handle.clone();
        self.handle_expires_at = update.handle_expires_at;
        self.schedule_at = update.schedule_at;
    }

    pub fn matches(&self, expected: &RecordMatch) -> bool {
        match expected {
            RecordMatch::Unclaimed(now) => self.is_visible(*now),
            RecordMatch::Handle(handle) => self.handle.as_ref() == Some(handle),
        }
    }
}

/// Fields supplied when inserting a record; the provider assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub content: Bytes,
    pub metadata: Metadata,
    pub message_type: String,
    pub created_at: Timestamp,
    pub schedule_at: Option<Timestamp>,
    pub repeating_interval: Option<u64>,
}

/// Which records a receive considers, evaluated at `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub now: Timestamp,
    pub message_type: Option<String>,
}

impl ScanFilter {
    pub fn accepts_type(&self, message_type: &str) -> bool {
        self.message_type
            .as_deref()
            .map_or(true, |wanted| wanted == message_type)
    }
}

/// Ownership written onto a record when it is claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub handle: Handle,
    /// `None` keeps the record hidden until it is deleted
    pub expires_at: Option<Timestamp>,
}

/// Guard on conditional updates and deletes.
///
/// A caller without a handle owns nothing, so it may only touch a record
/// nobody holds a live claim on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordMatch {
    /// Match only while the record is visible at this time
    Unclaimed(Timestamp),
    /// Match only while the record still carries this handle
    Handle(Handle),
}

impl RecordMatch {
    pub fn handle(&self) -> Option<&Handle> {
        match self {
            Self::Unclaimed(_) => None,
            Self::Handle(handle) => Some(handle),
        }
    }

    pub fn unclaimed_at(&self) -> Option<Timestamp> {
        match self {
            Self::Unclaimed(now) => Some(*now),
            Self::Handle(_) => None,
        }
    }
}

/// Replacement for a record's visibility fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityUpdate {
    pub handle: Option<Handle>,
    pub handle_expires_at: Option<Timestamp>,
    pub schedule_at: Option<Timestamp>,
}

impl VisibilityUpdate {
    /// Release any claim and hide the record until `at`
    pub fn reschedule(at: Timestamp) -> Self {
        Self {
            handle: None,
            handle_expires_at: None,
            schedule_at: Some(at),
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
