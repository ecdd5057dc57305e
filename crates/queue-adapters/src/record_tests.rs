//! Tests for stored record visibility rules.

use super::*;

fn record_at(created: i64) -> MessageRecord {
    MessageRecord::from_new(
        MessageId::new("1"),
        QueueId::new("orders"),
        NewRecord {
            content: Bytes::from_static(b"payload"),
            metadata: Metadata::new(),
            message_type: "order".to_string(),
            created_at: Timestamp::from_secs(created),
            schedule_at: None,
            repeating_interval: None,
        },
    )
}

fn filter(now: i64, message_type: Option<&str>) -> ScanFilter {
    ScanFilter {
        now: Timestamp::from_secs(now),
        message_type: message_type.map(str::to_string),
    }
}

#[test]
fn test_new_record_is_visible() {
    let record = record_at(100);

    assert!(record.is_visible(Timestamp::from_secs(100)));
    assert!(record.is_claimable(&filter(100, None)));
}

#[test]
fn test_claim_hides_until_expiry_has_passed() {
    let mut record = record_at(100);
    record.apply_claim(&Claim {
        handle: Handle::generate(),
        expires_at: Some(Timestamp::from_secs(110)),
    });

    assert!(!record.is_visible(Timestamp::from_secs(105)));
    // Expiry must be strictly in the past
    assert!(!record.is_visible(Timestamp::from_secs(110)));
    assert!(record.is_visible(Timestamp::from_secs(111)));
}

#[test]
fn test_claim_without_expiry_never_lapses() {
    let mut record = record_at(100);
    record.apply_claim(&Claim {
        handle: Handle::generate(),
        expires_at: None,
    });

    assert!(!record.is_visible(Timestamp::from_secs(i64::MAX)));
}

#[test]
fn test_schedule_hides_regardless_of_handle() {
    let mut record = record_at(100);
    record.schedule_at = Some(Timestamp::from_secs(200));

    assert!(record.is_schedule_hidden(Timestamp::from_secs(199)));
    assert!(!record.is_claimable(&filter(199, None)));
    assert!(!record.is_schedule_hidden(Timestamp::from_secs(200)));
    assert!(record.is_claimable(&filter(200, None)));
}

#[test]
fn test_type_filter_is_exact() {
    let record = record_at(100);

    assert!(record.is_claimable(&filter(100, Some("order"))));
    assert!(!record.is_claimable(&filter(100, Some("orders"))));
    assert!(!record.is_claimable(&filter(100, Some("Order"))));
}

#[test]
fn test_record_match_on_handle() {
    let mut record = record_at(100);
    let handle = Handle::generate();
    record.apply_claim(&Claim {
        handle: handle.clone(),
        expires_at: None,
    });

    assert!(!record.matches(&RecordMatch::Unclaimed(Timestamp::from_secs(100))));
    assert!(record.matches(&RecordMatch::Handle(handle)));
    assert!(!record.matches(&RecordMatch::Handle(Handle::generate())));
}

#[test]
fn test_unclaimed_match_respects_claim_expiry() {
    let mut record = record_at(100);
    assert!(record.matches(&RecordMatch::Unclaimed(Timestamp::from_secs(100))));

    record.apply_claim(&Claim {
        handle: Handle::generate(),
        expires_at: Some(Timestamp::from_secs(130)),
    });

    assert!(!record.matches(&RecordMatch::Unclaimed(Timestamp::from_secs(130))));
    assert!(record.matches(&RecordMatch::Unclaimed(Timestamp::from_secs(131))));
}

#[test]
fn test_reschedule_releases_claim() {
    let mut record = record_at(100);
    record.apply_claim(&Claim {
        handle: Handle::generate(),
        expires_at: Some(Timestamp::from_secs(130)),
    });

    record.apply_update(&VisibilityUpdate::reschedule(Timestamp::from_secs(160)));

    assert!(record.handle.is_none());
    assert!(record.handle_expires_at.is_none());
    assert!(!record.is_claimable(&filter(159, None)));
    assert!(record.is_claimable(&filter(160, None)));
}
