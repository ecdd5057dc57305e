//! Tests for clocks.

use super::*;

#[test]
fn test_manual_clock_clones_share_time() {
    let clock = ManualClock::new(Timestamp::from_secs(1_000));
    let shared = clock.clone();

    clock.advance(5);
    assert_eq!(shared.now(), Timestamp::from_secs(1_005));

    shared.set(Timestamp::from_secs(42));
    assert_eq!(clock.now(), Timestamp::from_secs(42));
}

#[test]
fn test_system_clock_tracks_wall_time() {
    let before = Timestamp::now();
    let now = SystemClock.now();
    assert!(now >= before);
}
