//! Scheduled and repeating messages on every backend that supports them.

mod common;

use common::{full_backends, visibility, Backend};
use queue_adapters::{QueueError, ReceiveOptions, SendOptions, SendParam};

#[tokio::test]
async fn test_scheduled_message_waits_for_its_time() {
    for backend in full_backends() {
        // Arrange
        let queue = backend.ready_queue("reminders").await;
        queue
            .schedule("wake up", backend.at(60), None)
            .await
            .unwrap();

        // Act
        let early = queue.receive().await.unwrap();
        backend.advance(59);
        let just_before = queue.receive().await.unwrap();
        backend.advance(1);
        let on_time = queue.receive().await.unwrap();

        // Assert
        assert!(early.is_empty(), "{}", backend.label);
        assert!(just_before.is_empty(), "{}", backend.label);
        assert_eq!(on_time.len(), 1, "{}", backend.label);
    }
}

#[tokio::test]
async fn test_schedule_in_the_past_is_immediately_visible() {
    for backend in full_backends() {
        let queue = backend.ready_queue("reminders").await;

        queue
            .schedule("overdue", backend.at(-3_600), None)
            .await
            .unwrap();

        assert_eq!(queue.receive().await.unwrap().len(), 1, "{}", backend.label);
    }
}

#[tokio::test]
async fn test_scheduled_messages_are_counted_before_they_are_due() {
    for backend in full_backends() {
        let queue = backend.ready_queue("reminders").await;

        queue
            .schedule("later", backend.at(600), None)
            .await
            .unwrap();

        assert_eq!(queue.count().await.unwrap(), 1, "{}", backend.label);
        assert!(queue
            .receive_with(Some(5), &ReceiveOptions::new().peek())
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_deleting_repeating_message_reschedules_it() {
    for backend in full_backends() {
        // Arrange
        let queue = backend.ready_queue("heartbeats").await;
        queue
            .schedule("tick", backend.at(0), Some(300))
            .await
            .unwrap();
        let options = ReceiveOptions::new().with_visibility_timeout(visibility(30));
        let mut first = queue
            .receive_with(Some(1), &options)
            .await
            .unwrap()
            .get(0)
            .unwrap();

        // Act
        backend.advance(10);
        let acknowledged = queue.delete(&mut first).await.unwrap();
        backend.advance(299);
        let too_soon = queue.receive_with(Some(1), &options).await.unwrap();
        backend.advance(1);
        let next_round = queue.receive_with(Some(1), &options).await.unwrap();

        // Assert
        assert!(acknowledged, "{}", backend.label);
        assert!(too_soon.is_empty(), "{}", backend.label);
        assert_eq!(next_round.len(), 1, "{}", backend.label);
        assert_eq!(
            next_round.get(0).unwrap().content_str(),
            Some("tick"),
            "{}",
            backend.label
        );
        assert_eq!(queue.count().await.unwrap(), 0, "{}", backend.label);
    }
}

#[tokio::test]
async fn test_repeating_message_keeps_its_identity() {
    for backend in full_backends() {
        let queue = backend.ready_queue("heartbeats").await;
        let key = queue.options().message_metadatum_key.clone();
        let scheduled = queue
            .schedule("tick", backend.at(0), Some(60))
            .await
            .unwrap();

        let mut first = queue.receive().await.unwrap().get(0).unwrap();
        queue.delete(&mut first).await.unwrap();
        backend.advance(60);
        let second = queue.receive().await.unwrap().get(0).unwrap();

        let info = second.delivery_info(&key).unwrap();
        assert_eq!(
            info.message_id,
            scheduled.delivery_info(&key).unwrap().message_id,
            "{}",
            backend.label
        );
    }
}

#[tokio::test]
async fn test_unschedule_stops_a_repeating_message() {
    for backend in full_backends() {
        // Arrange
        let queue = backend.ready_queue("heartbeats").await;
        let mut scheduled = queue
            .schedule("tick", backend.at(120), Some(60))
            .await
            .unwrap();

        // Act
        let removed = queue.unschedule(&mut scheduled).await.unwrap();
        backend.advance(3_600);
        let afterwards = queue.receive().await.unwrap();

        // Assert
        assert!(removed, "{}", backend.label);
        assert!(afterwards.is_empty(), "{}", backend.label);
        assert_eq!(queue.count().await.unwrap(), 0, "{}", backend.label);
    }
}

#[tokio::test]
async fn test_unschedule_received_repeating_message() {
    for backend in full_backends() {
        let queue = backend.ready_queue("heartbeats").await;
        queue
            .schedule("tick", backend.at(0), Some(60))
            .await
            .unwrap();
        let mut received = queue.receive().await.unwrap().get(0).unwrap();

        assert!(queue.unschedule(&mut received).await.unwrap());
        backend.advance(120);
        assert!(queue.receive().await.unwrap().is_empty(), "{}", backend.label);
    }
}

#[tokio::test]
async fn test_zero_repeating_interval_is_rejected() {
    for backend in full_backends() {
        let queue = backend.ready_queue("heartbeats").await;

        let result = queue.schedule("tick", backend.at(0), Some(0)).await;

        assert!(
            matches!(result, Err(QueueError::InvalidArgument(_))),
            "{}",
            backend.label
        );
        assert_eq!(queue.count().await.unwrap(), 0, "{}", backend.label);
    }
}

#[tokio::test]
async fn test_send_options_schedule_matches_schedule_call() {
    for backend in full_backends() {
        let queue = backend.ready_queue("reminders").await;

        queue
            .send_with(
                "via options",
                &SendOptions::new().with_schedule(backend.at(30)),
            )
            .await
            .unwrap();
        let early = queue.receive().await.unwrap();
        backend.advance(30);
        let due = queue.receive().await.unwrap();

        assert!(early.is_empty(), "{}", backend.label);
        assert_eq!(due.len(), 1, "{}", backend.label);
    }
}

#[tokio::test]
async fn test_capped_collection_rejects_scheduling_before_any_io() {
    // Arrange
    let backend = Backend::capped_document(8);
    let queue = backend.queue("events");

    // Act
    let scheduled = queue.schedule("later", backend.at(60), None).await;
    let repeating = queue
        .send_with(
            "tick",
            &SendOptions::new().with_repeating_interval(60),
        )
        .await;

    // Assert
    assert!(!queue.is_send_param_supported(SendParam::Schedule));
    assert!(matches!(
        scheduled,
        Err(QueueError::UnsupportedOperation { .. })
    ));
    assert!(matches!(
        repeating,
        Err(QueueError::UnsupportedOperation { .. })
    ));
    assert!(!queue.exists().await.unwrap());
}
