use crate::support::{new_item, set_attempts, test_db};

use std::time::Duration;

use chrono::Utc;
use common::{InsertFingerprint, RetryPolicy};
use mailqueue::message::extract_message_id;
use mailqueue::{
    BodyFormat, DeliveryOutcome, EnqueueOutcome, MailQueue, MailQueueError, Notification,
    Threading,
};

const LEASE: Duration = Duration::from_secs(300);

async fn test_queue() -> MailQueue {
    MailQueue::new(test_db().await, RetryPolicy::default())
}

mod enqueue {
    use super::*;

    #[tokio::test]
    async fn duplicate_article_is_already_queued() {
        let queue = test_queue().await;

        let mut item = new_item("a@example.com");
        item.article_id = Some(11);

        let first = queue.enqueue(item.clone()).await.unwrap();
        assert!(matches!(first, EnqueueOutcome::Queued(_)));

        let second = queue.enqueue(item).await.unwrap();
        assert_eq!(second, EnqueueOutcome::AlreadyQueued);

        assert_eq!(queue.repository().get_pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn threaded_notification_returns_its_message_id() {
        let queue = test_queue().await;

        let notification = Notification::new(
            "helpdesk@example.com",
            "customer@example.com",
            "Re: printer",
            "<p>Fixed.</p>",
        )
        .with_threading(Threading::new("example.com").in_reply_to("<orig@example.com>"))
        .with_article_id(100);

        let receipt = queue.enqueue_notification(notification).await.unwrap();
        let EnqueueOutcome::Queued(id) = receipt.outcome else {
            panic!("expected a new row, got {:?}", receipt.outcome);
        };
        let message_id = receipt.message_id.unwrap();
        assert!(message_id.ends_with("@example.com>"));

        let stored = queue.repository().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.recipient, "customer@example.com");
        assert_eq!(
            extract_message_id(&stored.raw_message),
            message_id.trim_start_matches('<').trim_end_matches('>')
        );

        let text = String::from_utf8(stored.raw_message).unwrap();
        assert!(text.contains("In-Reply-To: <orig@example.com>\r\n"));
        assert!(text.contains("Content-Type: text/html; charset=UTF-8\r\n"));
    }

    #[tokio::test]
    async fn fingerprint_deduplicates_notifications() {
        let queue = test_queue().await;
        let fingerprint = InsertFingerprint::compute(["ticket-9", "article-3", "a@example.com"]);

        let make = || {
            Notification::new("helpdesk@example.com", "a@example.com", "Update", "body")
                .with_format(BodyFormat::PlainText)
                .with_fingerprint(fingerprint)
        };

        let first = queue.enqueue_notification(make()).await.unwrap();
        assert!(matches!(first.outcome, EnqueueOutcome::Queued(_)));
        assert!(first.message_id.is_none());

        let second = queue.enqueue_notification(make()).await.unwrap();
        assert_eq!(second.outcome, EnqueueOutcome::AlreadyQueued);
    }

    #[tokio::test]
    async fn header_injection_is_malformed() {
        let queue = test_queue().await;

        let notification = Notification::new(
            "helpdesk@example.com",
            "a@example.com",
            "Hello\r\nBcc: victim@example.com",
            "body",
        );

        let err = queue.enqueue_notification(notification).await.unwrap_err();
        assert!(matches!(err, MailQueueError::MalformedInput(_)));
        assert!(queue.repository().get_pending(10).await.unwrap().is_empty());
    }
}

mod poll {
    use super::*;

    #[tokio::test]
    async fn claimed_items_are_not_handed_out_twice() {
        let queue = test_queue().await;
        queue.enqueue(new_item("a@example.com")).await.unwrap();
        queue.enqueue(new_item("b@example.com")).await.unwrap();

        let first = queue.poll(10, LEASE).await.unwrap();
        assert_eq!(first.len(), 2);

        let second = queue.poll(10, LEASE).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn exhausted_items_are_skipped() {
        let queue = test_queue().await;
        let EnqueueOutcome::Queued(id) = queue.enqueue(new_item("a@example.com")).await.unwrap()
        else {
            panic!("expected a new row");
        };
        set_attempts(queue.connection(), id, queue.policy().max_attempts).await;

        assert!(queue.poll(10, LEASE).await.unwrap().is_empty());
        assert_eq!(queue.quarantine(5, 10).await.unwrap().len(), 1);
    }
}

mod outcome {
    use super::*;

    #[tokio::test]
    async fn delivered_item_is_removed_and_repeat_is_benign() {
        let queue = test_queue().await;
        let EnqueueOutcome::Queued(id) = queue.enqueue(new_item("a@example.com")).await.unwrap()
        else {
            panic!("expected a new row");
        };

        queue
            .report_outcome(id, DeliveryOutcome::Delivered)
            .await
            .unwrap();
        queue
            .report_outcome(id, DeliveryOutcome::Delivered)
            .await
            .unwrap();

        assert!(queue.repository().get_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failures_back_off_until_quarantined() {
        let queue = test_queue().await;
        let EnqueueOutcome::Queued(id) = queue.enqueue(new_item("a@example.com")).await.unwrap()
        else {
            panic!("expected a new row");
        };
        let max_attempts = queue.policy().max_attempts;

        for attempt in 1..=max_attempts {
            let item = queue.repository().get_by_id(id).await.unwrap().unwrap();
            let now = Utc::now();
            let next_due_time = queue.next_due_time(&item, now);

            if attempt < max_attempts {
                let due = next_due_time.unwrap();
                assert!(due > now);
            } else {
                assert!(next_due_time.is_none());
            }

            queue
                .report_outcome(
                    id,
                    DeliveryOutcome::Failed {
                        smtp_code: Some(451),
                        smtp_message: Some(format!("attempt {attempt}")),
                        next_due_time,
                    },
                )
                .await
                .unwrap();
        }

        let item = queue.repository().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(item.attempts, max_attempts);
        assert!(item.due_time.is_none());

        // Ready but out of budget: visible to operators, never polled.
        assert_eq!(queue.repository().get_pending(10).await.unwrap().len(), 1);
        assert!(queue.poll(10, LEASE).await.unwrap().is_empty());

        let quarantined = queue.quarantine(max_attempts, 10).await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].last_smtp_message.as_deref(), Some("attempt 5"));
    }

    #[tokio::test]
    async fn first_failure_waits_base_delay() {
        let queue = test_queue().await;
        let EnqueueOutcome::Queued(id) = queue.enqueue(new_item("a@example.com")).await.unwrap()
        else {
            panic!("expected a new row");
        };
        let item = queue.repository().get_by_id(id).await.unwrap().unwrap();
        let now = Utc::now();

        let due = queue.next_due_time(&item, now).unwrap();
        assert_eq!((due - now).num_seconds(), 300);
    }

    #[tokio::test]
    async fn failure_on_missing_item_is_not_found() {
        let queue = test_queue().await;

        let err = queue
            .report_outcome(
                404,
                DeliveryOutcome::Failed {
                    smtp_code: None,
                    smtp_message: None,
                    next_due_time: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MailQueueError::NotFound(404)));
    }
}
