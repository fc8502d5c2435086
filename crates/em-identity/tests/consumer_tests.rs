//! Batch consumer behaviour against a scripted queue, plus the full account
//! pipeline over embedded SQLite queues.

mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{Harness, RecordingPublisher, PASSWORD};
use em_common::{AccountMessage, QueuedMessage};
use em_identity::consumer::{
    run_supervised, AccountCreatedHandler, EmailConfirmedHandler,
};
use em_identity::{
    AccountRepository, BatchConsumer, BatchHandler, ConfirmationLink, ConsumerError,
    ConsumerSettings, EmailConfirmationService, IdentityError, QueueNotificationPublisher,
};
use em_queue::sqlite::SqliteQueue;
use em_queue::{EmbeddedQueue, QueueError, QueueReceiver};

// ============================================================================
// Mocks
// ============================================================================

/// Serves scripted receive results; once drained it cancels the run and
/// blocks like an idle long poll.
struct ScriptedQueue {
    script: Mutex<VecDeque<Result<Vec<QueuedMessage>, QueueError>>>,
    deleted: Mutex<Vec<String>>,
    cancel: CancellationToken,
}

impl ScriptedQueue {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            deleted: Mutex::new(Vec::new()),
            cancel,
        }
    }

    fn push_batch(&self, bodies: &[&str]) {
        let batch = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| message(body, &format!("rh-{}-{}", self.script.lock().len(), i)))
            .collect();
        self.script.lock().push_back(Ok(batch));
    }

    fn push_error(&self) {
        self.script
            .lock()
            .push_back(Err(QueueError::Sqs("connection reset".to_string())));
    }
}

#[async_trait]
impl QueueReceiver for ScriptedQueue {
    fn identifier(&self) -> &str {
        "scripted"
    }

    async fn receive(&self, _max: u32, _wait: u32) -> em_queue::Result<Vec<QueuedMessage>> {
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result,
            None => {
                self.cancel.cancel();
                std::future::pending().await
            }
        }
    }

    async fn delete_batch(&self, receipt_handles: &[String]) -> em_queue::Result<()> {
        self.deleted.lock().extend_from_slice(receipt_handles);
        Ok(())
    }
}

/// Records every batch; fails the first `fail_times` calls
#[derive(Default)]
struct RecordingHandler {
    batches: Arc<Mutex<Vec<Vec<String>>>>,
    fail_times: AtomicUsize,
}

#[async_trait]
impl BatchHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle(&self, messages: &[AccountMessage]) -> em_identity::Result<()> {
        if self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(IdentityError::internal("handler failed"));
        }
        self.batches
            .lock()
            .push(messages.iter().map(|m| m.email.clone()).collect());
        Ok(())
    }
}

fn message(body: &str, receipt_handle: &str) -> QueuedMessage {
    QueuedMessage {
        body: body.to_string(),
        receipt_handle: receipt_handle.to_string(),
        broker_message_id: None,
        queue_identifier: "scripted".to_string(),
    }
}

fn body(email: &str) -> String {
    AccountMessage::for_email(email).to_json().unwrap()
}

// ============================================================================
// Batch processing
// ============================================================================

#[tokio::test]
async fn test_successful_batch_is_deleted() {
    let cancel = CancellationToken::new();
    let queue = Arc::new(ScriptedQueue::new(cancel.clone()));
    let handler = RecordingHandler::default();
    let batches = handler.batches.clone();
    let consumer = BatchConsumer::new(queue.clone(), handler, ConsumerSettings::default());

    let result = consumer
        .process_batch(vec![
            message(&body("a@b.com"), "rh-a"),
            message(&body("c@d.com"), "rh-c"),
        ])
        .await;

    assert!(result.is_ok());
    assert_eq!(*batches.lock(), vec![vec!["a@b.com".to_string(), "c@d.com".to_string()]]);
    assert_eq!(*queue.deleted.lock(), vec!["rh-a".to_string(), "rh-c".to_string()]);
}

#[tokio::test]
async fn test_failed_batch_is_left_for_redelivery() {
    let cancel = CancellationToken::new();
    let queue = Arc::new(ScriptedQueue::new(cancel.clone()));
    let handler = RecordingHandler {
        fail_times: AtomicUsize::new(1),
        ..Default::default()
    };
    let consumer = BatchConsumer::new(queue.clone(), handler, ConsumerSettings::default());

    let result = consumer
        .process_batch(vec![message(&body("a@b.com"), "rh-a")])
        .await;

    assert!(matches!(result, Err(ConsumerError::Handler(_))));
    assert!(queue.deleted.lock().is_empty());
}

#[tokio::test]
async fn test_undecodable_messages_are_dead_lettered() {
    let cancel = CancellationToken::new();
    let queue = Arc::new(ScriptedQueue::new(cancel.clone()));
    let handler = RecordingHandler {
        fail_times: AtomicUsize::new(1),
        ..Default::default()
    };
    let batches = handler.batches.clone();
    let consumer = BatchConsumer::new(queue.clone(), handler, ConsumerSettings::default());

    // Handler fails: only the poison message goes
    let result = consumer
        .process_batch(vec![
            message("{not json", "rh-poison"),
            message(&body("a@b.com"), "rh-a"),
        ])
        .await;
    assert!(result.is_err());
    assert_eq!(*queue.deleted.lock(), vec!["rh-poison".to_string()]);

    // Whole batch undecodable: handler never runs
    consumer
        .process_batch(vec![message("", "rh-empty")])
        .await
        .unwrap();
    assert!(batches.lock().is_empty());
    assert_eq!(
        *queue.deleted.lock(),
        vec!["rh-poison".to_string(), "rh-empty".to_string()]
    );
}

// ============================================================================
// Run loop and supervision
// ============================================================================

#[tokio::test]
async fn test_run_processes_until_cancelled() {
    let cancel = CancellationToken::new();
    let queue = Arc::new(ScriptedQueue::new(cancel.clone()));
    let a = body("a@b.com");
    let c = body("c@d.com");
    queue.push_batch(&[&a]);
    queue.push_batch(&[]);
    queue.push_batch(&[&c]);

    let handler = RecordingHandler::default();
    let batches = handler.batches.clone();
    let consumer = BatchConsumer::new(queue.clone(), handler, ConsumerSettings::default());

    let result = tokio::time::timeout(Duration::from_secs(5), consumer.run(&cancel))
        .await
        .unwrap();

    assert!(matches!(result, Err(ConsumerError::Cancelled)));
    assert_eq!(batches.lock().len(), 2);
    assert_eq!(queue.deleted.lock().len(), 2);
}

#[tokio::test]
async fn test_run_stops_on_queue_error() {
    let cancel = CancellationToken::new();
    let queue = Arc::new(ScriptedQueue::new(cancel.clone()));
    queue.push_error();

    let consumer = BatchConsumer::new(
        queue.clone(),
        RecordingHandler::default(),
        ConsumerSettings::default(),
    );

    let result = consumer.run(&cancel).await;
    assert!(matches!(result, Err(ConsumerError::Queue(_))));
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn test_supervisor_restarts_after_failures() {
    let cancel = CancellationToken::new();
    let queue = Arc::new(ScriptedQueue::new(cancel.clone()));
    let a = body("a@b.com");
    queue.push_error();
    queue.push_batch(&[&a]);
    queue.push_batch(&[&a]);

    // The first delivery fails in the handler and is redelivered
    let handler = RecordingHandler {
        fail_times: AtomicUsize::new(1),
        ..Default::default()
    };
    let batches = handler.batches.clone();
    let consumer = BatchConsumer::new(queue.clone(), handler, ConsumerSettings::default());

    tokio::time::timeout(
        Duration::from_secs(5),
        run_supervised(consumer, cancel.clone(), Duration::from_millis(10)),
    )
    .await
    .unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(*batches.lock(), vec![vec!["a@b.com".to_string()]]);
    assert_eq!(queue.deleted.lock().len(), 1);
}

#[tokio::test]
async fn test_supervisor_exits_when_cancelled_during_backoff() {
    let cancel = CancellationToken::new();
    let queue = Arc::new(ScriptedQueue::new(cancel.clone()));
    queue.push_error();

    let consumer = BatchConsumer::new(
        queue.clone(),
        RecordingHandler::default(),
        ConsumerSettings::default(),
    );

    let supervisor = tokio::spawn(run_supervised(
        consumer,
        cancel.clone(),
        Duration::from_secs(3600),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .unwrap()
        .unwrap();
}

// ============================================================================
// Handlers
// ============================================================================

#[tokio::test]
async fn test_account_created_handler_sends_each_confirmation() {
    let h = Harness::new();
    let handler = AccountCreatedHandler::new(h.confirmations.clone());

    handler
        .handle(&[
            AccountMessage::for_email("a@b.com"),
            AccountMessage::for_email("c@d.com"),
        ])
        .await
        .unwrap();

    let recipients: Vec<String> = h.mail.sent.lock().iter().map(|m| m.to.clone()).collect();
    assert_eq!(recipients, vec!["a@b.com".to_string(), "c@d.com".to_string()]);
}

#[tokio::test]
async fn test_account_created_handler_fails_with_transport() {
    let h = Harness::new();
    h.mail.fail.store(true, Ordering::SeqCst);
    let handler = AccountCreatedHandler::new(h.confirmations.clone());

    let err = handler
        .handle(&[AccountMessage::for_email("a@b.com")])
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::SendEmailFailed { .. }));
}

#[tokio::test]
async fn test_account_created_handler_links_to_fallback_host() {
    let h = Harness::new();
    let confirmations = Arc::new(EmailConfirmationService::new(
        h.confirmation_store.clone(),
        h.mail.clone(),
        h.publisher.clone(),
        ConfirmationLink::FromRequest {
            scheme: "https".to_string(),
            path: "/email/confirm".to_string(),
            fallback_host: "shop.example.com".to_string(),
        },
        h.clock.clone(),
    ));
    let handler = AccountCreatedHandler::new(confirmations.clone());

    handler
        .handle(&[AccountMessage::for_email("a@b.com")])
        .await
        .unwrap();
    confirmations.send("c@d.com", Some("eu.shop.example.com")).await.unwrap();

    let sent = h.mail.sent.lock();
    assert!(sent[0].body.contains("https://shop.example.com/email/confirm?token="));
    assert!(sent[1].body.contains("https://eu.shop.example.com/email/confirm?token="));
}

#[tokio::test]
async fn test_email_confirmed_handler_activates_batch() {
    let h = Harness::new();
    h.auth.create_user("Ann", PASSWORD, "a@b.com").await.unwrap();
    h.auth.create_user("Cid", PASSWORD, "c@d.com").await.unwrap();
    let handler = EmailConfirmedHandler::new(h.auth.clone());

    let batch = [
        AccountMessage::for_email("a@b.com"),
        AccountMessage::for_email("c@d.com"),
        AccountMessage::for_email("unknown@x.com"),
    ];
    handler.handle(&batch).await.unwrap();
    // Redelivery is harmless
    handler.handle(&batch).await.unwrap();

    for email in ["a@b.com", "c@d.com"] {
        let account = h.accounts.find_account_by_email(email).await.unwrap().unwrap();
        assert!(account.is_activated());
    }
}

// ============================================================================
// Pipeline over embedded queues
// ============================================================================

async fn embedded_queue(pool: sqlx::SqlitePool, name: &str) -> Arc<SqliteQueue> {
    let queue = Arc::new(SqliteQueue::new(pool, name.to_string(), 30));
    queue.init_schema().await.unwrap();
    queue
}

#[tokio::test]
async fn test_signup_to_login_over_embedded_queues() {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let created = embedded_queue(pool.clone(), "account-created").await;
    let confirmed = embedded_queue(pool, "email-confirmed").await;

    let publisher = Arc::new(QueueNotificationPublisher::new(created.clone(), confirmed.clone()));
    let h = Harness::build(Arc::new(RecordingPublisher::default()), publisher);

    let created_consumer = BatchConsumer::new(
        created.clone(),
        AccountCreatedHandler::new(h.confirmations.clone()),
        ConsumerSettings::default(),
    );
    let confirmed_consumer = BatchConsumer::new(
        confirmed.clone(),
        EmailConfirmedHandler::new(h.auth.clone()),
        ConsumerSettings::default(),
    );

    h.auth.create_user("Ann", PASSWORD, "a@b.com").await.unwrap();

    let batch = created.receive(10, 0).await.unwrap();
    assert_eq!(batch.len(), 1);
    created_consumer.process_batch(batch).await.unwrap();

    let token = h.mail.last_token_for("a@b.com").unwrap();
    h.confirmations.confirm(&token).await.unwrap();

    let err = h.auth.authenticate("a@b.com", PASSWORD).await.unwrap_err();
    assert!(matches!(err, IdentityError::AccountNotActivated));

    let batch = confirmed.receive(10, 0).await.unwrap();
    assert_eq!(batch.len(), 1);
    confirmed_consumer.process_batch(batch).await.unwrap();

    let refresh = h.auth.authenticate("a@b.com", PASSWORD).await.unwrap();
    tokio_test::assert_ok!(h.auth.create_access_token(&refresh).await);

    // Both queues drained
    assert!(created.receive(10, 0).await.unwrap().is_empty());
    assert!(confirmed.receive(10, 0).await.unwrap().is_empty());
}
