//! Embedded queue behaviour against a file-backed SQLite database.

#![cfg(feature = "sqlite")]

use em_queue::sqlite::SqliteQueue;
use em_queue::{EmbeddedQueue, QueueReceiver, QueueSender};
use sqlx::sqlite::SqlitePoolOptions;

async fn file_backed_queue(dir: &tempfile::TempDir, visibility_timeout: u32) -> SqliteQueue {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .unwrap();
    let queue = SqliteQueue::new(pool, "email-confirmed".to_string(), visibility_timeout);
    queue.init_schema().await.unwrap();
    queue
}

#[tokio::test]
async fn test_undeleted_message_is_redelivered_after_visibility_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let queue = file_backed_queue(&dir, 0).await;

    queue.send(r#"{"id":"","email":"a@b.com"}"#).await.unwrap();

    let first = queue.receive(10, 0).await.unwrap();
    assert_eq!(first.len(), 1);

    // Handler failed, nothing deleted: the message comes back with a new handle
    let second = queue.receive(10, 0).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].broker_message_id, first[0].broker_message_id);
    assert_ne!(second[0].receipt_handle, first[0].receipt_handle);

    // The stale handle no longer deletes anything
    queue.delete_batch(&[first[0].receipt_handle.clone()]).await.unwrap();
    assert_eq!(queue.receive(10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_messages_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();

    {
        let queue = file_backed_queue(&dir, 30).await;
        queue.send("persisted").await.unwrap();
    }

    let reopened = file_backed_queue(&dir, 30).await;
    let messages = reopened.receive(10, 0).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "persisted");

    let handles: Vec<String> = messages.iter().map(|m| m.receipt_handle.clone()).collect();
    reopened.delete_batch(&handles).await.unwrap();
    assert!(reopened.receive(10, 0).await.unwrap().is_empty());
}
