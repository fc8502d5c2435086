use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Queue Message Types
// ============================================================================

/// Notification body carried by the account pipeline queues.
///
/// Both the "account created" and the "email confirmed" queues use this shape.
/// `id` is reserved and currently always published empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMessage {
    #[serde(default)]
    pub id: String,
    pub email: String,
}

impl AccountMessage {
    pub fn for_email(email: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            email: email.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}

/// A raw message received from a queue with tracking metadata
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub body: String,
    pub receipt_handle: String,
    pub broker_message_id: Option<String>, // SQS/broker message ID, for logging
    pub queue_identifier: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_message_wire_shape() {
        let json = AccountMessage::for_email("a@b.com").to_json().unwrap();
        assert_eq!(json, r#"{"id":"","email":"a@b.com"}"#);
    }

    #[test]
    fn test_account_message_missing_id_defaults() {
        let msg = AccountMessage::from_json(r#"{"email":"x@y.org"}"#).unwrap();
        assert_eq!(msg.id, "");
        assert_eq!(msg.email, "x@y.org");
    }

    #[test]
    fn test_account_message_rejects_missing_email() {
        assert!(AccountMessage::from_json(r#"{"id":""}"#).is_err());
        assert!(AccountMessage::from_json("not json").is_err());
    }
}
