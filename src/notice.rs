//! Purpose: Define the structured schema for transient action notifications on stderr.
//! Exports: `Notice`, `notice_json`, `notice_from_notification`.
//! Role: Shared contract helper for CLI feedback after each inventory action.
//! Invariants: Notices never alter stdout payloads (tables, JSON, CSV).
//! Invariants: JSON schema is additive-only.
use serde_json::{Map, Value, json};

use crate::core::model::{Notification, NotificationLevel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub store: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_from_notification(
    notification: &Notification,
    time: String,
    store: impl Into<String>,
) -> Notice {
    let kind = match notification.level {
        NotificationLevel::Success => "success",
        NotificationLevel::Failure => "failure",
    };
    Notice {
        kind: kind.to_string(),
        time,
        cmd: notification.operation.as_str().to_string(),
        store: store.into(),
        message: notification.message.clone(),
        details: Map::new(),
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("store".to_string(), json!(notice.store));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::{notice_from_notification, notice_json};
    use crate::core::model::{Notification, NotificationLevel, Operation};
    use serde_json::Value;

    #[test]
    fn notice_json_has_required_fields() {
        let notification = Notification {
            level: NotificationLevel::Success,
            operation: Operation::Add,
            message: "Item added successfully".to_string(),
        };
        let mut notice = notice_from_notification(
            &notification,
            "2026-02-01T00:00:00Z".to_string(),
            "inventory.json",
        );
        notice
            .details
            .insert("item".to_string(), Value::from("Widget"));

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("success"));
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("add"));
        assert_eq!(
            obj.get("store").and_then(|v| v.as_str()),
            Some("inventory.json")
        );
        assert_eq!(
            obj.get("message").and_then(|v| v.as_str()),
            Some("Item added successfully")
        );
        assert_eq!(obj["details"]["item"], "Widget");
    }
}
