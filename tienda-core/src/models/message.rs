use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MESSAGES_TABLE: &str = "mensajes_chat";
pub const CONVERSATIONS_VIEW: &str = "vw_conversaciones_chat";

/// A chat message inside a contract thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "contratacion_id")]
    pub thread_id: Uuid,
    #[serde(rename = "usuario_id")]
    pub sender_id: Uuid,
    #[serde(rename = "asesor_id", default)]
    pub advisor_id: Option<Uuid>,
    #[serde(rename = "mensaje")]
    pub body: String,
    #[serde(rename = "leido", default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new message. Always unread, stamped by the sender.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    #[serde(rename = "contratacion_id")]
    pub thread_id: Uuid,
    #[serde(rename = "usuario_id")]
    pub sender_id: Uuid,
    #[serde(rename = "asesor_id")]
    pub advisor_id: Option<Uuid>,
    #[serde(rename = "mensaje")]
    pub body: String,
    #[serde(rename = "leido")]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(thread_id: Uuid, sender_id: Uuid, advisor_id: Option<Uuid>, body: impl Into<String>) -> Self {
        Self {
            thread_id,
            sender_id,
            advisor_id,
            body: body.into(),
            read: false,
            created_at: Utc::now(),
        }
    }
}

/// Per-thread aggregation maintained by the store's conversation view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(rename = "contratacion_id")]
    pub thread_id: Uuid,
    #[serde(rename = "usuario_id")]
    pub customer_id: Uuid,
    #[serde(rename = "usuario_nombre", default)]
    pub customer_name: Option<String>,
    #[serde(rename = "asesor_id", default)]
    pub advisor_id: Option<Uuid>,
    #[serde(rename = "asesor_nombre", default)]
    pub advisor_name: Option<String>,
    #[serde(rename = "plan_nombre", default)]
    pub plan_name: Option<String>,
    #[serde(rename = "ultimo_mensaje", default)]
    pub last_message: Option<String>,
    #[serde(rename = "timestamp_ultimo", default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(rename = "no_leidos", default)]
    pub unread: i64,
}

/// Ephemeral typing signal carried on a thread's broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub user_id: Uuid,
    pub is_typing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_reads_store_columns() {
        let row = serde_json::json!({
            "id": "7b5c24ab-1234-5678-9abc-def012345678",
            "contratacion_id": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            "usuario_id": "deadbeef-cafe-babe-face-feeddeadbeef",
            "asesor_id": null,
            "mensaje": "hola",
            "leido": false,
            "created_at": "2026-02-23T10:00:00.123456+00:00"
        });
        let msg: Message = serde_json::from_value(row).expect("row should deserialize");
        assert_eq!(msg.body, "hola");
        assert!(msg.advisor_id.is_none());
        assert!(!msg.read);
    }

    #[test]
    fn test_new_message_is_unread() {
        let msg = NewMessage::new(Uuid::new_v4(), Uuid::new_v4(), None, "qué tal");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["leido"], false);
        assert_eq!(value["mensaje"], "qué tal");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_typing_event_wire_shape() {
        let user = Uuid::new_v4();
        let value = serde_json::to_value(TypingEvent { user_id: user, is_typing: true }).unwrap();
        assert_eq!(value["userId"], user.to_string());
        assert_eq!(value["isTyping"], true);
    }
}
