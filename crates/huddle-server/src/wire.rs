//! App compatibility layer.
//!
//! Translates between clean internal types and the wire format the mobile
//! clients expect: camelCase param keys inbound, camelCase event payloads
//! outbound.

use serde::Serialize;
use huddle_core::events::{ChatEvent, HistoryMessage};

// ── Param normalization ──────────────────────────────────────────────────

/// Mapping of client camelCase param keys to Rust snake_case equivalents.
const CAMEL_TO_SNAKE: &[(&str, &str)] = &[
    ("groupId", "group_id"),
    ("accountId", "account_id"),
    ("displayName", "display_name"),
];

/// Normalize client camelCase params to snake_case for Rust handlers.
/// If the snake_case key already exists, the existing value takes precedence.
pub fn normalize_params(params: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = params.as_object() else {
        return params.clone();
    };
    let mut result = obj.clone();
    for &(camel, snake) in CAMEL_TO_SNAKE {
        if !result.contains_key(snake) {
            if let Some(val) = result.remove(camel) {
                result.insert(snake.to_string(), val);
            }
        } else {
            // snake_case already present — remove camelCase duplicate
            result.remove(camel);
        }
    }
    serde_json::Value::Object(result)
}

// ── Event wire format ────────────────────────────────────────────────────

/// Wire format for chat events pushed over WebSocket.
/// Envelope structure: `{ type, groupId?, timestamp, data }`.
///
/// `groupId` is present whenever the event concerns a group; `groupFull`
/// is the one event that carries none.
#[derive(Debug, Serialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub timestamp: String,
    pub data: serde_json::Value,
}

/// Map internal event type names to the client wire format (camelCase).
pub fn wire_event_type(internal_type: &str) -> String {
    match internal_type {
        "matched" => "matched".into(),
        "group_full" => "groupFull".into(),
        "joined" => "joined".into(),
        "chat_history" => "chatHistory".into(),
        "receive_message" => "receiveMessage".into(),
        "timer_reset" => "timerReset".into(),
        "chat_expired" => "chatExpired".into(),
        other => other.to_string(),
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Convert an internal ChatEvent to the client wire format.
pub fn chat_event_to_wire(event: &ChatEvent) -> WireEvent {
    let event_type = wire_event_type(event.event_type());
    let group_id = event.group_id().map(|id| id.to_string());
    let timestamp = now_iso8601();

    let data = match event {
        ChatEvent::Matched {
            group_id,
            display_name,
            shared_tags,
            expires_at,
        } => serde_json::json!({
            "groupId": group_id.to_string(),
            "displayName": display_name,
            "sharedTags": shared_tags,
            "expiresAt": expires_at,
        }),
        ChatEvent::GroupFull => serde_json::json!({}),
        ChatEvent::Joined {
            group_id,
            expires_at,
        } => serde_json::json!({
            "groupId": group_id.to_string(),
            "expiresAt": expires_at,
        }),
        ChatEvent::ChatHistory { messages, .. } => serde_json::json!({
            "messages": messages
                .iter()
                .map(history_message_to_wire)
                .collect::<Vec<_>>(),
        }),
        ChatEvent::ReceiveMessage {
            group_id,
            sender,
            text,
        } => serde_json::json!({
            "sender": sender,
            "text": text,
            "groupId": group_id.to_string(),
        }),
        ChatEvent::TimerReset { expires_at, .. } => serde_json::json!({
            "expiresAt": expires_at,
        }),
        ChatEvent::ChatExpired { .. } => serde_json::json!({}),
    };

    WireEvent {
        event_type,
        group_id,
        timestamp,
        data,
    }
}

/// Convert a stored history row to camelCase wire format.
fn history_message_to_wire(msg: &HistoryMessage) -> serde_json::Value {
    serde_json::json!({
        "groupId": msg.group_id.to_string(),
        "sender": msg.sender,
        "text": msg.text,
        "timestamp": msg.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::ids::GroupId;

    // ── normalize_params tests ───────────────────────────────────────

    #[test]
    fn normalize_camel_to_snake() {
        let params = serde_json::json!({"groupId": "grp_123", "accountId": "srn-9"});
        let normalized = normalize_params(&params);
        assert_eq!(normalized["group_id"], "grp_123");
        assert_eq!(normalized["account_id"], "srn-9");
        assert!(normalized.get("groupId").is_none());
        assert!(normalized.get("accountId").is_none());
    }

    #[test]
    fn normalize_passes_through_snake_case() {
        let params = serde_json::json!({"group_id": "grp_123", "text": "hi"});
        let normalized = normalize_params(&params);
        assert_eq!(normalized["group_id"], "grp_123");
        assert_eq!(normalized["text"], "hi");
    }

    #[test]
    fn normalize_handles_both_present() {
        let params = serde_json::json!({"groupId": "camel", "group_id": "snake"});
        let normalized = normalize_params(&params);
        assert_eq!(normalized["group_id"], "snake");
    }

    #[test]
    fn normalize_handles_empty_object() {
        let normalized = normalize_params(&serde_json::json!({}));
        assert!(normalized.as_object().unwrap().is_empty());
    }

    #[test]
    fn normalize_handles_non_object() {
        let normalized = normalize_params(&serde_json::json!("string"));
        assert_eq!(normalized, serde_json::json!("string"));
    }

    #[test]
    fn normalize_all_known_keys() {
        let params = serde_json::json!({
            "groupId": "g", "accountId": "a", "displayName": "Chaotic Ducks"
        });
        let n = normalize_params(&params);
        assert!(n.get("group_id").is_some());
        assert!(n.get("account_id").is_some());
        assert!(n.get("display_name").is_some());
    }

    #[test]
    fn normalize_leaves_untracked_keys_alone() {
        let params = serde_json::json!({"interests": ["chess"], "sender": "Ducks"});
        let normalized = normalize_params(&params);
        assert_eq!(normalized["interests"][0], "chess");
        assert_eq!(normalized["sender"], "Ducks");
    }

    // ── wire_event_type tests ────────────────────────────────────────

    #[test]
    fn wire_event_type_mapping() {
        assert_eq!(wire_event_type("matched"), "matched");
        assert_eq!(wire_event_type("group_full"), "groupFull");
        assert_eq!(wire_event_type("joined"), "joined");
        assert_eq!(wire_event_type("chat_history"), "chatHistory");
        assert_eq!(wire_event_type("receive_message"), "receiveMessage");
        assert_eq!(wire_event_type("timer_reset"), "timerReset");
        assert_eq!(wire_event_type("chat_expired"), "chatExpired");
    }

    // ── chat_event_to_wire tests ─────────────────────────────────────

    #[test]
    fn wire_event_has_envelope_structure() {
        let event = ChatEvent::Matched {
            group_id: GroupId::new(),
            display_name: "Sneaky Otters".into(),
            shared_tags: vec!["chess".into()],
            expires_at: None,
        };
        let wire = chat_event_to_wire(&event);
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["type"], "matched");
        assert!(json["groupId"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["data"]["displayName"], "Sneaky Otters");
        assert_eq!(json["data"]["sharedTags"][0], "chess");
        assert!(json["data"]["expiresAt"].is_null());

        // No snake_case anywhere on the wire
        assert!(json.get("group_id").is_none());
        assert!(json["data"].get("display_name").is_none());
        assert!(json["data"].get("shared_tags").is_none());
    }

    #[test]
    fn group_full_omits_group_id() {
        let wire = chat_event_to_wire(&ChatEvent::GroupFull);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["type"], "groupFull");
        assert!(json.get("groupId").is_none());
        assert_eq!(json["data"], serde_json::json!({}));
    }

    #[test]
    fn joined_carries_nullable_expiry() {
        let gid = GroupId::new();
        let wire = chat_event_to_wire(&ChatEvent::Joined {
            group_id: gid.clone(),
            expires_at: Some(1_999_000_111_222),
        });
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["type"], "joined");
        assert_eq!(json["groupId"], gid.to_string());
        assert_eq!(json["data"]["groupId"], gid.to_string());
        assert_eq!(json["data"]["expiresAt"], 1_999_000_111_222i64);
    }

    #[test]
    fn chat_history_rows_use_camel_case() {
        let gid = GroupId::new();
        let event = ChatEvent::ChatHistory {
            group_id: gid.clone(),
            messages: vec![HistoryMessage {
                group_id: gid.clone(),
                sender: "Feral Tacos".into(),
                text: "opening theory is a scam".into(),
                timestamp: "2026-02-01T10:00:00+00:00".into(),
            }],
        };
        let json = serde_json::to_value(chat_event_to_wire(&event)).unwrap();
        assert_eq!(json["type"], "chatHistory");
        let row = &json["data"]["messages"][0];
        assert_eq!(row["groupId"], gid.to_string());
        assert_eq!(row["sender"], "Feral Tacos");
        assert_eq!(row["text"], "opening theory is a scam");
        assert_eq!(row["timestamp"], "2026-02-01T10:00:00+00:00");
        assert!(row.get("group_id").is_none());
    }

    #[test]
    fn receive_message_payload() {
        let gid = GroupId::new();
        let json = serde_json::to_value(chat_event_to_wire(&ChatEvent::ReceiveMessage {
            group_id: gid.clone(),
            sender: "Cosmic Gnomes".into(),
            text: "hello".into(),
        }))
        .unwrap();
        assert_eq!(json["type"], "receiveMessage");
        assert_eq!(json["data"]["sender"], "Cosmic Gnomes");
        assert_eq!(json["data"]["text"], "hello");
        assert_eq!(json["data"]["groupId"], gid.to_string());
    }

    #[test]
    fn timer_reset_and_expired_payloads() {
        let gid = GroupId::new();
        let reset = serde_json::to_value(chat_event_to_wire(&ChatEvent::TimerReset {
            group_id: gid.clone(),
            expires_at: 42,
        }))
        .unwrap();
        assert_eq!(reset["type"], "timerReset");
        assert_eq!(reset["groupId"], gid.to_string());
        assert_eq!(reset["data"]["expiresAt"], 42);

        let expired = serde_json::to_value(chat_event_to_wire(&ChatEvent::ChatExpired {
            group_id: gid.clone(),
        }))
        .unwrap();
        assert_eq!(expired["type"], "chatExpired");
        assert_eq!(expired["groupId"], gid.to_string());
        assert_eq!(expired["data"], serde_json::json!({}));
    }
}
