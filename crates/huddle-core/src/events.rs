use serde::{Deserialize, Serialize};

use crate::ids::GroupId;

/// A stored chat message as delivered in a history page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub group_id: GroupId,
    pub sender: String,
    pub text: String,
    pub timestamp: String,
}

/// Events pushed to connected clients. These are the internal
/// representations; the server's wire layer maps them to the
/// client-facing frame names and payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// The requester was matched into a group (possibly freshly created).
    #[serde(rename = "matched")]
    Matched {
        group_id: GroupId,
        display_name: String,
        shared_tags: Vec<String>,
        expires_at: Option<i64>,
    },

    /// The best-scoring group filled up before the requester could be
    /// admitted. No group context; the requester was never in it.
    #[serde(rename = "group_full")]
    GroupFull,

    #[serde(rename = "joined")]
    Joined {
        group_id: GroupId,
        expires_at: Option<i64>,
    },

    #[serde(rename = "chat_history")]
    ChatHistory {
        group_id: GroupId,
        messages: Vec<HistoryMessage>,
    },

    #[serde(rename = "receive_message")]
    ReceiveMessage {
        group_id: GroupId,
        sender: String,
        text: String,
    },

    /// The lock countdown restarted; expires_at is epoch milliseconds.
    #[serde(rename = "timer_reset")]
    TimerReset {
        group_id: GroupId,
        expires_at: i64,
    },

    /// Sent to a whole group when it locks, or to a single sender whose
    /// message targeted an unknown or locked group.
    #[serde(rename = "chat_expired")]
    ChatExpired {
        group_id: GroupId,
    },
}

impl ChatEvent {
    /// Group this event concerns, used for broadcast routing.
    /// `GroupFull` is requester-only and carries none.
    pub fn group_id(&self) -> Option<&GroupId> {
        match self {
            Self::Matched { group_id, .. }
            | Self::Joined { group_id, .. }
            | Self::ChatHistory { group_id, .. }
            | Self::ReceiveMessage { group_id, .. }
            | Self::TimerReset { group_id, .. }
            | Self::ChatExpired { group_id } => Some(group_id),
            Self::GroupFull => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Matched { .. } => "matched",
            Self::GroupFull => "group_full",
            Self::Joined { .. } => "joined",
            Self::ChatHistory { .. } => "chat_history",
            Self::ReceiveMessage { .. } => "receive_message",
            Self::TimerReset { .. } => "timer_reset",
            Self::ChatExpired { .. } => "chat_expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_group_id() {
        let gid = GroupId::new();
        let evt = ChatEvent::TimerReset {
            group_id: gid.clone(),
            expires_at: 1_900_000_000_000,
        };
        assert_eq!(evt.group_id(), Some(&gid));
    }

    #[test]
    fn group_full_has_no_group_id() {
        assert!(ChatEvent::GroupFull.group_id().is_none());
    }

    #[test]
    fn chat_event_type_str() {
        let evt = ChatEvent::ChatExpired {
            group_id: GroupId::new(),
        };
        assert_eq!(evt.event_type(), "chat_expired");
    }

    #[test]
    fn chat_event_serde_roundtrip() {
        let events = vec![
            ChatEvent::Matched {
                group_id: GroupId::new(),
                display_name: "Cosmic Penguins".into(),
                shared_tags: vec!["chess".into()],
                expires_at: None,
            },
            ChatEvent::Joined {
                group_id: GroupId::new(),
                expires_at: Some(1_900_000_000_000),
            },
            ChatEvent::ReceiveMessage {
                group_id: GroupId::new(),
                sender: "ortho".into(),
                text: "hello".into(),
            },
            ChatEvent::GroupFull,
        ];

        for evt in &events {
            let json = serde_json::to_string(evt).unwrap();
            let parsed: ChatEvent = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2);
        }
    }

    #[test]
    fn chat_history_carries_rows() {
        let gid = GroupId::new();
        let evt = ChatEvent::ChatHistory {
            group_id: gid.clone(),
            messages: vec![HistoryMessage {
                group_id: gid.clone(),
                sender: "kit".into(),
                text: "anyone here".into(),
                timestamp: "2026-03-01T09:30:00Z".into(),
            }],
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"type\":\"chat_history\""));
        let parsed: ChatEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ChatEvent::ChatHistory { messages, .. } => assert_eq!(messages.len(), 1),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
