use std::sync::Arc;

use huddle_core::events::ChatEvent;
use tokio::sync::broadcast;

use crate::client::ClientRegistry;
use crate::wire;

/// Subscribes to the lifecycle event broadcast and forwards events to the
/// WebSocket clients subscribed to the affected group.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Start the bridge. Spawns a task that reads from the broadcast channel
    /// and sends serialized events to subscribed WebSocket clients.
    pub fn start(&self, mut rx: broadcast::Receiver<ChatEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        // Events without a group (groupFull) are pushed
                        // directly by their handlers, never broadcast.
                        let Some(group_id) = event.group_id() else {
                            continue;
                        };
                        let wire_event = wire::chat_event_to_wire(&event);
                        if let Ok(json) = serde_json::to_string(&wire_event) {
                            registry.broadcast_to_group(group_id, &json, None);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<ChatEvent>,
) -> tokio::task::JoinHandle<()> {
    let bridge = EventBridge::new(registry);
    bridge.start(rx)
}

/// Serialize a chat event to its wire representation.
pub fn serialize_event(event: &ChatEvent) -> Option<String> {
    let wire = wire::chat_event_to_wire(event);
    serde_json::to_string(&wire).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::ids::GroupId;

    #[test]
    fn serialize_timer_reset_event() {
        let event = ChatEvent::TimerReset {
            group_id: GroupId::new(),
            expires_at: 1_999_000_000_000,
        };
        let json = serialize_event(&event).unwrap();
        assert!(json.contains("\"type\":\"timerReset\""));
        assert!(json.contains("\"expiresAt\":1999000000000"));
    }

    #[test]
    fn serialize_chat_expired_event() {
        let gid = GroupId::new();
        let event = ChatEvent::ChatExpired {
            group_id: gid.clone(),
        };
        let json = serialize_event(&event).unwrap();
        assert!(json.contains("\"type\":\"chatExpired\""));
        assert!(json.contains(gid.as_str()));
    }

    #[tokio::test]
    async fn bridge_forwards_to_group_subscribers() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(100);

        let (client_id, mut client_rx) = registry.register();
        let group_id = GroupId::new();
        registry.join_group(&client_id, group_id.clone()).await;

        let handle = create_bridge(Arc::clone(&registry), rx);

        let event = ChatEvent::TimerReset {
            group_id: group_id.clone(),
            expires_at: 42,
        };
        tx.send(event).unwrap();

        // Give the bridge task time to process
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let msg = client_rx.try_recv().unwrap();
        assert!(msg.contains("timerReset"));

        handle.abort();
    }

    #[tokio::test]
    async fn bridge_ignores_other_groups() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(100);

        let (client_id, mut client_rx) = registry.register();
        registry.join_group(&client_id, GroupId::new()).await;

        let _handle = create_bridge(Arc::clone(&registry), rx);

        let event = ChatEvent::ChatExpired {
            group_id: GroupId::new(),
        };
        tx.send(event).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bridge_skips_events_without_group() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(100);

        let (client_id, mut client_rx) = registry.register();
        registry.join_group(&client_id, GroupId::new()).await;

        let _handle = create_bridge(Arc::clone(&registry), rx);

        tx.send(ChatEvent::GroupFull).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(client_rx.try_recv().is_err());
    }
}
