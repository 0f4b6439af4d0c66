use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceKey};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed changes, one channel per resource row.
pub struct NotifyHub {
    channels: DashMap<ResourceKey, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a resource. Creates the channel if needed.
    pub fn subscribe(&self, key: ResourceKey) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, key: ResourceKey, event: &Event) {
        if let Some(sender) = self.channels.get(&key) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel once its last subscriber has gone away.
    pub fn prune(&self, key: &ResourceKey) {
        self.channels
            .remove_if(key, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let key = ResourceKey::Class(Ulid::new());
        let mut rx = hub.subscribe(key);

        let event = Event::CapacityChanged {
            class_id: key.id(),
            capacity: 12,
        };
        hub.send(key, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let key = ResourceKey::Teacher(Ulid::new());
        hub.send(key, &Event::TeacherCreated { id: key.id(), name: None });
    }

    #[tokio::test]
    async fn prune_keeps_live_channels() {
        let hub = NotifyHub::new();
        let key = ResourceKey::Teacher(Ulid::new());
        let rx = hub.subscribe(key);
        hub.prune(&key);
        assert_eq!(hub.channels.len(), 1);
        drop(rx);
        hub.prune(&key);
        assert!(hub.channels.is_empty());
    }
}
