use tokio::sync::broadcast;

/// Fire-and-forget notifications consumed by UI layers. The engine publishes
/// these but never depends on anyone listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ProgressUpdated {
        connection_id: String,
        primary_id: String,
        grouping_id: Option<String>,
    },
    ConnectionsChanged,
    BookmarksChanged {
        connection_id: String,
        primary_id: String,
    },
    DownloadStatusChanged {
        connection_id: String,
        primary_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Dropped silently when no subscriber is attached.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::ConnectionsChanged);
        bus.publish(Event::DownloadStatusChanged {
            connection_id: "c1".into(),
            primary_id: "item".into(),
        });
        assert_eq!(rx.recv().await.unwrap(), Event::ConnectionsChanged);
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::DownloadStatusChanged {
                connection_id: "c1".into(),
                primary_id: "item".into(),
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish(Event::ConnectionsChanged);
    }
}
