//! In-process [`Bus`] over `tokio::sync::broadcast`, used by tests that
//! exercise the full pub/sub contract without a real MQTT broker. Mirrors
//! this codebase's kernel IPC bus: a single broadcast channel fans out every
//! publish, and each subscriber filters by its own topic pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::mqtt::topic_matches;
use crate::{Bus, BusMessage, BusSubscription};

const CHANNEL_CAPACITY: usize = 1024;

/// In-memory stand-in for [`crate::mqtt::MqttBus`]. Delivery is in-order and
/// at-least-once within process lifetime, same as the real transport (§4.1),
/// but there is no reconnect logic since there is no connection to lose.
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
    connected: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            connected: AtomicBool::new(false),
        }
    }

    /// A second handle onto the same underlying channel, useful for tests
    /// that need an independent `Bus` endpoint wired to the same broker.
    pub fn handle(self: &Arc<Self>) -> Arc<Self> {
        self.clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(crate::error::BusError::BusNotConnected);
        }
        // No subscribers is not an error: broadcast::Sender::send only fails
        // when there are zero receivers, which just means nobody's listening.
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic_pattern: &str) -> Result<BusSubscription> {
        if !self.is_connected() {
            return Err(crate::error::BusError::BusNotConnected);
        }
        let mut broadcast_rx = self.sender.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let pattern = topic_pattern.to_string();

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(message) if topic_matches(&pattern, &message.topic) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(BusSubscription {
            topic_pattern: topic_pattern.to_string(),
            receiver: rx,
        })
    }

    async fn unsubscribe(&self, _topic_pattern: &str) -> Result<()> {
        // Dropping the BusSubscription's receiver is what actually tears the
        // forwarding task down; nothing is keyed by pattern here.
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_before_connect_is_rejected() {
        let bus = InMemoryBus::new();
        let err = bus.publish("tasks/workflow/development", vec![1]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn subscriber_receives_matching_published_message() {
        let bus = InMemoryBus::new();
        bus.connect().await.unwrap();
        let mut sub = bus.subscribe("tasks/workflow/development").await.unwrap();

        bus.publish("tasks/workflow/development", b"hello".to_vec())
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), sub.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, b"hello");
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_non_matching_topic() {
        let bus = InMemoryBus::new();
        bus.connect().await.unwrap();
        let mut sub = bus.subscribe("tasks/workflow/development").await.unwrap();

        bus.publish("tasks/workflow/review", b"hello".to_vec())
            .await
            .unwrap();
        bus.publish("tasks/workflow/development", b"world".to_vec())
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), sub.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, b"world");
    }

    #[tokio::test]
    async fn wildcard_subscription_matches_multiple_topics() {
        let bus = InMemoryBus::new();
        bus.connect().await.unwrap();
        let mut sub = bus.subscribe("results/workflow/+").await.unwrap();

        bus.publish("results/workflow/development", b"a".to_vec())
            .await
            .unwrap();
        bus.publish("results/workflow/review", b"b".to_vec())
            .await
            .unwrap();

        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        assert_eq!(first.payload, b"a");
        assert_eq!(second.payload, b"b");
    }
}
