//! Bus Client (C1): pub/sub transport with at-least-once delivery.
//!
//! [`Bus`] is the contract every orchestrator/worker component programs
//! against; [`mqtt::MqttBus`] is the production implementation over
//! `rumqttc`, and [`fake::InMemoryBus`] is an in-process stand-in (built on
//! `tokio::sync::broadcast`, the same primitive this codebase's kernel uses
//! for its IPC bus) used by engine/orchestrator/worker tests that don't need
//! a real broker.

pub mod error;
pub mod fake;
pub mod mqtt;

pub use error::{BusError, Result};
pub use mqtt::{MqttBus, MqttConfig};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A message observed on a subscribed topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A live subscription: topic pattern plus the channel messages arrive on.
pub struct BusSubscription {
    pub topic_pattern: String,
    pub receiver: mpsc::UnboundedReceiver<BusMessage>,
}

/// Pub/sub transport contract (§4.1). Implementations must honor:
/// - at-least-once delivery (duplicates possible; callers handle idempotency),
/// - in-order delivery per topic to a single subscriber,
/// - automatic reconnect with bounded exponential backoff,
/// - `publish` failing with [`BusError::BusNotConnected`] while disconnected.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Establish the transport connection, respecting the configured connect
    /// timeout (surfaces [`BusError::BusConnectTimeout`] on expiry).
    async fn connect(&self) -> Result<()>;

    /// Tear down the transport connection.
    async fn disconnect(&self) -> Result<()>;

    /// Publish `payload` to `topic`. Fails with [`BusError::BusNotConnected`]
    /// while disconnected.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to `topic_pattern` (may contain MQTT-style `+`/`#`
    /// wildcards). Returns a channel of subsequently arriving messages.
    async fn subscribe(&self, topic_pattern: &str) -> Result<BusSubscription>;

    /// Cancel a previous subscription.
    async fn unsubscribe(&self, topic_pattern: &str) -> Result<()>;

    /// Whether the transport currently believes it is connected.
    fn is_connected(&self) -> bool;
}
