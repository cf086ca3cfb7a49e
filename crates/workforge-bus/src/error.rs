//! Bus error types (Transport/Protocol taxonomy, §7).

/// Unified error type for bus transport operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// `Publish`/`Subscribe` attempted while the client has no live
    /// connection.
    #[error("bus not connected")]
    BusNotConnected,

    /// `Connect` did not complete before its deadline.
    #[error("bus connect timed out")]
    BusConnectTimeout,

    /// Publishing a message failed after the client was connected.
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Subscribing to a topic pattern failed.
    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// A payload received on the bus could not be interpreted.
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    /// Wraps a transport-level error from the underlying MQTT client.
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Wraps a connection-level error from the underlying MQTT client.
    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

/// Convenience alias used throughout the bus crate.
pub type Result<T> = std::result::Result<T, BusError>;
