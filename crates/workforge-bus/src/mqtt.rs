//! MQTT-backed [`Bus`] implementation over `rumqttc`.
//!
//! Mirrors the connect/reconnect/dispatch shape of this codebase's existing
//! MQTT adapter: a background task owns the `rumqttc` event loop, dispatches
//! incoming publishes to the matching subscriber channel(s), and reconnects
//! with bounded exponential backoff on transport failure (§4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, Mutex};

use crate::error::{BusError, Result};
use crate::{Bus, BusMessage, BusSubscription};

/// Configuration for [`MqttBus`]. Built explicitly by the CLI layer and
/// passed to the constructor — no global config singleton (§9/§10.3).
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Initial reconnect backoff (§4.1: 1 s default).
    pub initial_backoff: Duration,
    /// Reconnect backoff ceiling (§4.1: 30 s default).
    pub max_backoff: Duration,
    /// Deadline for [`Bus::connect`] before surfacing [`BusError::BusConnectTimeout`].
    pub connect_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("workforge-{}", uuid::Uuid::now_v7()),
            keep_alive: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Does `topic` match `pattern`, honoring MQTT's `+` (single-level) and `#`
/// (multi-level, trailing-only) wildcards?
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_levels: Vec<&str> = pattern.split('/').collect();
    let topic_levels: Vec<&str> = topic.split('/').collect();

    let mut pi = 0;
    let mut ti = 0;
    while pi < pattern_levels.len() {
        match pattern_levels[pi] {
            "#" => return true, // matches all remaining levels, including zero
            "+" => {
                if ti >= topic_levels.len() {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
            literal => {
                if ti >= topic_levels.len() || topic_levels[ti] != literal {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
        }
    }
    ti == topic_levels.len()
}

struct MqttBusInner {
    client: Mutex<Option<AsyncClient>>,
    connected: AtomicBool,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<BusMessage>>>,
}

/// Production [`Bus`] implementation backed by an MQTT broker.
pub struct MqttBus {
    config: MqttConfig,
    inner: Arc<MqttBusInner>,
}

impl MqttBus {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            inner: Arc::new(MqttBusInner {
                client: Mutex::new(None),
                connected: AtomicBool::new(false),
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn dispatch(subscriptions: &HashMap<String, mpsc::UnboundedSender<BusMessage>>, topic: &str, payload: Vec<u8>) {
        for (pattern, sender) in subscriptions {
            if topic_matches(pattern, topic) {
                let message = BusMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                if sender.send(message).is_err() {
                    tracing::debug!(pattern = %pattern, "subscriber channel closed, message dropped");
                }
            }
        }
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn connect(&self) -> Result<()> {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);

        let (client, mut event_loop) = AsyncClient::new(options, 256);

        // The first poll performs the actual TCP/MQTT handshake; bound it by
        // the configured connect timeout.
        match tokio::time::timeout(self.config.connect_timeout, event_loop.poll()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(BusError::Connection(e)),
            Err(_) => return Err(BusError::BusConnectTimeout),
        }

        *self.inner.client.lock().await = Some(client);
        self.inner.connected.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        let initial_backoff = self.config.initial_backoff;
        let max_backoff = self.config.max_backoff;

        tokio::spawn(async move {
            let mut backoff = initial_backoff;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        backoff = initial_backoff;
                        let subs = inner.subscriptions.lock().await;
                        MqttBus::dispatch(&subs, &publish.topic, publish.payload.to_vec());
                    }
                    Ok(_) => {
                        backoff = initial_backoff;
                    }
                    Err(e) => {
                        inner.connected.store(false, Ordering::SeqCst);
                        tracing::error!(error = %e, "mqtt event loop error, reconnecting");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(max_backoff);
                        inner.connected.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.inner.client.lock().await.take() {
            client
                .disconnect()
                .await
                .map_err(BusError::Client)?;
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(BusError::BusNotConnected);
        }
        let guard = self.inner.client.lock().await;
        let client = guard.as_ref().ok_or(BusError::BusNotConnected)?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BusError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, topic_pattern: &str) -> Result<BusSubscription> {
        if !self.is_connected() {
            return Err(BusError::BusNotConnected);
        }
        let guard = self.inner.client.lock().await;
        let client = guard.as_ref().ok_or(BusError::BusNotConnected)?;
        client
            .subscribe(topic_pattern, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::SubscribeFailed {
                topic: topic_pattern.to_string(),
                reason: e.to_string(),
            })?;
        drop(guard);

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscriptions
            .lock()
            .await
            .insert(topic_pattern.to_string(), tx);

        Ok(BusSubscription {
            topic_pattern: topic_pattern.to_string(),
            receiver: rx,
        })
    }

    async fn unsubscribe(&self, topic_pattern: &str) -> Result<()> {
        let guard = self.inner.client.lock().await;
        if let Some(client) = guard.as_ref() {
            client
                .unsubscribe(topic_pattern)
                .await
                .map_err(BusError::Client)?;
        }
        drop(guard);
        self.inner.subscriptions.lock().await.remove(topic_pattern);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_matches_literal() {
        assert!(topic_matches("tasks/workflow/development", "tasks/workflow/development"));
        assert!(!topic_matches("tasks/workflow/development", "tasks/workflow/review"));
    }

    #[test]
    fn topic_matches_single_level_wildcard() {
        assert!(topic_matches("results/workflow/+", "results/workflow/development"));
        assert!(!topic_matches("results/workflow/+", "results/workflow/development/extra"));
    }

    #[test]
    fn topic_matches_multi_level_wildcard() {
        assert!(topic_matches("workers/status/#", "workers/status/developer/worker-1"));
        assert!(topic_matches("workers/status/#", "workers/status"));
    }

    #[test]
    fn default_config_matches_spec_backoff_bounds() {
        let config = MqttConfig::default();
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(30));
    }
}
