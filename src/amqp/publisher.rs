//! AMQP event publisher for outbound room events

use crate::amqp::messages::{MessageEnvelope, MessageUtils, ROOM_EVENTS_EXCHANGE};
use crate::error::{RaceError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing room-scoped race events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a MatchFound event
    async fn publish_match_found(&self, event: MatchFound) -> Result<()>;

    /// Publish a GameCountdown tick
    async fn publish_countdown(&self, event: GameCountdown) -> Result<()>;

    /// Publish a GameStart event
    async fn publish_game_start(&self, event: GameStart) -> Result<()>;

    /// Publish a PlayerMove event
    async fn publish_player_move(&self, event: PlayerMove) -> Result<()>;

    /// Publish a GameEnd event
    async fn publish_game_end(&self, event: GameEnd) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            publish_timeout_ms: 5000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: std::sync::Mutex<std::collections::HashSet<String>>, // For deduplication
}

impl AmqpEventPublisher {
    /// Create a new event publisher
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: std::sync::Mutex::new(std::collections::HashSet::new()),
        };

        publisher.setup_exchanges().await?;

        Ok(publisher)
    }

    /// Set up the topic exchange room events fan out through
    async fn setup_exchanges(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(ROOM_EVENTS_EXCHANGE, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            RaceError::AmqpConnectionFailed {
                message: format!("Failed to declare room events exchange: {}", e),
            }
        })?;

        info!("Successfully set up AMQP exchanges");
        Ok(())
    }

    /// Wrap a room event and publish it with retries
    async fn publish_event(&self, event: RoomEvent) -> Result<()> {
        let routing_key = MessageUtils::get_routing_key(&event);
        let envelope = MessageEnvelope::new(event, routing_key);
        self.publish_to_exchange(ROOM_EVENTS_EXCHANGE, &envelope)
            .await
    }

    /// Generic method to publish to an exchange with retry logic
    async fn publish_to_exchange<T>(
        &self,
        exchange: &str,
        envelope: &MessageEnvelope<T>,
    ) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        // Check for deduplication
        if self.config.enable_deduplication {
            let published_messages =
                self.published_messages
                    .lock()
                    .map_err(|_| RaceError::InternalError {
                        message: "Failed to acquire published messages lock".to_string(),
                    })?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Message {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(exchange, envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages =
                            self.published_messages.lock().map_err(|_| {
                                RaceError::InternalError {
                                    message: "Failed to acquire published messages lock"
                                        .to_string(),
                                }
                            })?;
                        published_messages.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Successfully published message {} to exchange {}",
                        envelope.correlation_id, exchange
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, exchange: &str, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| RaceError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Clear deduplication cache (useful for testing or memory management)
    pub fn clear_deduplication_cache(&self) {
        if let Ok(mut published_messages) = self.published_messages.lock() {
            published_messages.clear();
        }
    }

    /// Get number of cached message IDs (for monitoring)
    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        self.publish_event(RoomEvent::MatchFound(event)).await
    }

    async fn publish_countdown(&self, event: GameCountdown) -> Result<()> {
        self.publish_event(RoomEvent::GameCountdown(event)).await
    }

    async fn publish_game_start(&self, event: GameStart) -> Result<()> {
        self.publish_event(RoomEvent::GameStart(event)).await
    }

    async fn publish_player_move(&self, event: PlayerMove) -> Result<()> {
        self.publish_event(RoomEvent::PlayerMove(event)).await
    }

    async fn publish_game_end(&self, event: GameEnd) -> Result<()> {
        self.publish_event(RoomEvent::GameEnd(event)).await
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<String>>,
    failures_remaining: std::sync::Mutex<usize>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published event types in order (for testing)
    pub fn get_published_events(&self) -> Vec<String> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Count events of one type (for testing)
    pub fn count_events(&self, event_type: &str) -> usize {
        self.get_published_events()
            .iter()
            .filter(|name| name.as_str() == event_type)
            .count()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    /// Make the next `count` publish calls fail (for testing)
    pub fn fail_next_publishes(&self, count: usize) {
        if let Ok(mut remaining) = self.failures_remaining.lock() {
            *remaining = count;
        }
    }

    fn record(&self, name: &str) -> Result<()> {
        if let Ok(mut remaining) = self.failures_remaining.lock() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RaceError::AmqpConnectionFailed {
                    message: format!("Injected failure publishing {}", name),
                }
                .into());
            }
        }
        if let Ok(mut events) = self.published_events.lock() {
            events.push(name.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_match_found(&self, _event: MatchFound) -> Result<()> {
        self.record("MatchFound")
    }

    async fn publish_countdown(&self, _event: GameCountdown) -> Result<()> {
        self.record("GameCountdown")
    }

    async fn publish_game_start(&self, _event: GameStart) -> Result<()> {
        self.record("GameStart")
    }

    async fn publish_player_move(&self, _event: PlayerMove) -> Result<()> {
        self.record("PlayerMove")
    }

    async fn publish_game_end(&self, _event: GameEnd) -> Result<()> {
        self.record("GameEnd")
    }
}
