//! AMQP message handlers for processing client commands
//!
//! This module provides the message handling infrastructure for the race
//! service: command deserialization, dispatch, and error absorption.

use crate::amqp::messages::MessageUtils;
use crate::error::{RaceError, Result};
use crate::types::{
    CancelMatchCommand, ClientCommand, DisconnectNotice, FindMatchCommand, PlayerTapCommand,
};
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Trait defining the interface for handling client commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a matchmaking request
    async fn handle_find_match(&self, command: FindMatchCommand) -> Result<()>;

    /// Handle a matchmaking cancellation
    async fn handle_cancel_match(&self, command: CancelMatchCommand) -> Result<()>;

    /// Handle a tap from a racing player
    async fn handle_player_tap(&self, command: PlayerTapCommand) -> Result<()>;

    /// Handle a dropped transport connection
    async fn handle_disconnect(&self, notice: DisconnectNotice) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: RaceError, message_data: &[u8]);
}

/// Consumer for handling client command messages
pub struct RaceCommandConsumer {
    handler: Arc<dyn CommandHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl RaceCommandConsumer {
    /// Create a new command consumer
    pub fn new(handler: Arc<dyn CommandHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("race-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the command queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(CommandConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| RaceError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| RaceError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

/// Internal consumer implementation
struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
}

impl CommandConsumer {
    fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for CommandConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let routing_key = deliver.routing_key();

        debug!(
            "AMQP command received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            routing_key,
            content.len()
        );

        let start_time = std::time::Instant::now();

        match self.process_message(&content).await {
            Ok(_) => {
                debug!(
                    "Command processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Command processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                self.handler
                    .handle_error(
                        RaceError::InternalError {
                            message: e.to_string(),
                        },
                        &content,
                    )
                    .await;
            }
        }
    }
}

impl CommandConsumer {
    /// Deserialize an incoming message and dispatch it
    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let command = MessageUtils::deserialize_command(content)?;

        match command {
            ClientCommand::FindMatch(cmd) => {
                debug!(
                    "FindMatch parsed - user_id: '{}', connection: '{}'",
                    cmd.user_id, cmd.connection_id
                );
                self.handler.handle_find_match(cmd).await
            }
            ClientCommand::CancelMatch(cmd) => {
                debug!("CancelMatch parsed - user_id: '{}'", cmd.user_id);
                self.handler.handle_cancel_match(cmd).await
            }
            ClientCommand::PlayerTap(cmd) => {
                self.handler.handle_player_tap(cmd).await
            }
            ClientCommand::Disconnect(notice) => {
                debug!(
                    "Disconnect parsed - connection: '{}'",
                    notice.connection_id
                );
                self.handler.handle_disconnect(notice).await
            }
        }
    }
}

/// Mock command handler for testing
pub struct MockCommandHandler {
    pub received_commands: Arc<tokio::sync::Mutex<Vec<ClientCommand>>>,
}

impl Default for MockCommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCommandHandler {
    pub fn new() -> Self {
        Self {
            received_commands: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_find_match(&self, command: FindMatchCommand) -> Result<()> {
        let mut commands = self.received_commands.lock().await;
        commands.push(ClientCommand::FindMatch(command));
        Ok(())
    }

    async fn handle_cancel_match(&self, command: CancelMatchCommand) -> Result<()> {
        let mut commands = self.received_commands.lock().await;
        commands.push(ClientCommand::CancelMatch(command));
        Ok(())
    }

    async fn handle_player_tap(&self, command: PlayerTapCommand) -> Result<()> {
        let mut commands = self.received_commands.lock().await;
        commands.push(ClientCommand::PlayerTap(command));
        Ok(())
    }

    async fn handle_disconnect(&self, notice: DisconnectNotice) -> Result<()> {
        let mut commands = self.received_commands.lock().await;
        commands.push(ClientCommand::Disconnect(notice));
        Ok(())
    }

    async fn handle_error(&self, error: RaceError, _message_data: &[u8]) {
        eprintln!("Mock handler received error: {}", error);
    }
}
