//! Main application state and service coordination
//!
//! This module contains the production AppState that coordinates all
//! service components, AMQP connections, and background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{CommandHandler, RaceCommandConsumer};
use crate::amqp::publisher::{AmqpEventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::error::{RaceError, Result as RaceResult};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::race::manager::RaceManager;
use crate::results::{InMemoryResultStore, ResultStore, ResultWriter};
use crate::types::{CancelMatchCommand, DisconnectNotice, FindMatchCommand, PlayerTapCommand};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// How many finished races the in-memory store keeps before evicting
const RESULT_STORE_CAPACITY: usize = 10_000;

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Production command handler that integrates with RaceManager
struct ProductionCommandHandler {
    race_manager: Arc<RaceManager>,
}

impl ProductionCommandHandler {
    fn new(race_manager: Arc<RaceManager>) -> Self {
        Self { race_manager }
    }
}

#[async_trait]
impl CommandHandler for ProductionCommandHandler {
    async fn handle_find_match(&self, command: FindMatchCommand) -> RaceResult<()> {
        let start_time = std::time::Instant::now();

        info!(
            "Processing find match in production handler - player: '{}', connection: '{}'",
            command.user_id, command.connection_id
        );

        let player_id = command.user_id.clone();
        match Arc::clone(&self.race_manager).handle_find_match(command).await {
            Ok(Some(room_id)) => {
                let processing_time = start_time.elapsed();
                info!(
                    "Find match produced a pairing - player: '{}', room: {}, time: {:.2}ms",
                    player_id,
                    room_id,
                    processing_time.as_secs_f64() * 1000.0
                );
                Ok(())
            }
            Ok(None) => {
                debug!("Find match left player '{}' waiting or was ignored", player_id);
                Ok(())
            }
            Err(e) => {
                let processing_time = start_time.elapsed();
                error!(
                    "Find match failed - player: '{}', time: {:.2}ms, error: {}",
                    player_id,
                    processing_time.as_secs_f64() * 1000.0,
                    e
                );
                Err(e)
            }
        }
    }

    async fn handle_cancel_match(&self, command: CancelMatchCommand) -> RaceResult<()> {
        let player_id = command.user_id.clone();

        match self.race_manager.handle_cancel_match(command).await {
            Ok(removed) => {
                debug!(
                    "Cancel match processed - player: '{}', removed: {}",
                    player_id, removed
                );
                Ok(())
            }
            Err(e) => {
                error!("Cancel match failed - player: '{}', error: {}", player_id, e);
                Err(e)
            }
        }
    }

    async fn handle_player_tap(&self, command: PlayerTapCommand) -> RaceResult<()> {
        // Taps are high-frequency; leave per-tap logging to the manager's
        // debug paths and only surface failures here.
        let room_id = command.room_id;

        match Arc::clone(&self.race_manager).handle_tap(command).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Tap processing failed - room: {}, error: {}", room_id, e);
                Err(e)
            }
        }
    }

    async fn handle_disconnect(&self, notice: DisconnectNotice) -> RaceResult<()> {
        let connection_id = notice.connection_id.clone();

        match Arc::clone(&self.race_manager).handle_disconnect(notice).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    "Disconnect processing failed - connection: '{}', error: {}",
                    connection_id, e
                );
                Err(e)
            }
        }
    }

    async fn handle_error(&self, error: RaceError, message_data: &[u8]) {
        error!(
            "Production command handler error - type: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        // Log first 100 bytes of message for debugging (safely)
        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

/// Main application state containing all service components
///
/// All mutation goes through interior locks so the state can live in an
/// `Arc` shared between the signal handler, the health server, and the
/// periodic check task.
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Core race orchestration component
    race_manager: Arc<RaceManager>,

    /// Fire-and-forget result persistence
    result_writer: Arc<ResultWriter>,

    /// AMQP connection for message handling
    amqp_connection: Arc<AmqpConnection>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// AMQP consumer for race commands
    command_consumer: RwLock<Option<RaceCommandConsumer>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing starting-grid race service");
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        // Initialize AMQP connection
        let amqp_connection = Self::initialize_amqp(&config).await?;

        // Initialize metrics service
        let metrics_service = Self::initialize_metrics(&config).await?;

        // Initialize the race system with metrics
        let (race_manager, result_writer) = Self::initialize_race_system(
            &config,
            amqp_connection.clone(),
            metrics_service.collector(),
        )
        .await?;

        Ok(Self {
            config,
            race_manager,
            result_writer,
            amqp_connection,
            metrics_service,
            background_tasks: Mutex::new(Vec::new()),
            command_consumer: RwLock::new(None),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&self) -> Result<(), ServiceError> {
        info!("Starting starting-grid race service");

        // Mark as running
        *self.is_running.write().await = true;

        // Start metrics service first
        self.start_metrics_service().await?;

        // Start AMQP message consumption
        self.start_amqp_consumption().await?;

        // Start background tasks
        self.start_background_tasks().await?;

        info!("✅ Starting-grid race service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of starting-grid service");

        // Mark as not running
        *self.is_running.write().await = false;

        // Stop AMQP message consumption
        if let Some(consumer) = self.command_consumer.read().await.as_ref() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        // Discard unfinished sessions and cancel their timers
        if let Err(e) = self.race_manager.shutdown() {
            warn!("Failed to shut down race manager: {}", e);
        }

        // Stop background tasks (including metrics service task)
        self.stop_background_tasks().await;

        // Stop metrics service
        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        // Get final statistics
        let final_stats = self.race_manager.get_stats().await.map_err(|e| {
            ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            }
        })?;

        info!("Final service statistics: {:?}", final_stats);
        info!(
            "Result writer totals - submitted: {}, dropped: {}, write failures: {}",
            self.result_writer.submitted_count(),
            self.result_writer.dropped_count(),
            self.result_writer.write_failure_count()
        );
        info!("✅ Starting-grid service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Get race manager for operations
    pub fn race_manager(&self) -> Arc<RaceManager> {
        self.race_manager.clone()
    }

    /// Get the result writer
    pub fn result_writer(&self) -> Arc<ResultWriter> {
        self.result_writer.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    /// Initialize metrics service
    async fn initialize_metrics(config: &AppConfig) -> Result<Arc<MetricsService>, ServiceError> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(HealthServer::new(health_config, metrics_collector.clone()));
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        Ok(metrics_service)
    }

    /// Start metrics service
    async fn start_metrics_service(&self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        // Clone necessary references for the background task
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        // Spawn the metrics service as a background task
        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        // Add the handle to background tasks for proper shutdown
        self.background_tasks.lock().await.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config = AmqpConfig::from_url(&config.amqp.url).map_err(|e| {
            ServiceError::AmqpConnection {
                message: format!("Failed to parse AMQP URL: {}", e),
            }
        })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Initialize the complete race system
    async fn initialize_race_system(
        config: &AppConfig,
        amqp_connection: Arc<AmqpConnection>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<(Arc<RaceManager>, Arc<ResultWriter>), ServiceError> {
        info!("Initializing race system components");

        // Get a channel from the connection
        let channel =
            amqp_connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to open AMQP channel: {}", e),
                })?;

        // Initialize event publisher
        let publisher_config = PublisherConfig::default();
        let event_publisher = Arc::new(
            AmqpEventPublisher::new(channel, publisher_config)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize event publisher: {}", e),
                })?,
        );

        // Initialize result persistence
        let result_store = Arc::new(InMemoryResultStore::new(
            RESULT_STORE_CAPACITY,
            config.race.leaderboard_min_games,
        ));
        let result_writer = Arc::new(ResultWriter::start(
            result_store as Arc<dyn ResultStore>,
            config.race.result_queue_capacity,
        ));

        // Initialize the race manager
        let race_manager = Arc::new(RaceManager::with_metrics(
            config.race.clone(),
            event_publisher,
            result_writer.clone(),
            metrics_collector,
        ));

        Ok((race_manager, result_writer))
    }

    /// Start AMQP message consumption
    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        info!("Starting AMQP message consumption system...");

        let command_queue = self.config.amqp.command_queue.clone();

        // Get a channel for consuming messages
        info!("Opening AMQP channel for message consumption...");
        let channel = self.amqp_connection.open_channel().await.map_err(|e| {
            ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            }
        })?;

        info!("AMQP channel opened successfully");

        // Declare the queue to ensure it exists
        info!("Declaring queue: '{}'...", command_queue);
        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&command_queue)
            .durable(true)
            .auto_delete(false)
            .finish();

        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", command_queue, e),
            })?;

        info!("Queue '{}' declared successfully", command_queue);

        // Create command handler
        info!("Creating production command handler...");
        let command_handler = Arc::new(ProductionCommandHandler::new(self.race_manager.clone()));
        info!("Production command handler created");

        // Create and configure consumer
        info!("Setting up AMQP consumer...");
        let consumer = RaceCommandConsumer::new(command_handler, channel);

        // Start consuming from the queue
        info!(
            "Starting message consumption from queue '{}'...",
            command_queue
        );
        consumer
            .start_consuming(&command_queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        // Store consumer for cleanup
        *self.command_consumer.write().await = Some(consumer);

        info!(
            "AMQP message consumption started successfully on queue: '{}'",
            command_queue
        );
        info!("Now listening for race commands from players...");
        Ok(())
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(&self) -> Result<(), ServiceError> {
        info!("Starting background maintenance tasks...");

        // Metrics update task
        info!("Starting race metrics update task (30s interval)...");
        let metrics_task = {
            let race_manager = self.race_manager.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                info!("Metrics update task started");

                while *is_running.read().await {
                    interval.tick().await;

                    // Update gauges from race manager stats
                    match race_manager.get_stats().await {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - sessions: {}, waiting: {}, started: {}",
                                stats.active_sessions, stats.players_waiting, stats.races_started
                            );
                            metrics_collector.update_from_manager_stats(&stats);
                        }
                        Err(e) => {
                            warn!("Failed to get race stats for metrics update: {}", e);
                        }
                    }
                }

                info!("Metrics update task stopped");
            })
        };

        // Session cleanup task
        info!(
            "Starting session cleanup task ({}s interval)...",
            self.config.cleanup_interval().as_secs()
        );
        let cleanup_task = {
            let race_manager = self.race_manager.clone();
            let cleanup_interval = self.config.cleanup_interval();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                info!("Session cleanup task started");

                while *is_running.read().await {
                    interval.tick().await;

                    match race_manager.cleanup_stale_sessions().await {
                        Ok(cleaned) => {
                            if cleaned > 0 {
                                info!("Cleaned up {} stale sessions", cleaned);
                            } else {
                                debug!("Cleanup check completed - no stale sessions found");
                            }
                        }
                        Err(e) => {
                            warn!("Session cleanup failed: {}", e);
                        }
                    }
                }

                info!("Session cleanup task stopped");
            })
        };

        // Service health metrics task
        info!("Starting health metrics task (60s interval)...");
        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let amqp_connection = self.amqp_connection.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    // Update service uptime
                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    debug!(
                        "Updated service health metrics - uptime: {}s",
                        uptime_seconds
                    );

                    let amqp_alive = amqp_connection.is_alive();
                    metrics_collector.update_health_status(if amqp_alive { 2 } else { 1 });

                    // Update component health
                    metrics_collector.update_component_health("amqp", amqp_alive);
                    metrics_collector.update_component_health("race_manager", true);
                    metrics_collector.update_component_health("metrics", true);
                }

                info!("Health metrics task stopped");
            })
        };

        {
            let mut background_tasks = self.background_tasks.lock().await;
            background_tasks.push(metrics_task);
            background_tasks.push(cleanup_task);
            background_tasks.push(health_metrics_task);
        }

        info!("3 background maintenance tasks started successfully");
        Ok(())
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut background_tasks = self.background_tasks.lock().await;
            background_tasks.drain(..).collect()
        };

        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        // Cancel all background tasks
        for (i, task) in tasks.into_iter().enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        // Give tasks time to clean up gracefully
        info!("Waiting for background tasks to complete shutdown...");
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}
