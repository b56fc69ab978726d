//! Metrics collection using Prometheus
//!
//! This module provides comprehensive metrics collection for the starting-grid
//! race service using Prometheus metrics.

use crate::race::manager::RaceManagerStats;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the race service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Matchmaking queue metrics
    matchmaking_metrics: MatchmakingMetrics,

    /// Race session metrics
    session_metrics: SessionMetrics,

    /// Result persistence metrics
    result_metrics: ResultMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Matchmaking queue metrics
#[derive(Clone)]
pub struct MatchmakingMetrics {
    /// Players currently waiting in the queue
    pub players_waiting: IntGauge,

    /// Total matches formed
    pub matches_found_total: IntCounter,

    /// Total duplicate find-match requests replaced in place
    pub requeues_total: IntCounter,

    /// Total waiting tickets cancelled, by reason
    pub cancellations_total: IntCounterVec,

    /// Time spent waiting in the queue before a match
    pub queue_wait_time_seconds: Histogram,
}

/// Race session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Current number of live sessions
    pub active_sessions: IntGauge,

    /// Total races that reached the racing phase
    pub races_started_total: IntCounter,

    /// Total races finished with a winner
    pub races_finished_total: IntCounter,

    /// Total races abandoned before finishing, by reason
    pub races_abandoned_total: IntCounterVec,

    /// Total taps applied to racing sessions
    pub taps_total: IntCounter,

    /// Total finished sessions swept after retention
    pub sessions_cleaned_total: IntCounter,

    /// Race duration from start signal to finish
    pub race_duration_seconds: Histogram,

    /// Final position of the losing player when the race ended
    pub runner_up_position: Histogram,
}

/// Result persistence metrics
#[derive(Clone)]
pub struct ResultMetrics {
    /// Results accepted onto the persistence queue
    pub results_submitted_total: IntCounter,

    /// Results dropped because the persistence queue was full
    pub results_dropped_total: IntCounter,

    /// Store writes that failed
    pub persistence_failures_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Command processing time by command type
    pub command_processing_duration: HistogramVec,

    /// Tap application time
    pub tap_processing_duration: Histogram,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let matchmaking_metrics = MatchmakingMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let result_metrics = ResultMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            matchmaking_metrics,
            session_metrics,
            result_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get matchmaking metrics
    pub fn matchmaking(&self) -> &MatchmakingMetrics {
        &self.matchmaking_metrics
    }

    /// Get session metrics
    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    /// Get result persistence metrics
    pub fn results(&self) -> &ResultMetrics {
        &self.result_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Update gauges from race manager stats
    ///
    /// Counters are incremented at the recording sites; this only syncs the
    /// current-state gauges, so it is safe to call periodically.
    pub fn update_from_manager_stats(&self, stats: &RaceManagerStats) {
        self.session_metrics
            .active_sessions
            .set(stats.active_sessions as i64);

        self.matchmaking_metrics
            .players_waiting
            .set(stats.players_waiting as i64);
    }

    /// Record a processed command and its duration
    pub fn record_command(&self, command: &str, duration: Duration) {
        self.performance_metrics
            .command_processing_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    /// Record a match being formed, with each player's queue wait
    pub fn record_match_found(&self, wait_times: &[Duration]) {
        self.matchmaking_metrics.matches_found_total.inc();

        for wait in wait_times {
            self.matchmaking_metrics
                .queue_wait_time_seconds
                .observe(wait.as_secs_f64());
        }
    }

    /// Record a waiting ticket being replaced by a repeat request
    pub fn record_requeue(&self) {
        self.matchmaking_metrics.requeues_total.inc();
    }

    /// Record a waiting ticket being cancelled
    pub fn record_cancellation(&self, reason: &str) {
        self.matchmaking_metrics
            .cancellations_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record a race entering the racing phase
    pub fn record_race_started(&self) {
        self.session_metrics.races_started_total.inc();
    }

    /// Record a race finishing with a winner
    pub fn record_race_finished(&self, duration: Duration) {
        self.session_metrics.races_finished_total.inc();
        self.session_metrics
            .race_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record how far the losing player got when a race ended
    pub fn record_runner_up_position(&self, position: f64) {
        self.session_metrics.runner_up_position.observe(position);
    }

    /// Record a race abandoned before finishing
    pub fn record_race_abandoned(&self, reason: &str) {
        self.session_metrics
            .races_abandoned_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record one tap being applied
    pub fn record_tap(&self, duration: Duration) {
        self.session_metrics.taps_total.inc();
        self.performance_metrics
            .tap_processing_duration
            .observe(duration.as_secs_f64());
    }

    /// Record finished sessions swept by the cleanup task
    pub fn record_sessions_cleaned(&self, count: u64) {
        self.session_metrics.sessions_cleaned_total.inc_by(count);
    }

    /// Record a result submission to the persistence queue
    pub fn record_result_submitted(&self, accepted: bool) {
        if accepted {
            self.result_metrics.results_submitted_total.inc();
        } else {
            self.result_metrics.results_dropped_total.inc();
        }
    }

    /// Record a failed store write
    pub fn record_persistence_failure(&self) {
        self.result_metrics.persistence_failures_total.inc();
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("starting_grid_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "starting_grid_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("starting_grid_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "starting_grid_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("starting_grid_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl MatchmakingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_waiting = IntGauge::new(
            "starting_grid_players_waiting",
            "Players currently waiting in the matchmaking queue",
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let matches_found_total = IntCounter::new(
            "starting_grid_matches_found_total",
            "Total matches formed",
        )?;
        registry.register(Box::new(matches_found_total.clone()))?;

        let requeues_total = IntCounter::new(
            "starting_grid_requeues_total",
            "Waiting tickets replaced by repeat find-match requests",
        )?;
        registry.register(Box::new(requeues_total.clone()))?;

        let cancellations_total = IntCounterVec::new(
            Opts::new(
                "starting_grid_cancellations_total",
                "Waiting tickets cancelled",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let queue_wait_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "starting_grid_queue_wait_time_seconds",
                "Time spent waiting in the queue before a match",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(queue_wait_time_seconds.clone()))?;

        Ok(Self {
            players_waiting,
            matches_found_total,
            requeues_total,
            cancellations_total,
            queue_wait_time_seconds,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_sessions = IntGauge::new(
            "starting_grid_active_sessions",
            "Current number of live race sessions",
        )?;
        registry.register(Box::new(active_sessions.clone()))?;

        let races_started_total = IntCounter::new(
            "starting_grid_races_started_total",
            "Total races that reached the racing phase",
        )?;
        registry.register(Box::new(races_started_total.clone()))?;

        let races_finished_total = IntCounter::new(
            "starting_grid_races_finished_total",
            "Total races finished with a winner",
        )?;
        registry.register(Box::new(races_finished_total.clone()))?;

        let races_abandoned_total = IntCounterVec::new(
            Opts::new(
                "starting_grid_races_abandoned_total",
                "Races abandoned before finishing",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(races_abandoned_total.clone()))?;

        let taps_total = IntCounter::new(
            "starting_grid_taps_total",
            "Total taps applied to racing sessions",
        )?;
        registry.register(Box::new(taps_total.clone()))?;

        let sessions_cleaned_total = IntCounter::new(
            "starting_grid_sessions_cleaned_total",
            "Finished sessions swept after retention",
        )?;
        registry.register(Box::new(sessions_cleaned_total.clone()))?;

        let race_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "starting_grid_race_duration_seconds",
                "Race duration from start signal to finish",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 15.0, 20.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(race_duration_seconds.clone()))?;

        let runner_up_position = Histogram::with_opts(
            HistogramOpts::new(
                "starting_grid_runner_up_position",
                "Final position of the losing player when the race ended",
            )
            .buckets(vec![10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0, 100.0]),
        )?;
        registry.register(Box::new(runner_up_position.clone()))?;

        Ok(Self {
            active_sessions,
            races_started_total,
            races_finished_total,
            races_abandoned_total,
            taps_total,
            sessions_cleaned_total,
            race_duration_seconds,
            runner_up_position,
        })
    }
}

impl ResultMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let results_submitted_total = IntCounter::new(
            "starting_grid_results_submitted_total",
            "Results accepted onto the persistence queue",
        )?;
        registry.register(Box::new(results_submitted_total.clone()))?;

        let results_dropped_total = IntCounter::new(
            "starting_grid_results_dropped_total",
            "Results dropped because the persistence queue was full",
        )?;
        registry.register(Box::new(results_dropped_total.clone()))?;

        let persistence_failures_total = IntCounter::new(
            "starting_grid_persistence_failures_total",
            "Store writes that failed",
        )?;
        registry.register(Box::new(persistence_failures_total.clone()))?;

        Ok(Self {
            results_submitted_total,
            results_dropped_total,
            persistence_failures_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let command_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "starting_grid_command_processing_duration_seconds",
                "Command processing time",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["command"],
        )?;
        registry.register(Box::new(command_processing_duration.clone()))?;

        let tap_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "starting_grid_tap_processing_duration_seconds",
                "Tap application time",
            )
            .buckets(vec![0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )?;
        registry.register(Box::new(tap_processing_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "starting_grid_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            command_processing_duration,
            tap_processing_duration,
            amqp_operation_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
