//! Health check HTTP server
//!
//! Provides liveness and readiness probes for process supervision and a
//! Prometheus text endpoint with reconciliation counters.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{LoyaltyError, Result};
use crate::services::pending::PendingQueue;
use crate::services::worker::{AccrualStats, AccrualStatsSnapshot};

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub pending_orders: usize,
    pub in_flight_orders: usize,
    pub accrual: AccrualStatsSnapshot,
}

/// Shared state for health server
pub struct HealthState {
    /// When the server started
    pub started_at: DateTime<Utc>,
    /// Is database reachable
    pub db_connected: AtomicBool,
    /// Last database check timestamp
    pub last_db_check: RwLock<Option<DateTime<Utc>>>,
    /// Reconciliation counters
    pub stats: Option<Arc<AccrualStats>>,
    /// Queue drained by the workers
    pub queue: Option<Arc<PendingQueue>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            db_connected: AtomicBool::new(false),
            last_db_check: RwLock::new(None),
            stats: None,
            queue: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<AccrualStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_queue(mut self, queue: Arc<PendingQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Record database check
    pub async fn record_db_check(&self, success: bool) {
        *self.last_db_check.write().await = Some(Utc::now());
        self.db_connected.store(success, Ordering::SeqCst);
    }

    fn stats_snapshot(&self) -> AccrualStatsSnapshot {
        self.stats
            .as_ref()
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let mut components = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        // Database health
        let db_connected = self.db_connected.load(Ordering::SeqCst);
        let db_status = if db_connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        if db_status == HealthStatus::Unhealthy {
            overall_status = HealthStatus::Unhealthy;
        }
        components.push(ComponentHealth {
            name: "database".to_string(),
            status: db_status,
            message: if !db_connected {
                Some("Unreachable".to_string())
            } else {
                None
            },
            last_check: *self.last_db_check.read().await,
        });

        // Reconciliation health
        let (accrual_status, message) = match self.queue {
            Some(ref queue) if queue.is_stopped() => {
                (HealthStatus::Unhealthy, Some("Stopped".to_string()))
            }
            Some(ref queue) => (
                HealthStatus::Healthy,
                Some(format!("{} pending, {} in flight", queue.len(), queue.in_flight())),
            ),
            None => (HealthStatus::Degraded, Some("Not started".to_string())),
        };
        if accrual_status == HealthStatus::Unhealthy {
            overall_status = HealthStatus::Unhealthy;
        } else if accrual_status == HealthStatus::Degraded && overall_status == HealthStatus::Healthy
        {
            overall_status = HealthStatus::Degraded;
        }
        components.push(ComponentHealth {
            name: "accrual".to_string(),
            status: accrual_status,
            message,
            last_check: Some(Utc::now()),
        });

        let uptime = (Utc::now() - self.started_at).num_seconds().max(0) as u64;

        HealthResponse {
            status: overall_status,
            timestamp: Utc::now(),
            uptime_seconds: uptime,
            components,
            pending_orders: self.queue.as_ref().map(|q| q.len()).unwrap_or(0),
            in_flight_orders: self.queue.as_ref().map(|q| q.in_flight()).unwrap_or(0),
            accrual: self.stats_snapshot(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    address: String,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, address: impl Into<String>) -> Self {
        Self {
            state,
            address: address.into(),
        }
    }

    pub fn router(state: Arc<HealthState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Serve until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let app = Self::router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&self.address).await?;
        info!("Starting health server on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| LoyaltyError::Internal(format!("Health server error: {}", e)))?;

        Ok(())
    }

    /// Get shared state for updating from other components
    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe - is the process alive?
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe - can the service do useful work?
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let db_connected = if state.db_connected.load(Ordering::SeqCst) {
        1
    } else {
        0
    };
    let health_status = match health.status {
        HealthStatus::Healthy => 1,
        HealthStatus::Degraded => 0,
        HealthStatus::Unhealthy => -1,
    };
    let stats = health.accrual;

    let metrics = format!(
        r#"# HELP loyalty_up Health status (1=healthy, 0=degraded, -1=unhealthy)
# TYPE loyalty_up gauge
loyalty_up {}

# HELP loyalty_uptime_seconds Uptime in seconds
# TYPE loyalty_uptime_seconds counter
loyalty_uptime_seconds {}

# HELP loyalty_database_connected Database connection status
# TYPE loyalty_database_connected gauge
loyalty_database_connected {}

# HELP loyalty_pending_orders Orders waiting for a worker
# TYPE loyalty_pending_orders gauge
loyalty_pending_orders {}

# HELP loyalty_in_flight_orders Orders held by a worker
# TYPE loyalty_in_flight_orders gauge
loyalty_in_flight_orders {}

# HELP loyalty_accrual_polls_total Pending order scans
# TYPE loyalty_accrual_polls_total counter
loyalty_accrual_polls_total {}

# HELP loyalty_accrual_resolved_total Orders advanced from provider responses
# TYPE loyalty_accrual_resolved_total counter
loyalty_accrual_resolved_total {}

# HELP loyalty_accrual_rate_limited_total Rate-limited provider responses
# TYPE loyalty_accrual_rate_limited_total counter
loyalty_accrual_rate_limited_total {}

# HELP loyalty_accrual_failures_total Failed provider lookups and storage writes
# TYPE loyalty_accrual_failures_total counter
loyalty_accrual_failures_total {}
"#,
        health_status,
        health.uptime_seconds,
        db_connected,
        health.pending_orders,
        health.in_flight_orders,
        stats.polls,
        stats.resolved,
        stats.rate_limited,
        stats.failures,
    );

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        metrics,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, OrderId, OrderNumber, UserId};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn ready_state() -> HealthState {
        HealthState::new()
            .with_stats(Arc::new(AccrualStats::default()))
            .with_queue(Arc::new(PendingQueue::new()))
    }

    fn order(id: i64) -> Order {
        let mut order = Order::new(OrderNumber::new(id.to_string()), UserId(1));
        order.id = OrderId(id);
        order
    }

    #[tokio::test]
    async fn test_unhealthy_until_database_checked() {
        let state = ready_state();
        assert_eq!(state.get_health().await.status, HealthStatus::Unhealthy);

        state.record_db_check(true).await;
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.components.len(), 2);
    }

    #[tokio::test]
    async fn test_stopped_queue_is_unhealthy() {
        let state = ready_state();
        state.record_db_check(true).await;
        if let Some(queue) = &state.queue {
            queue.stop();
        }
        assert_eq!(state.get_health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_endpoint() {
        let state = Arc::new(ready_state());
        let app = HealthServer::router(state.clone());

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.record_db_check(true).await;
        let resp = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = Arc::new(ready_state());
        state.record_db_check(true).await;
        if let Some(queue) = &state.queue {
            queue.enqueue(vec![order(1), order(2)]);
            queue.dequeue().await.unwrap();
        }
        let app = HealthServer::router(state);

        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("loyalty_up 1"));
        assert!(text.contains("loyalty_accrual_polls_total 0"));
        assert!(text.contains("loyalty_pending_orders 1"));
        assert!(text.contains("loyalty_in_flight_orders 1"));
    }
}
