//! Liveness and readiness probes. Served outside the API prefix.

use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use serde::Serialize;
use std::time::Instant;
use tracing::warn;
use utoipa::ToSchema;

use crate::{db::with_conn, error::ApiError, AppState};

pub const SERVICE_NAME: &str = "kadacare-auth";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: &'static str,
    #[schema(example = "kadacare-auth")]
    pub service: &'static str,
    #[schema(example = "0.1.0")]
    pub version: &'static str,
    #[schema(example = "2024-11-01T08:30:00Z")]
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessResponse {
    #[schema(example = "ready")]
    pub status: &'static str,
    pub database: DatabaseStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DatabaseStatus {
    #[schema(example = "up")]
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 3)]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_idle: Option<u32>,
}

impl DatabaseStatus {
    fn up(latency_ms: u64, pool_idle: u32) -> Self {
        Self {
            status: "up",
            latency_ms: Some(latency_ms),
            pool_idle: Some(pool_idle),
        }
    }

    fn down() -> Self {
        Self {
            status: "down",
            latency_ms: None,
            pool_idle: None,
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

#[utoipa::path(
    get,
    path = "/health/status",
    tag = "Health",
    responses(
        (status = 200, description = "Service metadata", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Plain text probe", content_type = "text/plain")
    )
)]
pub async fn health_check_simple() -> &'static str {
    "OK"
}

#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Database reachable", body = ReadinessResponse),
        (status = 503, description = "Database unreachable", body = ReadinessResponse)
    )
)]
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = check_database(&state).await;

    if database.is_up() {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                database,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database,
            }),
        )
    }
}

async fn check_database(state: &AppState) -> DatabaseStatus {
    let started = Instant::now();
    let result = with_conn(&state.db_pool, |conn| {
        diesel::sql_query("SELECT 1")
            .execute(conn)
            .map_err(ApiError::from)
    })
    .await;

    match result {
        Ok(_) => DatabaseStatus::up(
            started.elapsed().as_millis() as u64,
            state.db_pool.state().idle_connections,
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            DatabaseStatus::down()
        }
    }
}

#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive")
    )
)]
pub async fn live_check() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_status_shapes() {
        let up = serde_json::to_value(DatabaseStatus::up(4, 2)).unwrap();
        assert_eq!(up["status"], "up");
        assert_eq!(up["latency_ms"], 4);

        let down = serde_json::to_value(DatabaseStatus::down()).unwrap();
        assert_eq!(down["status"], "down");
        assert!(down.get("latency_ms").is_none());
    }

    #[tokio::test]
    async fn test_health_check_reports_service() {
        let Json(response) = health_check().await;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.service, SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_health_check_simple() {
        assert_eq!(health_check_simple().await, "OK");
    }
}
