use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::error;

use crate::clock::Clock;
use crate::errors::Error;
use crate::lifecycle::{LifecycleState, StorageLifecycle};
use crate::model::{ErrorResponse, HealthResponse, IngestResponse, PingResponse, RecentResponse};
use crate::normalize::Normalizer;
use crate::service::{IngestionService, QueryService};

pub const HEALTH_TEXT: &str = "MST01 backend OK";
pub const NOT_READY_MESSAGE: &str = "not initialized";
const STORE_FAILURE_MESSAGE: &str = "error storing telemetry";
const QUERY_FAILURE_MESSAGE: &str = "error querying telemetry";

#[derive(Clone)]
pub struct AppState {
    lifecycle: Arc<StorageLifecycle>,
    ingestion: Arc<IngestionService>,
    query: Arc<QueryService>,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<StorageLifecycle>,
        normalizer: Normalizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ingestion: Arc::new(IngestionService::new(lifecycle.clone(), normalizer, clock)),
            query: Arc::new(QueryService::new(lifecycle.clone())),
            lifecycle,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/telemetry", post(post_telemetry))
        .route("/api/telemetry/ping", get(ping))
        .route("/api/telemetry/last", get(last_telemetry))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    HEALTH_TEXT
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        ok: true,
        message: "telemetry API up".to_string(),
    })
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        storage: None,
    })
}

async fn readyz(State(state): State<AppState>) -> Response {
    let storage = state.lifecycle.state();
    if storage == LifecycleState::Ready {
        return Json(HealthResponse {
            status: "ok".to_string(),
            storage: Some(storage.to_string()),
        })
        .into_response();
    }

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthResponse {
            status: "not_ready".to_string(),
            storage: Some(storage.to_string()),
        }),
    )
        .into_response()
}

async fn post_telemetry(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let id = state
        .ingestion
        .ingest_bytes(&body)
        .await
        .map_err(|e| ApiError::new(e, STORE_FAILURE_MESSAGE))?;

    Ok((StatusCode::CREATED, Json(IngestResponse { ok: true, id })))
}

async fn last_telemetry(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<RecentResponse>, ApiError> {
    let data = state
        .query
        .recent(params.get("limit").map(String::as_str))
        .await
        .map_err(|e| ApiError::new(e, QUERY_FAILURE_MESSAGE))?;

    Ok(Json(RecentResponse {
        ok: true,
        count: data.len(),
        data,
    }))
}

/// Maps a crate error to the `{ok:false, error}` envelope. Storage details
/// are logged here and replaced by `failure` in the response.
pub struct ApiError {
    error: Error,
    failure: &'static str,
}

impl ApiError {
    pub fn new(error: Error, failure: &'static str) -> Self {
        Self { error, failure }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.error {
            Error::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Error::NotReady => (StatusCode::SERVICE_UNAVAILABLE, NOT_READY_MESSAGE.to_string()),
            other => {
                error!("API error: {}: {}", self.failure, other);
                (StatusCode::INTERNAL_SERVER_ERROR, self.failure.to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                ok: false,
                error: message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ValidationError;
    use axum::body::to_bytes;

    async fn render(error: ApiError) -> (StatusCode, ErrorResponse) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_error_is_bad_request() {
        let (status, body) = render(ApiError::new(
            ValidationError::MissingField("deviceIdentifier").into(),
            STORE_FAILURE_MESSAGE,
        ))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.ok);
        assert_eq!(body.error, "missing required field 'deviceIdentifier'");
    }

    #[tokio::test]
    async fn test_not_ready_is_service_unavailable() {
        let (status, body) = render(ApiError::new(Error::NotReady, QUERY_FAILURE_MESSAGE)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error, NOT_READY_MESSAGE);
    }

    #[tokio::test]
    async fn test_storage_error_is_generic() {
        let (status, body) = render(ApiError::new(
            Error::Database(sqlx::Error::Protocol("relation does not exist".to_string())),
            STORE_FAILURE_MESSAGE,
        ))
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, STORE_FAILURE_MESSAGE);
        assert!(!body.error.contains("relation"));
    }
}
