use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One normalized sensor reading.
///
/// Built once by the normalizer and never modified afterwards. `id` stays
/// `None` until the store assigns one on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub device_identifier: String,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub device_timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,
}

impl TelemetryRecord {
    /// Returns a copy carrying the identifier assigned by the store.
    pub fn with_id(&self, id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }
}

/// Response for a stored reading
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub id: Uuid,
}

/// Response wrapper for the most recent readings
#[derive(Debug, Serialize, Deserialize)]
pub struct RecentResponse {
    pub ok: bool,
    pub count: usize,
    pub data: Vec<TelemetryRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}
