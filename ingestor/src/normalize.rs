use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::TelemetryRecord;
use crate::validate::ValidatedReading;

/// Turns validated readings into records. Whether the raw body is kept is a
/// deployment setting, fixed for the lifetime of the normalizer.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    retain_raw_payload: bool,
}

impl Normalizer {
    pub fn new(retain_raw_payload: bool) -> Self {
        Self { retain_raw_payload }
    }

    /// Builds the record for `reading`. `received_at` is the clock reading the
    /// caller took when the request was admitted; a missing device timestamp
    /// falls back to it.
    pub fn normalize(
        &self,
        reading: ValidatedReading,
        body: Value,
        received_at: DateTime<Utc>,
    ) -> TelemetryRecord {
        TelemetryRecord {
            id: None,
            device_identifier: reading.device_identifier,
            temperature: reading.temperature,
            humidity: reading.humidity,
            device_timestamp: reading.timestamp.unwrap_or(received_at),
            received_at,
            raw_payload: self.retain_raw_payload.then_some(body),
        }
    }
}
