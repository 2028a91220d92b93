use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{Error, Result};
use crate::lifecycle::StorageLifecycle;
use crate::metrics::{
    DB_FAILURES_TOTAL, INSERT_LATENCY_SECONDS, NOT_READY_TOTAL, QUERY_LATENCY_SECONDS,
    TELEMETRY_RECEIVED_TOTAL, TELEMETRY_REJECTED_TOTAL, TELEMETRY_STORED_TOTAL,
};
use crate::model::TelemetryRecord;
use crate::normalize::Normalizer;
use crate::store::TelemetryStore;
use crate::validate::{parse_body, validate};

fn ready_store(lifecycle: &StorageLifecycle) -> Result<Arc<dyn TelemetryStore>> {
    lifecycle.handle().ok_or_else(|| {
        NOT_READY_TOTAL.inc();
        warn!(state = %lifecycle.state(), "Request refused, storage not ready");
        Error::NotReady
    })
}

/// The write path: readiness gate, validation, normalization, insert.
pub struct IngestionService {
    lifecycle: Arc<StorageLifecycle>,
    normalizer: Normalizer,
    clock: Arc<dyn Clock>,
}

impl IngestionService {
    pub fn new(
        lifecycle: Arc<StorageLifecycle>,
        normalizer: Normalizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lifecycle,
            normalizer,
            clock,
        }
    }

    /// Stores one reading and returns its id.
    #[instrument(skip_all)]
    pub async fn ingest(&self, body: Value) -> Result<Uuid> {
        TELEMETRY_RECEIVED_TOTAL.inc();
        let store = ready_store(&self.lifecycle)?;
        let received_at = self.clock.now();
        self.store_reading(store.as_ref(), body, received_at).await
    }

    /// Same as [`IngestionService::ingest`] for an undecoded request body.
    /// Readiness is checked before the body is looked at.
    #[instrument(skip_all, fields(size = bytes.len()))]
    pub async fn ingest_bytes(&self, bytes: &[u8]) -> Result<Uuid> {
        TELEMETRY_RECEIVED_TOTAL.inc();
        let store = ready_store(&self.lifecycle)?;
        let received_at = self.clock.now();
        let body = parse_body(bytes).map_err(|e| {
            TELEMETRY_REJECTED_TOTAL.inc();
            warn!(error = %e, "Telemetry rejected");
            e
        })?;
        self.store_reading(store.as_ref(), body, received_at).await
    }

    async fn store_reading(
        &self,
        store: &dyn TelemetryStore,
        body: Value,
        received_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        debug!(payload = %body, "Telemetry received");

        let reading = validate(&body).map_err(|e| {
            TELEMETRY_REJECTED_TOTAL.inc();
            warn!(error = %e, "Telemetry rejected");
            e
        })?;
        let record = self.normalizer.normalize(reading, body, received_at);

        let start = Instant::now();
        match store.insert(&record).await {
            Ok(id) => {
                INSERT_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                TELEMETRY_STORED_TOTAL.inc();
                info!(%id, device = %record.device_identifier, "Telemetry stored");
                Ok(id)
            }
            Err(e) => {
                DB_FAILURES_TOTAL.inc();
                error!(error = %e, device = %record.device_identifier, "Failed to store telemetry");
                Err(e)
            }
        }
    }
}

/// The read path: readiness gate, then the most recent records.
pub struct QueryService {
    lifecycle: Arc<StorageLifecycle>,
}

impl QueryService {
    pub fn new(lifecycle: Arc<StorageLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// `limit` is the raw query parameter; anything that is not an integer
    /// falls back to the default.
    #[instrument(skip(self))]
    pub async fn recent(&self, limit: Option<&str>) -> Result<Vec<TelemetryRecord>> {
        let store = ready_store(&self.lifecycle)?;

        let start = Instant::now();
        match store.query_recent(parse_limit(limit)).await {
            Ok(records) => {
                QUERY_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                debug!(count = records.len(), "Recent telemetry fetched");
                Ok(records)
            }
            Err(e) => {
                DB_FAILURES_TOTAL.inc();
                error!(error = %e, "Failed to query telemetry");
                Err(e)
            }
        }
    }
}

fn parse_limit(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
}
