use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::db::PgTelemetryStore;
use crate::errors::{Error, Result};
use crate::memory::MemoryTelemetryStore;
use crate::model::TelemetryRecord;

pub const MEMORY_URL_SCHEME: &str = "memory://";

/// The only boundary through which telemetry is written or read.
///
/// Callers must go through the storage lifecycle's readiness gate before
/// touching a store; implementations do not re-check readiness.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Persists `record` as a single atomic write and returns the new id.
    async fn insert(&self, record: &TelemetryRecord) -> Result<Uuid>;

    /// Returns the most recently received records, newest first. `None` or a
    /// non-positive limit selects the configured default; the configured
    /// maximum is never exceeded.
    async fn query_recent(&self, limit: Option<i64>) -> Result<Vec<TelemetryRecord>>;
}

/// Opens the store selected by the connection string.
pub async fn open(config: &Config) -> Result<Arc<dyn TelemetryStore>> {
    let url = config.database_url.as_str();

    if url.starts_with(MEMORY_URL_SCHEME) {
        return Ok(Arc::new(MemoryTelemetryStore::new(config.query_limits())));
    }

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PgTelemetryStore::connect(config).await?;
        return Ok(Arc::new(store));
    }

    Err(Error::Config(format!(
        "unsupported storage URL scheme in {}",
        config.redacted_database_url()
    )))
}
