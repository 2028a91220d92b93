use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Config, QueryLimits};
use crate::errors::{Error, Result};
use crate::model::TelemetryRecord;
use crate::store::TelemetryStore;

pub async fn make_pool(config: &Config) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");
    Ok(pool)
}

/// Postgres-backed telemetry store. One row per record.
#[derive(Debug, Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
    table: String,
    limits: QueryLimits,
}

impl PgTelemetryStore {
    /// `table` must already be a validated identifier; it is interpolated
    /// into the statements.
    pub fn new(pool: PgPool, table: impl Into<String>, limits: QueryLimits) -> Self {
        Self {
            pool,
            table: table.into(),
            limits,
        }
    }

    /// Connects, retrying transient failures with exponential backoff, then
    /// makes sure the table exists.
    pub async fn connect(config: &Config) -> Result<Self> {
        let max_attempts = config.connect_attempts.max(1);
        let mut attempts = 0;

        let pool = loop {
            attempts += 1;
            match make_pool(config).await {
                Ok(pool) => break pool,
                Err(Error::Database(db_err))
                    if attempts < max_attempts && is_transient_error(&db_err) =>
                {
                    let wait_ms = backoff_ms(attempts);
                    warn!(
                        "Database connection failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, max_attempts, wait_ms, db_err
                    );
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => {
                    error!(
                        "Database connection failed permanently after {} attempts: {}",
                        attempts, e
                    );
                    return Err(e);
                }
            }
        };

        let store = Self::new(pool, config.table.clone(), config.query_limits());
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates the table and its recency index when missing. Existing tables
    /// are left untouched.
    pub async fn ensure_schema(&self) -> Result<()> {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                seq BIGSERIAL NOT NULL,
                id UUID PRIMARY KEY,
                device_identifier TEXT NOT NULL,
                temperature DOUBLE PRECISION NOT NULL,
                humidity DOUBLE PRECISION,
                device_timestamp TIMESTAMPTZ NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                raw_payload JSONB
            )
            "#,
            table = self.table
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_received_at_idx ON {table} (received_at DESC, seq DESC)",
            table = self.table
        );

        sqlx::query(&create_table).execute(&self.pool).await?;
        sqlx::query(&create_index).execute(&self.pool).await?;
        info!("Table {} ready", self.table);
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn insert(&self, record: &TelemetryRecord) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let query = format!(
            r#"
            INSERT INTO {} (id, device_identifier, temperature, humidity, device_timestamp, received_at, raw_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            self.table
        );

        sqlx::query(&query)
            .bind(id)
            .bind(&record.device_identifier)
            .bind(record.temperature)
            .bind(record.humidity)
            .bind(record.device_timestamp)
            .bind(record.received_at)
            .bind(record.raw_payload.as_ref().map(jsonb_safe))
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn query_recent(&self, limit: Option<i64>) -> Result<Vec<TelemetryRecord>> {
        let query = format!(
            "SELECT id, device_identifier, temperature, humidity, device_timestamp, received_at, raw_payload
             FROM {}
             ORDER BY received_at DESC, seq DESC
             LIMIT $1",
            self.table
        );

        let records = sqlx::query_as::<_, TelemetryRecord>(&query)
            .bind(self.limits.resolve(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }
}

/// Delay before retry number `attempt` (1-based): 100ms doubling up to 3.2s.
fn backoff_ms(attempt: u32) -> u64 {
    100 * 2_u64.pow(attempt.saturating_sub(1).min(5))
}

/// JSONB cannot hold U+0000, in keys or in string values. Each NUL is
/// replaced with U+FFFD so the rest of the payload survives.
fn jsonb_safe(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(replace_nul(s)),
        Value::Array(items) => Value::Array(items.iter().map(jsonb_safe).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, v)| (replace_nul(key), jsonb_safe(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn replace_nul(s: &str) -> String {
    if s.contains('\0') {
        s.replace('\0', "\u{FFFD}")
    } else {
        s.to_string()
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
