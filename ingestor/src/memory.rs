use async_trait::async_trait;
use std::sync::RwLock;
use uuid::Uuid;

use crate::config::QueryLimits;
use crate::errors::Result;
use crate::model::TelemetryRecord;
use crate::store::TelemetryStore;

/// In-process store with the same ordering and limit semantics as the
/// Postgres store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    records: RwLock<Vec<TelemetryRecord>>,
    limits: QueryLimits,
}

impl MemoryTelemetryStore {
    pub fn new(limits: QueryLimits) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn insert(&self, record: &TelemetryRecord) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.with_id(id));
        Ok(id)
    }

    async fn query_recent(&self, limit: Option<i64>) -> Result<Vec<TelemetryRecord>> {
        let limit = self.limits.resolve(limit) as usize;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());

        // Later inserts win ties on received_at, like the seq column in Postgres.
        let mut recent: Vec<TelemetryRecord> = records.iter().rev().cloned().collect();
        recent.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        recent.truncate(limit);
        Ok(recent)
    }
}
