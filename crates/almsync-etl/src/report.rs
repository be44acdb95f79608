//! Per-entity and per-run outcome summaries.

use crate::reconcile::ReconcileReport;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityReport {
    pub entity: String,
    pub table: String,
    /// Records received from the ALM.
    pub fetched: usize,
    /// Records dropped because a field could not be projected.
    pub skipped: usize,
    /// Records dropped because their ObjectID already arrived in this run.
    pub duplicates: usize,
    /// Rows bulk-loaded (snapshot tables).
    pub loaded: u64,
    /// Reconciliation counters (versioned tables).
    pub reconcile: Option<ReconcileReport>,
    pub fetch_time: Duration,
    pub stage_time: Duration,
    pub load_time: Duration,
}

impl EntityReport {
    pub fn new(entity: &str, table: &str) -> Self {
        Self {
            entity: entity.to_string(),
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn total_time(&self) -> Duration {
        self.fetch_time + self.stage_time + self.load_time
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub entities: Vec<EntityReport>,
    /// `(entity, error message)` of every entity that failed.
    pub failures: Vec<(String, String)>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn entity(&self, name: &str) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.entity == name)
    }

    pub fn skipped_records(&self) -> usize {
        self.entities.iter().map(|e| e.skipped).sum()
    }
}
