//! Snapshot reconciliation for versioned tables.
//!
//! Per object, per cycle:
//!
//! ```text
//!   no open row ─────────────────────────► insert (valid_from = now)
//!   open row, all tracked columns equal ──► nothing
//!   open row, any tracked column differs ─► close (valid_to = now) + insert
//! ```
//!
//! An object is handled at most once per cycle, so a record served twice by
//! overlapping pages cannot open a second row. The cycle is one transaction.
//! Concurrent cycles on the same table are not coordinated: runs must be
//! serialized by whoever schedules them.

use crate::Result;
use almsync_schema::{StagedRow, TableLayout};
use almsync_store::Warehouse;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Objects seen for the first time.
    pub inserted: usize,
    /// Objects whose open row was closed and replaced.
    pub revised: usize,
    pub unchanged: usize,
    /// Repeated records of an object already handled this cycle.
    pub duplicates: usize,
}

impl ReconcileReport {
    /// Rows written this cycle.
    pub fn rows_written(&self) -> usize {
        self.inserted + self.revised
    }
}

/// Reconcile `rows` against the open rows of `layout`'s table at time `now`.
///
/// All closes and inserts are committed together; on error nothing is.
pub fn reconcile<I>(
    warehouse: &mut dyn Warehouse,
    layout: &TableLayout,
    rows: I,
    now: DateTime<Utc>,
) -> Result<ReconcileReport>
where
    I: IntoIterator<Item = StagedRow>,
{
    let mut tx = warehouse.begin_cycle(layout)?;
    let mut report = ReconcileReport::default();
    let mut seen = HashSet::new();

    for row in rows {
        if !seen.insert(row.object_id) {
            tracing::warn!(table = %layout.table, object_id = row.object_id, "record repeated within cycle; ignored");
            report.duplicates += 1;
            continue;
        }

        let Some(open) = tx.open_row(row.object_id)? else {
            tx.insert_row(&row, now)?;
            report.inserted += 1;
            continue;
        };

        let changed = layout
            .tracked()
            .find(|c| !open.value(&c.name).same_as(row.value(&c.name), c.sql_type));
        match changed {
            Some(column) => {
                tracing::debug!(
                    table = %layout.table,
                    object_id = row.object_id,
                    column = %column.name,
                    "revising snapshot"
                );
                tx.close_row(open.snapshot_id, now)?;
                tx.insert_row(&row, now)?;
                report.revised += 1;
            }
            None => report.unchanged += 1,
        }
    }

    tx.commit()?;
    tracing::info!(
        table = %layout.table,
        inserted = report.inserted,
        revised = report.revised,
        unchanged = report.unchanged,
        duplicates = report.duplicates,
        "reconciled"
    );
    Ok(report)
}
