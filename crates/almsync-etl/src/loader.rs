//! Per-entity driver for `create` and `update` runs.

use crate::catalog::EntitySchema;
use crate::context::RunContext;
use crate::project::project;
use crate::reconcile::reconcile;
use crate::report::{EntityReport, RunReport};
use crate::stage::stage;
use crate::{EtlError, Result};
use almsync_schema::{StagedRow, StateLabels, TableMode};
use almsync_store::Warehouse;
use almsync_wsapi::AlmError;
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create the tables, then load.
    Create,
    /// Load into existing tables.
    Update,
}

impl FromStr for Action {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            other => Err(EtlError::Config(crate::ConfigError::Invalid(format!(
                "unknown action `{other}` (expected create or update)"
            )))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
        })
    }
}

/// Load every configured entity.
///
/// A failing entity is logged and recorded in the report; the remaining
/// entities are still loaded.
pub fn run(ctx: &mut RunContext<'_>, warehouse: &mut dyn Warehouse, action: Action) -> RunReport {
    let started = Instant::now();
    let mut report = RunReport::default();

    for entity in ctx.settings.entities.clone() {
        let span = tracing::info_span!("entity", %entity, %action);
        let _guard = span.enter();
        match run_entity(ctx, warehouse, &entity, action) {
            Ok(entity_report) => {
                tracing::info!(
                    fetched = entity_report.fetched,
                    skipped = entity_report.skipped,
                    duplicates = entity_report.duplicates,
                    elapsed_ms = entity_report.total_time().as_millis() as u64,
                    "entity done"
                );
                report.entities.push(entity_report);
            }
            Err(e) => {
                tracing::error!(error = %e, "entity failed; continuing with the next one");
                report.failures.push((entity, e.to_string()));
            }
        }
    }

    report.elapsed = started.elapsed();
    tracing::info!(
        entities = report.entities.len(),
        failures = report.failures.len(),
        skipped_records = report.skipped_records(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "run finished"
    );
    report
}

pub fn run_entity(
    ctx: &mut RunContext<'_>,
    warehouse: &mut dyn Warehouse,
    entity: &str,
    action: Action,
) -> Result<EntityReport> {
    let schema = ctx.schema(entity)?;
    let layout = &schema.plan.layout;
    let mut report = EntityReport::new(entity, &layout.table);

    if action == Action::Create {
        warehouse.apply_ddl(&schema.plan.ops)?;
        tracing::info!(table = %layout.table, statements = schema.plan.ops.len(), "table created");
    }

    let started = Instant::now();
    let rows = fetch_rows(ctx, &schema, &mut report)?;
    report.fetch_time = started.elapsed();
    tracing::info!(
        records = report.fetched,
        elapsed_ms = report.fetch_time.as_millis() as u64,
        "fetched from ALM"
    );

    match layout.mode {
        TableMode::Snapshot => {
            let started = Instant::now();
            let staged = stage(layout, &rows, ctx.settings.staging_dir.as_deref())?;
            report.stage_time = started.elapsed();

            let started = Instant::now();
            let truncate = action == Action::Update;
            report.loaded = warehouse.reload(layout, &mut staged.as_slice(), truncate)?;
            report.load_time = started.elapsed();
            tracing::info!(
                table = %layout.table,
                rows = report.loaded,
                elapsed_ms = report.load_time.as_millis() as u64,
                "bulk loaded"
            );
        }
        TableMode::Versioned => {
            let started = Instant::now();
            report.reconcile = Some(reconcile(warehouse, layout, rows, Utc::now())?);
            report.load_time = started.elapsed();
        }
    }
    Ok(report)
}

/// Fetch and project the records of one entity.
///
/// Records that fail projection are logged, counted in `report.skipped` and
/// dropped. A record whose ObjectID was already seen in this fetch is counted
/// in `report.duplicates` and dropped; the first occurrence wins. Transport
/// failures end the entity.
pub fn fetch_rows(
    ctx: &mut RunContext<'_>,
    schema: &EntitySchema,
    report: &mut EntityReport,
) -> Result<Vec<StagedRow>> {
    let states = if schema.has_state_reference() {
        ctx.states().labels(&schema.typedef.name)?.clone()
    } else {
        StateLabels::default()
    };
    let request = ctx.record_request(schema);

    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for record in ctx.source().records(&schema.entity, &request)? {
        let record = match record {
            Ok(record) => record,
            Err(AlmError::MissingObjectId) => {
                tracing::warn!("skipping record without ObjectID");
                report.fetched += 1;
                report.skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        report.fetched += 1;

        if !seen.insert(record.object_id) {
            tracing::warn!(object_id = record.object_id, "skipping repeated record");
            report.duplicates += 1;
            continue;
        }

        match project(&record, &schema.columns, &schema.typedef.name, &states) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!(object_id = record.object_id, error = %e, "skipping record");
                report.skipped += 1;
            }
        }
    }
    Ok(rows)
}

/// Discover every configured entity without touching the database.
pub fn plan_all(ctx: &mut RunContext<'_>) -> Result<Vec<EntitySchema>> {
    ctx.settings
        .entities
        .clone()
        .iter()
        .map(|entity| ctx.schema(entity))
        .collect()
}
