//! Relational target
//!
//! ```text
//!   DdlOp[] ──────────► apply_ddl     one transaction per entity
//!   CSV stream ───────► reload        [TRUNCATE +] COPY, one transaction
//!   StagedRow ────────► begin_cycle ─► open_row / close_row / insert_row ─► commit
//! ```
//!
//! [`Warehouse`] is what the loaders talk to. [`PgWarehouse`] runs against
//! PostgreSQL; [`MemoryWarehouse`] keeps tables in memory with the same
//! transactional behaviour and is what the test suites use.

pub mod memory;
pub mod pg;


pub use memory::{MemRow, MemTable, MemoryWarehouse};
pub use pg::{PgParams, PgWarehouse};

use almsync_schema::{DdlOp, SqlValue, StagedRow, TableLayout};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Read;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: postgres::Error,
    },

    #[error("statement failed: {message}\n  statement: {statement}")]
    Sql { statement: String, message: String },

    #[error("bulk load into {table} failed: {message}")]
    Copy { table: String, message: String },

    #[error("table {table} has no column {column}")]
    MissingColumn { table: String, column: String },

    #[error("table {0} does not exist")]
    MissingTable(String),

    #[error("connection already closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The current open snapshot row of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRow {
    pub snapshot_id: i64,
    /// Tracked column values as stored.
    pub values: BTreeMap<String, SqlValue>,
}

impl OpenRow {
    pub fn value(&self, column: &str) -> &SqlValue {
        static NULL: SqlValue = SqlValue::Null;
        self.values.get(column).unwrap_or(&NULL)
    }
}

/// Database collaborator of the loaders.
pub trait Warehouse {
    /// Run all `ops` in one transaction; nothing is applied on failure.
    fn apply_ddl(&mut self, ops: &[DdlOp]) -> StoreResult<()>;

    /// Bulk-load a CSV stream (header row = column names) into the layout's
    /// table, optionally emptying it first. Returns the number of rows loaded.
    fn reload(&mut self, layout: &TableLayout, source: &mut dyn Read, truncate: bool)
        -> StoreResult<u64>;

    /// Start a reconciliation transaction on a versioned table.
    fn begin_cycle<'a>(&'a mut self, layout: &TableLayout) -> StoreResult<Box<dyn CycleTx + 'a>>;

    /// Release the connection. Further calls fail with [`StoreError::Closed`].
    fn close(&mut self) -> StoreResult<()>;
}

/// One reconciliation transaction. Dropping it without [`CycleTx::commit`]
/// rolls every change back.
pub trait CycleTx {
    fn open_row(&mut self, object_id: i64) -> StoreResult<Option<OpenRow>>;

    /// Set the validity end of a snapshot row.
    fn close_row(&mut self, snapshot_id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    /// Insert an open snapshot row; returns its surrogate key.
    fn insert_row(&mut self, row: &StagedRow, valid_from: DateTime<Utc>) -> StoreResult<i64>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}
