//! In-memory warehouse.
//!
//! Tables are plain row vectors holding text values. Every operation works on
//! a copy of the affected table that replaces the original only on success,
//! which gives the same all-or-nothing behaviour as the database transactions.

use crate::{CycleTx, OpenRow, StoreError, StoreResult, Warehouse};
use almsync_schema::ddl::{SNAPSHOT_ID_COLUMN, VALID_FROM_COLUMN, VALID_TO_COLUMN};
use almsync_schema::{DdlOp, SqlValue, StagedRow, TableLayout, TableMode};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Read;

/// One stored row; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemRow {
    values: BTreeMap<String, Option<String>>,
}

impl MemRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }

    fn set(&mut self, column: &str, value: Option<String>) {
        self.values.insert(column.to_string(), value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemTable {
    name: String,
    /// `(column, definition)` in creation order.
    columns: Vec<(String, String)>,
    indexes: BTreeSet<String>,
    rows: Vec<MemRow>,
    next_serial: i64,
}

impl MemTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> Vec<&str> {
        self.columns.iter().map(|(c, _)| c.as_str()).collect()
    }

    /// Column definition as given in `ADD COLUMN`.
    pub fn definition(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, d)| d.as_str())
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains(name)
    }

    pub fn rows(&self) -> &[MemRow] {
        &self.rows
    }

    /// Rows whose validity window is still open.
    pub fn open_rows(&self) -> impl Iterator<Item = &MemRow> {
        self.rows.iter().filter(|r| r.get(VALID_TO_COLUMN).is_none())
    }

    /// All rows of one object, oldest first.
    pub fn history(&self, id_column: &str, object_id: i64) -> Vec<&MemRow> {
        let id = object_id.to_string();
        self.rows
            .iter()
            .filter(|r| r.get(id_column) == Some(id.as_str()))
            .collect()
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(c, _)| c == column)
    }

    fn require_column(&self, column: &str) -> StoreResult<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(StoreError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: BTreeMap<String, MemTable>,
    ddl_log: Vec<String>,
    failing_ddl: Vec<String>,
    failing_tables: HashSet<String>,
    closed: bool,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any DDL statement containing `fragment` fails.
    pub fn fail_ddl_containing(mut self, fragment: &str) -> Self {
        self.failing_ddl.push(fragment.to_string());
        self
    }

    /// Loads and reconciliation cycles against `table` fail.
    pub fn fail_table(mut self, table: &str) -> Self {
        self.failing_tables.insert(table.to_string());
        self
    }

    pub fn table(&self, name: &str) -> Option<&MemTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// DDL statements committed so far.
    pub fn ddl_log(&self) -> &[String] {
        &self.ddl_log
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Copy of `table` to work on, or an error if it is missing or poisoned.
    fn working_copy(&self, table: &str) -> StoreResult<MemTable> {
        self.ensure_open()?;
        if self.failing_tables.contains(table) {
            return Err(StoreError::Sql {
                statement: format!("<access {table}>"),
                message: "simulated failure".into(),
            });
        }
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::MissingTable(table.to_string()))
    }

    fn apply_op(tables: &mut BTreeMap<String, MemTable>, op: &DdlOp) -> StoreResult<()> {
        let failed = |message: String| StoreError::Sql {
            statement: op.to_string(),
            message,
        };
        match op {
            DdlOp::CreateTable { table } => {
                if tables.contains_key(table) {
                    return Err(failed(format!("relation \"{table}\" already exists")));
                }
                tables.insert(
                    table.clone(),
                    MemTable {
                        name: table.clone(),
                        ..MemTable::default()
                    },
                );
            }
            DdlOp::AddColumn {
                table,
                column,
                definition,
            } => {
                let t = tables
                    .get_mut(table)
                    .ok_or_else(|| StoreError::MissingTable(table.clone()))?;
                if t.has_column(column) {
                    return Err(failed(format!("column \"{column}\" already exists")));
                }
                t.columns.push((column.clone(), definition.clone()));
            }
            DdlOp::CreateOpenRowIndex { name, table, column } => {
                let t = tables
                    .get_mut(table)
                    .ok_or_else(|| StoreError::MissingTable(table.clone()))?;
                t.require_column(column)?;
                t.indexes.insert(name.clone());
            }
        }
        Ok(())
    }
}

impl Warehouse for MemoryWarehouse {
    fn apply_ddl(&mut self, ops: &[DdlOp]) -> StoreResult<()> {
        self.ensure_open()?;
        let mut tables = self.tables.clone();
        let mut statements = Vec::with_capacity(ops.len());
        for op in ops {
            let statement = op.to_string();
            if self.failing_ddl.iter().any(|f| statement.contains(f.as_str())) {
                return Err(StoreError::Sql {
                    statement,
                    message: "simulated failure".into(),
                });
            }
            Self::apply_op(&mut tables, op)?;
            tracing::debug!(%statement, "ddl");
            statements.push(statement);
        }
        self.tables = tables;
        self.ddl_log.extend(statements);
        Ok(())
    }

    fn reload(
        &mut self,
        layout: &TableLayout,
        source: &mut dyn Read,
        truncate: bool,
    ) -> StoreResult<u64> {
        let mut table = self.working_copy(&layout.table)?;
        let copy_error = |message: String| StoreError::Copy {
            table: layout.table.clone(),
            message,
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(source);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| copy_error(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        for header in &headers {
            table.require_column(header)?;
        }

        if truncate {
            table.rows.clear();
        }
        let id_column = layout.identifier().map(|c| c.name.clone());
        let mut seen: HashSet<String> = match (&id_column, layout.mode) {
            (Some(id), TableMode::Snapshot) => table
                .rows
                .iter()
                .filter_map(|r| r.get(id).map(str::to_string))
                .collect(),
            _ => HashSet::new(),
        };

        let mut loaded = 0u64;
        for record in reader.records() {
            let record = record.map_err(|e| copy_error(e.to_string()))?;
            let mut row = MemRow::default();
            for (column, field) in headers.iter().zip(record.iter()) {
                let value = (!field.is_empty()).then(|| field.to_string());
                row.set(column, value);
            }
            if let (Some(id), TableMode::Snapshot) = (&id_column, layout.mode) {
                let key = row.get(id).unwrap_or_default().to_string();
                if !seen.insert(key.clone()) {
                    return Err(copy_error(format!(
                        "duplicate key value violates primary key: {id}={key}"
                    )));
                }
            }
            table.rows.push(row);
            loaded += 1;
        }

        self.tables.insert(layout.table.clone(), table);
        Ok(loaded)
    }

    fn begin_cycle<'a>(&'a mut self, layout: &TableLayout) -> StoreResult<Box<dyn CycleTx + 'a>> {
        let working = self.working_copy(&layout.table)?;
        let id_column = layout
            .identifier()
            .map(|c| c.name.clone())
            .ok_or_else(|| StoreError::MissingColumn {
                table: layout.table.clone(),
                column: "<identifier>".into(),
            })?;
        working.require_column(&id_column)?;
        working.require_column(SNAPSHOT_ID_COLUMN)?;
        Ok(Box::new(MemCycle {
            store: self,
            layout: layout.clone(),
            id_column,
            working,
        }))
    }

    fn close(&mut self) -> StoreResult<()> {
        self.closed = true;
        Ok(())
    }
}

struct MemCycle<'a> {
    store: &'a mut MemoryWarehouse,
    layout: TableLayout,
    id_column: String,
    working: MemTable,
}

fn snapshot_id(row: &MemRow) -> Option<i64> {
    row.get(SNAPSHOT_ID_COLUMN).and_then(|s| s.parse().ok())
}

impl CycleTx for MemCycle<'_> {
    fn open_row(&mut self, object_id: i64) -> StoreResult<Option<OpenRow>> {
        let id = object_id.to_string();
        let open = self
            .working
            .open_rows()
            .filter(|r| r.get(&self.id_column) == Some(id.as_str()))
            .max_by_key(|r| snapshot_id(r));
        let Some(row) = open else {
            return Ok(None);
        };

        let values = self
            .layout
            .tracked()
            .map(|c| {
                let stored = row.get(&c.name).map(str::to_string);
                (c.name.clone(), SqlValue::from_stored(stored, c.sql_type))
            })
            .collect();
        Ok(Some(OpenRow {
            snapshot_id: snapshot_id(row).unwrap_or_default(),
            values,
        }))
    }

    fn close_row(&mut self, snapshot: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let row = self
            .working
            .rows
            .iter_mut()
            .find(|r| snapshot_id(r) == Some(snapshot))
            .ok_or_else(|| StoreError::Sql {
                statement: format!("<close {snapshot}>"),
                message: "no such snapshot row".into(),
            })?;
        row.set(VALID_TO_COLUMN, Some(at.to_rfc3339()));
        Ok(())
    }

    fn insert_row(&mut self, staged: &StagedRow, valid_from: DateTime<Utc>) -> StoreResult<i64> {
        self.working.next_serial += 1;
        let serial = self.working.next_serial;

        let mut row = MemRow::default();
        row.set(SNAPSHOT_ID_COLUMN, Some(serial.to_string()));
        row.set(VALID_FROM_COLUMN, Some(valid_from.to_rfc3339()));
        row.set(VALID_TO_COLUMN, None);
        for column in &self.layout.columns {
            self.working.require_column(&column.name)?;
            let value = if column.identifier {
                Some(staged.object_id.to_string())
            } else {
                staged.value(&column.name).as_text().map(str::to_string)
            };
            row.set(&column.name, value);
        }
        self.working.rows.push(row);
        Ok(serial)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemCycle { store, working, .. } = *self;
        store.tables.insert(working.name.clone(), working);
        Ok(())
    }
}
