//! PostgreSQL warehouse.
//!
//! Values are bound as text parameters and cast on the server
//! (`CAST($2::text AS bigint)`), so one statement shape serves every column
//! type. Open rows are read back through `to_json(col)#>>'{}'`, which yields
//! the canonical text form of any column type.

use crate::{CycleTx, OpenRow, StoreError, StoreResult, Warehouse};
use almsync_schema::ddl::{SNAPSHOT_ID_COLUMN, VALID_FROM_COLUMN, VALID_TO_COLUMN};
use almsync_schema::sql::quote_ident;
use almsync_schema::{DdlOp, SqlType, SqlValue, StagedRow, TableLayout};
use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::{Client, NoTls, Transaction};
use std::collections::BTreeMap;
use std::io::Read;

/// Connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
}

impl PgParams {
    /// `user@host:port/db`, for messages.
    pub fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

pub struct PgWarehouse {
    client: Option<Client>,
}

impl PgWarehouse {
    pub fn connect(params: &PgParams) -> StoreResult<Self> {
        let mut config = postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .dbname(&params.dbname)
            .user(&params.user);
        if let Some(password) = &params.password {
            config.password(password);
        }
        let client = config.connect(NoTls).map_err(|source| StoreError::Connect {
            target: params.target(),
            source,
        })?;
        tracing::info!(target_db = %params.target(), "connected");
        Ok(Self {
            client: Some(client),
        })
    }

    fn client(&mut self) -> StoreResult<&mut Client> {
        self.client.as_mut().ok_or(StoreError::Closed)
    }
}

fn sql_error(statement: &str, err: postgres::Error) -> StoreError {
    StoreError::Sql {
        statement: statement.to_string(),
        message: err.to_string(),
    }
}

fn ident(name: &str) -> StoreResult<String> {
    quote_ident(name).map_err(|e| StoreError::Sql {
        statement: String::new(),
        message: e.to_string(),
    })
}

fn identifier_column(layout: &TableLayout) -> StoreResult<&str> {
    layout
        .identifier()
        .map(|c| c.name.as_str())
        .ok_or_else(|| StoreError::MissingColumn {
            table: layout.table.clone(),
            column: "<identifier>".into(),
        })
}

// ============================================================================
// Statement text
// ============================================================================

pub fn truncate_sql(layout: &TableLayout) -> StoreResult<String> {
    Ok(format!("TRUNCATE {}", ident(&layout.table)?))
}

/// `COPY` of every layout column, in layout order, from a CSV stream with a
/// header row.
pub fn copy_sql(layout: &TableLayout) -> StoreResult<String> {
    let columns = layout
        .columns
        .iter()
        .map(|c| ident(&c.name))
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(format!(
        "COPY {} ({}) FROM STDIN (FORMAT csv, HEADER true)",
        ident(&layout.table)?,
        columns.join(", ")
    ))
}

/// Lookup of the open row of one object: surrogate key, then tracked columns
/// in layout order.
pub fn select_open_sql(layout: &TableLayout) -> StoreResult<String> {
    let mut select = vec![ident(SNAPSHOT_ID_COLUMN)?];
    for column in layout.tracked() {
        select.push(format!("to_json({})#>>'{{}}'", ident(&column.name)?));
    }
    Ok(format!(
        "SELECT {} FROM {} WHERE {} = $1 AND {} IS NULL ORDER BY {} DESC LIMIT 1",
        select.join(", "),
        ident(&layout.table)?,
        ident(identifier_column(layout)?)?,
        ident(VALID_TO_COLUMN)?,
        ident(SNAPSHOT_ID_COLUMN)?
    ))
}

pub fn close_sql(layout: &TableLayout) -> StoreResult<String> {
    Ok(format!(
        "UPDATE {} SET {} = $1 WHERE {} = $2",
        ident(&layout.table)?,
        ident(VALID_TO_COLUMN)?,
        ident(SNAPSHOT_ID_COLUMN)?
    ))
}

/// Insert of a new open row. `$1` is the validity start, `$2..` the layout
/// columns in order.
pub fn insert_sql(layout: &TableLayout) -> StoreResult<String> {
    let mut columns = vec![ident(VALID_FROM_COLUMN)?];
    let mut values = vec!["$1".to_string()];
    for (i, column) in layout.columns.iter().enumerate() {
        columns.push(ident(&column.name)?);
        values.push(cast_param(i + 2, column.sql_type));
    }
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        ident(&layout.table)?,
        columns.join(", "),
        values.join(", "),
        ident(SNAPSHOT_ID_COLUMN)?
    ))
}

fn cast_param(n: usize, ty: SqlType) -> String {
    match ty {
        SqlType::Text => format!("${n}::text"),
        other => format!("CAST(${n}::text AS {})", other.cast_name()),
    }
}

// ============================================================================
// Warehouse
// ============================================================================

impl Warehouse for PgWarehouse {
    fn apply_ddl(&mut self, ops: &[DdlOp]) -> StoreResult<()> {
        let mut tx = self
            .client()?
            .transaction()
            .map_err(|e| sql_error("BEGIN", e))?;
        for op in ops {
            let statement = op.to_string();
            tracing::debug!(%statement, "ddl");
            tx.batch_execute(&statement)
                .map_err(|e| sql_error(&statement, e))?;
        }
        tx.commit().map_err(|e| sql_error("COMMIT", e))
    }

    fn reload(
        &mut self,
        layout: &TableLayout,
        source: &mut dyn Read,
        truncate: bool,
    ) -> StoreResult<u64> {
        let copy = copy_sql(layout)?;
        let truncate_stmt = truncate_sql(layout)?;
        let mut tx = self
            .client()?
            .transaction()
            .map_err(|e| sql_error("BEGIN", e))?;
        if truncate {
            tx.batch_execute(&truncate_stmt)
                .map_err(|e| sql_error(&truncate_stmt, e))?;
        }

        let copy_error = |e: postgres::Error| StoreError::Copy {
            table: layout.table.clone(),
            message: e.to_string(),
        };
        let mut writer = tx.copy_in(copy.as_str()).map_err(copy_error)?;
        std::io::copy(source, &mut writer)?;
        let rows = writer.finish().map_err(copy_error)?;
        tx.commit().map_err(|e| sql_error("COMMIT", e))?;
        Ok(rows)
    }

    fn begin_cycle<'a>(&'a mut self, layout: &TableLayout) -> StoreResult<Box<dyn CycleTx + 'a>> {
        let statements = CycleStatements {
            select_open: select_open_sql(layout)?,
            close: close_sql(layout)?,
            insert: insert_sql(layout)?,
            layout: layout.clone(),
        };
        let tx = self
            .client()?
            .transaction()
            .map_err(|e| sql_error("BEGIN", e))?;
        Ok(Box::new(PgCycle { tx, statements }))
    }

    fn close(&mut self) -> StoreResult<()> {
        if let Some(client) = self.client.take() {
            client.close().map_err(|e| sql_error("<terminate>", e))?;
            tracing::debug!("connection closed");
        }
        Ok(())
    }
}

struct CycleStatements {
    select_open: String,
    close: String,
    insert: String,
    layout: TableLayout,
}

struct PgCycle<'a> {
    tx: Transaction<'a>,
    statements: CycleStatements,
}

impl CycleTx for PgCycle<'_> {
    fn open_row(&mut self, object_id: i64) -> StoreResult<Option<OpenRow>> {
        let sql = &self.statements.select_open;
        let Some(row) = self
            .tx
            .query_opt(sql.as_str(), &[&object_id])
            .map_err(|e| sql_error(sql, e))?
        else {
            return Ok(None);
        };

        let snapshot_id: i64 = row.try_get(0).map_err(|e| sql_error(sql, e))?;
        let mut values = BTreeMap::new();
        for (i, column) in self.statements.layout.tracked().enumerate() {
            let text: Option<String> = row.try_get(i + 1).map_err(|e| sql_error(sql, e))?;
            values.insert(
                column.name.clone(),
                SqlValue::from_stored(text, column.sql_type),
            );
        }
        Ok(Some(OpenRow {
            snapshot_id,
            values,
        }))
    }

    fn close_row(&mut self, snapshot_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let sql = &self.statements.close;
        self.tx
            .execute(sql.as_str(), &[&at, &snapshot_id])
            .map_err(|e| sql_error(sql, e))?;
        Ok(())
    }

    fn insert_row(&mut self, row: &StagedRow, valid_from: DateTime<Utc>) -> StoreResult<i64> {
        let values: Vec<Option<String>> = self
            .statements
            .layout
            .columns
            .iter()
            .map(|c| {
                if c.identifier {
                    Some(row.object_id.to_string())
                } else {
                    row.value(&c.name).as_text().map(str::to_string)
                }
            })
            .collect();

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(values.len() + 1);
        params.push(&valid_from);
        params.extend(values.iter().map(|v| v as &(dyn ToSql + Sync)));

        let sql = &self.statements.insert;
        let inserted = self
            .tx
            .query_one(sql.as_str(), &params)
            .map_err(|e| sql_error(sql, e))?;
        inserted.try_get(0).map_err(|e| sql_error(sql, e))
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().map_err(|e| sql_error("COMMIT", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almsync_schema::{LayoutColumn, TableMode};

    fn layout() -> TableLayout {
        let col = |name: &str, sql_type, identifier| LayoutColumn {
            name: name.to_string(),
            sql_type,
            identifier,
        };
        TableLayout {
            entity: "Defect".into(),
            table: "defect".into(),
            mode: TableMode::Versioned,
            columns: vec![
                col("objectid", SqlType::BigInt, true),
                col("state", SqlType::Text, false),
                col("planestimate", SqlType::Numeric, false),
            ],
        }
    }

    #[test]
    fn copy_lists_columns_in_layout_order() {
        assert_eq!(
            copy_sql(&layout()).unwrap(),
            r#"COPY "defect" ("objectid", "state", "planestimate") FROM STDIN (FORMAT csv, HEADER true)"#
        );
        assert_eq!(truncate_sql(&layout()).unwrap(), r#"TRUNCATE "defect""#);
    }

    #[test]
    fn open_row_lookup_reads_canonical_text() {
        assert_eq!(
            select_open_sql(&layout()).unwrap(),
            r#"SELECT "_snapshot_id", to_json("state")#>>'{}', to_json("planestimate")#>>'{}' FROM "defect" WHERE "objectid" = $1 AND "_valid_to" IS NULL ORDER BY "_snapshot_id" DESC LIMIT 1"#
        );
    }

    #[test]
    fn insert_casts_text_parameters() {
        assert_eq!(
            insert_sql(&layout()).unwrap(),
            r#"INSERT INTO "defect" ("_valid_from", "objectid", "state", "planestimate") VALUES ($1, CAST($2::text AS bigint), $3::text, CAST($4::text AS numeric)) RETURNING "_snapshot_id""#
        );
        assert_eq!(
            close_sql(&layout()).unwrap(),
            r#"UPDATE "defect" SET "_valid_to" = $1 WHERE "_snapshot_id" = $2"#
        );
    }

    #[test]
    fn lookup_requires_identifier() {
        let mut no_id = layout();
        no_id.columns.retain(|c| !c.identifier);
        assert!(matches!(
            select_open_sql(&no_id),
            Err(StoreError::MissingColumn { .. })
        ));
    }
}
