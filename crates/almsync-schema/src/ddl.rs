//! Column specs -> table DDL.

use crate::model::{ColumnSpec, SqlType};
use crate::sql::{literal_list, quote_ident, quoted, storage_name, table_name};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate key of versioned tables.
pub const SNAPSHOT_ID_COLUMN: &str = "_snapshot_id";
/// Start of a snapshot row's validity window.
pub const VALID_FROM_COLUMN: &str = "_valid_from";
/// End of a snapshot row's validity window; NULL while the row is open.
pub const VALID_TO_COLUMN: &str = "_valid_to";

/// Table shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableMode {
    /// One row per object, `ObjectID` is the primary key; refreshed by full reload.
    Snapshot,
    /// One row per object version with a validity window and a surrogate key.
    Versioned,
}

/// One schema-changing statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlOp {
    CreateTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: String,
        definition: String,
    },
    /// Lookup index on the identifier, limited to open rows.
    CreateOpenRowIndex {
        name: String,
        table: String,
        column: String,
    },
}

impl fmt::Display for DdlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlOp::CreateTable { table } => write!(f, "CREATE TABLE {} ()", quoted(table)),
            DdlOp::AddColumn {
                table,
                column,
                definition,
            } => write!(
                f,
                "ALTER TABLE {} ADD COLUMN {} {}",
                quoted(table),
                quoted(column),
                definition
            ),
            DdlOp::CreateOpenRowIndex {
                name,
                table,
                column,
            } => write!(
                f,
                "CREATE INDEX {} ON {} ({}) WHERE {} IS NULL",
                quoted(name),
                quoted(table),
                quoted(column),
                quoted(VALID_TO_COLUMN)
            ),
        }
    }
}

/// A stored column as loaders see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub identifier: bool,
}

/// Where and how an entity's rows are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    pub entity: String,
    pub table: String,
    pub mode: TableMode,
    /// Attribute columns in DDL order (system columns excluded).
    pub columns: Vec<LayoutColumn>,
}

impl TableLayout {
    pub fn identifier(&self) -> Option<&LayoutColumn> {
        self.columns.iter().find(|c| c.identifier)
    }

    /// Columns compared during reconciliation.
    pub fn tracked(&self) -> impl Iterator<Item = &LayoutColumn> {
        self.columns.iter().filter(|c| !c.identifier)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// DDL for one entity plus the layout it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub layout: TableLayout,
    pub ops: Vec<DdlOp>,
}

impl TablePlan {
    pub fn statements(&self) -> Vec<String> {
        self.ops.iter().map(ToString::to_string).collect()
    }
}

/// Build the DDL for `entity` from its translated columns.
///
/// Emits `CREATE TABLE` with no columns followed by one `ADD COLUMN` per
/// column, in the order given. Collection-valued columns are skipped.
pub fn build_table(entity: &str, columns: &[ColumnSpec], mode: TableMode) -> Result<TablePlan> {
    let table = storage_name(table_name(entity));
    quote_ident(&table)?;

    let mut ops = vec![DdlOp::CreateTable {
        table: table.clone(),
    }];
    let add = |column: &str, definition: String| DdlOp::AddColumn {
        table: table.clone(),
        column: column.to_string(),
        definition,
    };

    if mode == TableMode::Versioned {
        ops.push(add(SNAPSHOT_ID_COLUMN, "bigserial PRIMARY KEY".into()));
        ops.push(add(VALID_FROM_COLUMN, "timestamp with time zone NOT NULL".into()));
        ops.push(add(VALID_TO_COLUMN, "timestamp with time zone".into()));
    }

    let mut layout_columns = Vec::new();
    for spec in columns {
        let Some(sql_type) = spec.sql_type() else {
            tracing::debug!(entity, attribute = %spec.attribute, "no column for collection attribute");
            continue;
        };
        quote_ident(&spec.column)?;

        let definition = if spec.identifier {
            match mode {
                TableMode::Snapshot => "bigint PRIMARY KEY".to_string(),
                TableMode::Versioned => "bigint NOT NULL".to_string(),
            }
        } else {
            match spec.category.allowed_values() {
                Some(values) if !values.is_empty() => format!(
                    "text CHECK ({} IN ({}))",
                    quoted(&spec.column),
                    literal_list(values)
                ),
                Some(_) => {
                    tracing::warn!(
                        entity,
                        attribute = %spec.attribute,
                        "enumerated attribute has no allowed values; column is unconstrained"
                    );
                    sql_type.ddl().to_string()
                }
                None => sql_type.ddl().to_string(),
            }
        };
        ops.push(add(&spec.column, definition));
        layout_columns.push(LayoutColumn {
            name: spec.column.clone(),
            sql_type,
            identifier: spec.identifier,
        });
    }

    if mode == TableMode::Versioned {
        if let Some(id) = layout_columns.iter().find(|c| c.identifier) {
            ops.push(DdlOp::CreateOpenRowIndex {
                name: format!("{table}_open_rows"),
                table: table.clone(),
                column: id.name.clone(),
            });
        }
    }

    Ok(TablePlan {
        layout: TableLayout {
            entity: entity.to_string(),
            table,
            mode,
            columns: layout_columns,
        },
        ops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnCategory, UserResolution};

    fn spec(attribute: &str, category: ColumnCategory) -> ColumnSpec {
        ColumnSpec {
            attribute: attribute.to_string(),
            column: storage_name(attribute),
            identifier: attribute == "ObjectID",
            category,
        }
    }

    fn defect_columns() -> Vec<ColumnSpec> {
        vec![
            spec("ObjectID", ColumnCategory::Scalar(SqlType::BigInt)),
            spec(
                "State",
                ColumnCategory::Enumerated(
                    ["Submitted", "Open", "Fixed", "Closed"].map(String::from).to_vec(),
                ),
            ),
            spec("Owner", ColumnCategory::UserReference(UserResolution::ById)),
            spec("Tasks", ColumnCategory::Collection),
        ]
    }

    #[test]
    fn snapshot_table_uses_object_id_as_primary_key() {
        let plan = build_table("Defect", &defect_columns(), TableMode::Snapshot).unwrap();
        assert_eq!(
            plan.statements(),
            vec![
                r#"CREATE TABLE "defect" ()"#,
                r#"ALTER TABLE "defect" ADD COLUMN "objectid" bigint PRIMARY KEY"#,
                r#"ALTER TABLE "defect" ADD COLUMN "state" text CHECK ("state" IN ('Submitted','Open','Fixed','Closed'))"#,
                r#"ALTER TABLE "defect" ADD COLUMN "owner" bigint"#,
            ]
        );
        assert_eq!(plan.layout.column_names(), ["objectid", "state", "owner"]);
    }

    #[test]
    fn versioned_table_gets_surrogate_key_and_window() {
        let plan = build_table("Defect", &defect_columns(), TableMode::Versioned).unwrap();
        let sql = plan.statements();
        assert!(sql.contains(&r#"ALTER TABLE "defect" ADD COLUMN "_snapshot_id" bigserial PRIMARY KEY"#.to_string()));
        assert!(sql.contains(&r#"ALTER TABLE "defect" ADD COLUMN "objectid" bigint NOT NULL"#.to_string()));
        assert!(sql.contains(&r#"ALTER TABLE "defect" ADD COLUMN "_valid_to" timestamp with time zone"#.to_string()));
        assert_eq!(
            sql.last().unwrap(),
            r#"CREATE INDEX "defect_open_rows" ON "defect" ("objectid") WHERE "_valid_to" IS NULL"#
        );
        assert_eq!(sql.iter().filter(|s| s.contains("PRIMARY KEY")).count(), 1);
    }

    #[test]
    fn reserved_entity_gets_safe_table() {
        let cols = vec![spec("ObjectID", ColumnCategory::Scalar(SqlType::BigInt))];
        let plan = build_table("User", &cols, TableMode::Snapshot).unwrap();
        assert_eq!(plan.layout.table, "users");
        assert_eq!(plan.statements()[0], r#"CREATE TABLE "users" ()"#);
    }

    #[test]
    fn check_values_are_escaped() {
        let cols = vec![
            spec("ObjectID", ColumnCategory::Scalar(SqlType::BigInt)),
            spec("Resolution", ColumnCategory::Enumerated(vec!["Won't Fix".into(), "Fixed".into()])),
        ];
        let plan = build_table("Defect", &cols, TableMode::Snapshot).unwrap();
        assert!(plan.statements()[2].ends_with(r#"CHECK ("resolution" IN ('Won''t Fix','Fixed'))"#));
    }

    #[test]
    fn empty_enumeration_is_unconstrained() {
        let cols = vec![
            spec("ObjectID", ColumnCategory::Scalar(SqlType::BigInt)),
            spec("Priority", ColumnCategory::Enumerated(vec![])),
        ];
        let plan = build_table("Defect", &cols, TableMode::Snapshot).unwrap();
        assert_eq!(plan.statements()[2], r#"ALTER TABLE "defect" ADD COLUMN "priority" text"#);
    }
}
