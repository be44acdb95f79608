//! Relational schema model for ALM work items
//!
//! Turns the loosely typed schema an ALM reports for a work-item type into
//! concrete SQL:
//! - Attribute types -> column types (`typemap`)
//! - Type definitions -> normalized column specs (`translate`)
//! - Column specs -> `CREATE TABLE` / `ADD COLUMN` operations (`ddl`)
//!
//! ```text
//!  EntityTypeDef ──► translate ──► [ColumnSpec] ──► build_table ──► [DdlOp]
//!        │               │                               │
//!   AttributeDef    StateCatalog                    TableLayout
//!                (workflow states)              (used by loaders)
//! ```
//!
//! Nothing here talks to the network or a database. Workflow-state lookups
//! go through the [`StateCatalog`] trait so callers decide how they are
//! fetched and cached.

pub mod ddl;
pub mod model;
pub mod row;
pub mod sql;
pub mod translate;
pub mod typemap;

pub use ddl::{build_table, DdlOp, LayoutColumn, TableLayout, TableMode, TablePlan};
pub use model::{
    AttributeDef, AttributeType, ColumnCategory, ColumnSpec, EntityTypeDef, SqlType,
    StateLabels, UserResolution, IDENTIFIER_ATTRIBUTE,
};
pub use row::{canonical_decimal, parse_bool, SqlValue, StagedRow};
pub use translate::{translate, FieldAllowlist, FieldMatch, StateCatalog, TranslatePolicy};
pub use typemap::map_type;

/// Errors raised while translating a remote schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unsupported attribute type `{tag}` for attribute `{attribute}`")]
    UnsupportedType { attribute: String, tag: String },

    #[error("type definition for `{entity}` has no `ObjectID` attribute")]
    MissingIdentifier { entity: String },

    #[error("invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("workflow state lookup for `{entity}` failed: {message}")]
    StateLookup { entity: String, message: String },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
