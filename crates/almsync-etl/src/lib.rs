//! ALM -> relational loaders
//!
//! ```text
//!            ┌──────────────┐   typedef    ┌──────────────────────┐
//!            │  AlmSource   │─────────────►│ RunContext           │
//!            │ (wsapi)      │   states     │  schema + state cache│
//!            └──────┬───────┘─────────────►└──────────┬───────────┘
//!                   │ records                         │ ColumnSpec / TablePlan
//!                   ▼                                 ▼
//!            ┌──────────────┐  StagedRow   ┌──────────────────────┐
//!            │   project    │─────────────►│ snapshot: stage+COPY │
//!            └──────────────┘              │ versioned: reconcile │
//!                                          └──────────┬───────────┘
//!                                                     ▼
//!                                                 Warehouse
//! ```
//!
//! Two table modes:
//! - **snapshot** (`db.history: false`): one row per object, refreshed by a
//!   full reload through a CSV staging stream.
//! - **versioned** (`db.history: true`): one row per object version with a
//!   validity window, maintained by [`reconcile::reconcile`].

pub mod catalog;
pub mod config;
pub mod context;
pub mod loader;
pub mod project;
pub mod reconcile;
pub mod report;
pub mod stage;

pub use catalog::{EntitySchema, SchemaCache, StateCache};
pub use config::{AlmSettings, Config, ConfigError, DbSettings};
pub use context::{RunContext, RunSettings};
pub use loader::{run, Action};
pub use project::project;
pub use reconcile::{reconcile, ReconcileReport};
pub use report::{EntityReport, RunReport};

use almsync_schema::SchemaError;
use almsync_store::StoreError;
use almsync_wsapi::AlmError;

#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Alm(#[from] AlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow state {state_id} of {entity} has no label")]
    UnknownStateId { entity: String, state_id: i64 },

    #[error("cannot project field `{field}`: {message}")]
    Projection { field: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("staging {target}: {message}")]
    Staging { target: String, message: String },
}

pub type Result<T> = std::result::Result<T, EtlError>;
