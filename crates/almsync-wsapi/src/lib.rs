//! Remote ALM access
//!
//! The loaders only need three things from the ALM:
//! - the type definition of each configured work-item type,
//! - the workflow states of a type (portfolio items carry a `State` reference),
//! - a lazily paged stream of work items for a query and fetch list.
//!
//! [`AlmSource`] captures exactly that. [`WsapiClient`] implements it over the
//! ALM web services API; [`FixtureSource`] serves canned data for tests and
//! offline runs.

pub mod client;
pub mod fixture;
pub mod record;

pub use client::{WsapiClient, WsapiConfig};
pub use fixture::FixtureSource;
pub use record::RemoteRecord;

use almsync_schema::{EntityTypeDef, StateLabels};

/// Errors raised by ALM sources.
#[derive(Debug, thiserror::Error)]
pub enum AlmError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("query against {url} failed: {}", .errors.join("; "))]
    Query { url: String, errors: Vec<String> },

    #[error("unknown work item type `{0}`")]
    UnknownEntity(String),

    #[error("record has no usable ObjectID")]
    MissingObjectId,

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, AlmError>;

/// Lazily fetched work items; each page is requested when the previous one
/// is exhausted.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<RemoteRecord>> + 'a>;

/// Parameters of a work-item query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    /// Attribute names to fetch.
    pub fetch: Vec<String>,
    /// Filter expression, e.g. `(LastUpdateDate > "2024-01-01")`.
    pub query: Option<String>,
    pub order: String,
    pub page_size: u32,
}

impl RecordRequest {
    pub fn new(fetch: Vec<String>) -> Self {
        Self {
            fetch,
            query: None,
            order: "ObjectID".to_string(),
            page_size: 2000,
        }
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// What the loaders consume from the ALM.
pub trait AlmSource {
    /// Schema descriptor of one work-item type.
    fn typedef(&self, entity: &str) -> Result<EntityTypeDef>;

    /// Work items of `entity` matching `request`.
    fn records<'a>(&'a self, entity: &str, request: &RecordRequest) -> Result<RecordStream<'a>>;

    /// Workflow states scoped to the type definition of `entity`, in ALM order.
    fn workflow_states(&self, entity: &str) -> Result<StateLabels>;
}

/// Type-definition name of an entity path (`PortfolioItem/Feature` -> `Feature`).
pub fn element_name(entity: &str) -> &str {
    entity.rsplit('/').next().unwrap_or(entity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_name_strips_type_path() {
        assert_eq!(element_name("PortfolioItem/Feature"), "Feature");
        assert_eq!(element_name("Defect"), "Defect");
    }

    #[test]
    fn request_defaults() {
        let req = RecordRequest::new(vec!["ObjectID".into()]);
        assert_eq!(req.order, "ObjectID");
        assert_eq!(req.page_size, 2000);
        assert!(req.query.is_none());
    }
}
