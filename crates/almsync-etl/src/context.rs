//! Explicit run state handed to every loader step.

use crate::catalog::{EntitySchema, SchemaCache, StateCache};
use crate::config::{Config, MAX_PAGE_SIZE};
use crate::Result;
use almsync_schema::{FieldAllowlist, FieldMatch, TableMode, TranslatePolicy};
use almsync_wsapi::{AlmSource, RecordRequest};
use std::path::PathBuf;

/// The parts of the configuration the loaders act on.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub entities: Vec<String>,
    pub allowlist: FieldAllowlist,
    pub policy: TranslatePolicy,
    pub mode: TableMode,
    pub query: Option<String>,
    pub page_size: u32,
    pub staging_dir: Option<PathBuf>,
}

impl RunSettings {
    pub fn new(entities: &[&str], fetch: &str) -> Self {
        Self {
            entities: entities.iter().map(|e| e.to_string()).collect(),
            allowlist: FieldAllowlist::parse(fetch, FieldMatch::Word),
            policy: TranslatePolicy::default(),
            mode: TableMode::Snapshot,
            query: None,
            page_size: MAX_PAGE_SIZE,
            staging_dir: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            entities: config.entities(),
            allowlist: config.allowlist(),
            policy: config.policy(),
            mode: config.table_mode(),
            query: config.ac.query.clone(),
            page_size: config.ac.pagesize,
            staging_dir: config.db.staging_dir.clone(),
        }
    }

    pub fn with_mode(mut self, mode: TableMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: TranslatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }
}

/// Settings, the ALM source and the per-run caches.
pub struct RunContext<'a> {
    pub settings: RunSettings,
    source: &'a dyn AlmSource,
    states: StateCache<'a>,
    schemas: SchemaCache,
}

impl<'a> RunContext<'a> {
    pub fn new(settings: RunSettings, source: &'a dyn AlmSource) -> Self {
        Self {
            settings,
            source,
            states: StateCache::new(source),
            schemas: SchemaCache::default(),
        }
    }

    pub fn source(&self) -> &'a dyn AlmSource {
        self.source
    }

    /// Translated schema of `entity`, discovered on first use.
    pub fn schema(&mut self, entity: &str) -> Result<EntitySchema> {
        let schema = self.schemas.discover(
            entity,
            self.source,
            &mut self.states,
            &self.settings.allowlist,
            &self.settings.policy,
            self.settings.mode,
        )?;
        Ok(schema.clone())
    }

    pub fn states(&mut self) -> &mut StateCache<'a> {
        &mut self.states
    }

    pub fn record_request(&self, schema: &EntitySchema) -> RecordRequest {
        RecordRequest::new(schema.fetch_fields())
            .with_query(self.settings.query.clone())
            .with_page_size(self.settings.page_size)
    }
}
