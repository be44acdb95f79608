//! Per-run caches of remote schema information.

use crate::Result;
use almsync_schema::{
    build_table, translate, ColumnCategory, ColumnSpec, EntityTypeDef, FieldAllowlist,
    SchemaError, StateCatalog, StateLabels, TableMode, TablePlan, TranslatePolicy,
};
use almsync_wsapi::AlmSource;
use std::collections::HashMap;

/// Workflow states, fetched at most once per entity type.
pub struct StateCache<'a> {
    source: &'a dyn AlmSource,
    states: HashMap<String, StateLabels>,
}

impl<'a> StateCache<'a> {
    pub fn new(source: &'a dyn AlmSource) -> Self {
        Self {
            source,
            states: HashMap::new(),
        }
    }

    pub fn labels(&mut self, entity: &str) -> Result<&StateLabels> {
        if !self.states.contains_key(entity) {
            let labels = self.source.workflow_states(entity)?;
            tracing::debug!(entity, states = labels.len(), "cached workflow states");
            self.states.insert(entity.to_string(), labels);
        }
        Ok(&self.states[entity])
    }
}

impl StateCatalog for StateCache<'_> {
    fn states(&mut self, entity: &str) -> almsync_schema::Result<StateLabels> {
        self.labels(entity)
            .cloned()
            .map_err(|e| SchemaError::StateLookup {
                entity: entity.to_string(),
                message: e.to_string(),
            })
    }
}

/// Everything derived from one entity's type definition.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    /// Configured entity path (`PortfolioItem/Feature`).
    pub entity: String,
    pub typedef: EntityTypeDef,
    pub columns: Vec<ColumnSpec>,
    pub plan: TablePlan,
}

impl EntitySchema {
    /// Attribute names requested from the ALM: every column-backed attribute.
    pub fn fetch_fields(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.category.is_collection())
            .map(|c| c.attribute.clone())
            .collect()
    }

    pub fn has_state_reference(&self) -> bool {
        self.columns
            .iter()
            .any(|c| matches!(c.category, ColumnCategory::StateReference(_)))
    }
}

/// Translated schemas keyed by configured entity path.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: HashMap<String, EntitySchema>,
}

impl SchemaCache {
    pub fn get(&self, entity: &str) -> Option<&EntitySchema> {
        self.entries.get(entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Translate `entity` unless already cached.
    pub fn discover(
        &mut self,
        entity: &str,
        source: &dyn AlmSource,
        states: &mut StateCache<'_>,
        allowlist: &FieldAllowlist,
        policy: &TranslatePolicy,
        mode: TableMode,
    ) -> Result<&EntitySchema> {
        if !self.entries.contains_key(entity) {
            let typedef = source.typedef(entity)?;
            let columns = translate(&typedef, allowlist, policy, states)?;
            let plan = build_table(&typedef.name, &columns, mode)?;
            tracing::info!(
                entity,
                table = %plan.layout.table,
                columns = plan.layout.columns.len(),
                "discovered schema"
            );
            self.entries.insert(
                entity.to_string(),
                EntitySchema {
                    entity: entity.to_string(),
                    typedef,
                    columns,
                    plan,
                },
            );
        }
        Ok(&self.entries[entity])
    }
}
