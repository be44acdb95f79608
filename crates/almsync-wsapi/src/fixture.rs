//! In-memory ALM source.
//!
//! Serves canned type definitions, work items and workflow states. Used by the
//! test suites and for dry runs against exported JSON.

use crate::record::RemoteRecord;
use crate::{element_name, AlmError, AlmSource, RecordRequest, RecordStream, Result};
use almsync_schema::{EntityTypeDef, StateLabels};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct FixtureSource {
    typedefs: HashMap<String, EntityTypeDef>,
    records: HashMap<String, Vec<Value>>,
    states: HashMap<String, StateLabels>,
    failing: HashSet<String>,
    state_lookups: Cell<usize>,
    requests: RefCell<Vec<(String, RecordRequest)>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_typedef(mut self, entity: &str, typedef: EntityTypeDef) -> Self {
        self.typedefs.insert(entity.to_string(), typedef);
        self
    }

    pub fn with_records(mut self, entity: &str, records: Vec<Value>) -> Self {
        self.records.insert(entity.to_string(), records);
        self
    }

    pub fn with_states(mut self, entity: &str, states: StateLabels) -> Self {
        self.states.insert(element_name(entity).to_string(), states);
        self
    }

    /// Every call for `entity` fails as if the service were unreachable.
    pub fn with_failure(mut self, entity: &str) -> Self {
        self.failing.insert(entity.to_string());
        self
    }

    /// Replace the work items of `entity`, e.g. between two update cycles.
    pub fn set_records(&mut self, entity: &str, records: Vec<Value>) {
        self.records.insert(entity.to_string(), records);
    }

    /// Number of workflow-state queries served so far.
    pub fn state_lookups(&self) -> usize {
        self.state_lookups.get()
    }

    /// Work-item requests served so far, oldest first.
    pub fn requests(&self) -> Vec<(String, RecordRequest)> {
        self.requests.borrow().clone()
    }

    fn check(&self, entity: &str) -> Result<()> {
        if self.failing.contains(entity) {
            return Err(AlmError::Unavailable(format!("{entity} is unreachable")));
        }
        Ok(())
    }
}

impl AlmSource for FixtureSource {
    fn typedef(&self, entity: &str) -> Result<EntityTypeDef> {
        self.check(entity)?;
        self.typedefs
            .get(entity)
            .cloned()
            .ok_or_else(|| AlmError::UnknownEntity(entity.to_string()))
    }

    fn records<'a>(&'a self, entity: &str, request: &RecordRequest) -> Result<RecordStream<'a>> {
        self.check(entity)?;
        self.requests
            .borrow_mut()
            .push((entity.to_string(), request.clone()));
        let items = self.records.get(entity).cloned().unwrap_or_default();
        Ok(Box::new(items.into_iter().map(RemoteRecord::from_json)))
    }

    fn workflow_states(&self, entity: &str) -> Result<StateLabels> {
        self.check(entity)?;
        self.state_lookups.set(self.state_lookups.get() + 1);
        Ok(self
            .states
            .get(element_name(entity))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almsync_schema::AttributeDef;
    use serde_json::json;

    #[test]
    fn serves_records_and_remembers_requests() {
        let source = FixtureSource::new()
            .with_records("Defect", vec![json!({"ObjectID": 1}), json!({"ObjectID": 2})]);
        let req = RecordRequest::new(vec!["ObjectID".into()]).with_page_size(10);
        let ids: Vec<i64> = source
            .records("Defect", &req)
            .unwrap()
            .map(|r| r.unwrap().object_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(source.requests(), vec![("Defect".to_string(), req)]);
    }

    #[test]
    fn unknown_and_failing_entities() {
        let source = FixtureSource::new()
            .with_typedef("Defect", EntityTypeDef::new("Defect", vec![AttributeDef::new("ObjectID", "INTEGER")]))
            .with_failure("Task");
        assert!(source.typedef("Defect").is_ok());
        assert!(matches!(source.typedef("Story"), Err(AlmError::UnknownEntity(_))));
        assert!(matches!(source.typedef("Task"), Err(AlmError::Unavailable(_))));
    }

    #[test]
    fn states_are_keyed_by_element_name() {
        let source = FixtureSource::new().with_states(
            "PortfolioItem/Feature",
            StateLabels::new(vec![(10, "Discovering".into())]),
        );
        let states = source.workflow_states("Feature").unwrap();
        assert_eq!(states.label(10), Some("Discovering"));
        assert_eq!(source.state_lookups(), 1);
    }
}
