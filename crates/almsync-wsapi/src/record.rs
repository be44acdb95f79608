//! Fetched work items.

use crate::{AlmError, Result};
use almsync_schema::IDENTIFIER_ATTRIBUTE;
use serde_json::{Map, Value};

/// One work item as returned by the ALM.
///
/// Values stay in wire form: primitives, label strings, `null`, or reference
/// objects such as `{"_ref": ".../user/123", "_refObjectName": "Ann"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub object_id: i64,
    fields: Map<String, Value>,
}

impl RemoteRecord {
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(AlmError::MissingObjectId);
        };
        let object_id = match fields.get(IDENTIFIER_ATTRIBUTE) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or(AlmError::MissingObjectId)?;
        Ok(Self { object_id, fields })
    }

    /// Raw value of an attribute; `None` when the attribute was not returned.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.fields.get(attribute)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}
