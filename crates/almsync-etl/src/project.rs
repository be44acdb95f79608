//! Remote record -> database-ready row.

use crate::{EtlError, Result};
use almsync_schema::{
    canonical_decimal, parse_bool, ColumnCategory, ColumnSpec, SqlType, SqlValue, StagedRow,
    StateLabels, UserResolution,
};
use almsync_wsapi::RemoteRecord;
use serde_json::Value;

/// Sentinel some attribute types report for an unset value.
const NONE_SENTINEL: &str = "None";

/// Project `record` onto `columns`.
///
/// Every non-collection column gets a value, NULL when the attribute is
/// missing, falsy or the `"None"` sentinel. `states` holds the workflow states
/// of the record's type and is only consulted for state-reference columns.
///
/// The first field that cannot be projected fails the whole record.
pub fn project(
    record: &RemoteRecord,
    columns: &[ColumnSpec],
    entity: &str,
    states: &StateLabels,
) -> Result<StagedRow> {
    let mut row = StagedRow::new(record.object_id);
    for spec in columns {
        if spec.category.is_collection() {
            continue;
        }
        let value = if spec.identifier {
            SqlValue::Number(record.object_id.to_string())
        } else {
            match record.get(&spec.attribute) {
                Some(raw) if !is_empty(raw) => project_value(spec, raw, entity, states)?,
                _ => SqlValue::Null,
            }
        };
        row.set(&spec.column, value);
    }
    Ok(row)
}

/// Values stored as NULL.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == NONE_SENTINEL,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

fn project_value(
    spec: &ColumnSpec,
    raw: &Value,
    entity: &str,
    states: &StateLabels,
) -> Result<SqlValue> {
    let fail = |message: String| EtlError::Projection {
        field: spec.attribute.clone(),
        message,
    };

    match &spec.category {
        ColumnCategory::Scalar(SqlType::BigInt) => match raw {
            Value::Number(n) => n
                .as_i64()
                .map(|i| SqlValue::Number(i.to_string()))
                .ok_or_else(|| fail(format!("expected a 64-bit integer, got {n}"))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| SqlValue::Number(i.to_string()))
                .map_err(|_| fail(format!("expected a 64-bit integer, got `{s}`"))),
            other => Err(fail(format!("expected an integer, got {other}"))),
        },
        ColumnCategory::Scalar(SqlType::Numeric) => {
            let text = match raw {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                other => return Err(fail(format!("expected a number, got {other}"))),
            };
            match canonical_decimal(&text) {
                Some(_) => Ok(SqlValue::Number(text)),
                None => Err(fail(format!("expected a decimal number, got `{text}`"))),
            }
        }
        ColumnCategory::Scalar(SqlType::Boolean) => match raw {
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            Value::String(s) => parse_bool(s.trim())
                .map(|b| SqlValue::Text(b.to_string()))
                .ok_or_else(|| fail(format!("expected a boolean, got `{s}`"))),
            other => Err(fail(format!("expected a boolean, got {other}"))),
        },
        ColumnCategory::Scalar(_) => scalar_text(raw).map(SqlValue::Text).map_err(fail),
        ColumnCategory::Enumerated(_) => match raw {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Err(fail(format!("expected a label, got {other}"))),
        },
        ColumnCategory::Reference | ColumnCategory::UserReference(UserResolution::ById) => {
            reference_id(raw)
                .map(|id| SqlValue::Number(id.to_string()))
                .map_err(fail)
        }
        ColumnCategory::UserReference(UserResolution::ByName) => raw
            .get("_refObjectName")
            .and_then(Value::as_str)
            .map(|name| SqlValue::Text(name.to_string()))
            .ok_or_else(|| fail("user reference carries no display name".into())),
        ColumnCategory::StateReference(_) => {
            let state_id = reference_id(raw).map_err(fail)?;
            states
                .label(state_id)
                .map(|label| SqlValue::Text(label.to_string()))
                .ok_or_else(|| EtlError::UnknownStateId {
                    entity: entity.to_string(),
                    state_id,
                })
        }
        ColumnCategory::Collection => Ok(SqlValue::Null),
    }
}

fn scalar_text(raw: &Value) -> std::result::Result<String, String> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected a scalar, got {other}")),
    }
}

/// ObjectID at the end of a reference URI (`.../defect/1234` -> 1234).
pub fn reference_id(raw: &Value) -> std::result::Result<i64, String> {
    let uri = match raw {
        Value::Object(fields) => fields.get("_ref").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
    .ok_or_else(|| format!("expected a reference, got {raw}"))?;

    let segment = uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let segment = segment.strip_suffix(".js").unwrap_or(segment);
    segment
        .parse()
        .map_err(|_| format!("malformed reference `{uri}`"))
}
