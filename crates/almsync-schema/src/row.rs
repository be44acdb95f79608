//! Database-ready row values.

use crate::model::SqlType;
use crate::sql::quote_literal;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One projected value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    /// Bare numeric literal (`42`, `3.5`).
    Number(String),
    /// Text that is single-quoted when rendered.
    Text(String),
}

impl SqlValue {
    /// SQL literal: `NULL`, `42` or `'It''s'`.
    pub fn literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Number(n) => n.clone(),
            Self::Text(s) => quote_literal(s),
        }
    }

    /// Unquoted text form, `None` for NULL.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Number(s) | Self::Text(s) => Some(s),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Wrap text read back from a column of type `ty`.
    pub fn from_stored(text: Option<String>, ty: SqlType) -> Self {
        match text {
            None => Self::Null,
            Some(t) if ty.is_numeric() => Self::Number(t),
            Some(t) => Self::Text(t),
        }
    }

    /// Compare a stored value with an incoming one as values of type `ty`.
    ///
    /// Stored values come back in the database's canonical text form, so
    /// `3` vs `3.0` and `2024-01-02T03:04:05.000Z` vs `2024-01-02T03:04:05+00:00`
    /// are the same value.
    pub fn same_as(&self, other: &SqlValue, ty: SqlType) -> bool {
        let (a, b) = match (self.as_text(), other.as_text()) {
            (None, None) => return true,
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if a == b {
            return true;
        }
        match ty {
            SqlType::BigInt => match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            },
            SqlType::Numeric => match (canonical_decimal(a), canonical_decimal(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            SqlType::TimestampTz => match (parse_timestamp(a), parse_timestamp(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            SqlType::Boolean => match (parse_bool(a), parse_bool(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            SqlType::Text => false,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .ok()
}

/// Boolean spellings PostgreSQL accepts for a `boolean` column.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Largest exponent accepted in a decimal literal.
const MAX_DECIMAL_EXPONENT: i64 = 1000;

/// Exact canonical form of a finite decimal literal.
///
/// Leading and trailing zeros are dropped and exponents are expanded, so
/// `3`, `3.0`, `+3.00` and `0.3e1` all give `3`. `None` for anything that is
/// not a plain decimal (`inf`, `NaN`, hex, empty mantissa).
pub fn canonical_decimal(s: &str) -> Option<String> {
    let s = s.trim();
    let (negative, unsigned) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], unsigned[at + 1..].parse::<i64>().ok()?),
        None => (unsigned, 0),
    };
    if exponent.abs() > MAX_DECIMAL_EXPONENT {
        return None;
    }
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut point = int.len() as i64 + exponent;
    let digits = format!("{int}{frac}");
    let leading = digits.len() - digits.trim_start_matches('0').len();
    point -= leading as i64;
    let digits = digits.trim_matches('0');
    if digits.is_empty() {
        return Some("0".to_string());
    }

    let len = digits.len() as i64;
    let body = if point <= 0 {
        format!("0.{}{digits}", "0".repeat((-point) as usize))
    } else if point >= len {
        format!("{digits}{}", "0".repeat((point - len) as usize))
    } else {
        let (whole, fraction) = digits.split_at(point as usize);
        format!("{whole}.{fraction}")
    };
    Some(if negative { format!("-{body}") } else { body })
}

/// A projected record: one value per non-collection column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRow {
    pub object_id: i64,
    values: BTreeMap<String, SqlValue>,
}

impl StagedRow {
    pub fn new(object_id: i64) -> Self {
        Self {
            object_id,
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, column: &str, value: SqlValue) {
        self.values.insert(column.to_string(), value);
    }

    pub fn with(mut self, column: &str, value: SqlValue) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Value of `column`, NULL when absent.
    pub fn value(&self, column: &str) -> &SqlValue {
        static NULL: SqlValue = SqlValue::Null;
        self.values.get(column).unwrap_or(&NULL)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
