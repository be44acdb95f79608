//! Remote schema descriptors and the column model derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical identifier attribute of every work item.
pub const IDENTIFIER_ATTRIBUTE: &str = "ObjectID";

/// Attribute that is always stored as text whatever its reported type.
pub const FORMATTED_ID_ATTRIBUTE: &str = "FormattedID";

/// Attribute name of the workflow-state reference on portfolio items.
pub const WORKFLOW_STATE_ATTRIBUTE: &str = "State";

/// Schema type of references that point at users.
pub const USER_SCHEMA_TYPE: &str = "User";

// ============================================================================
// Remote descriptors
// ============================================================================

/// Attribute type tag as reported by the ALM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttributeType {
    Integer,
    Date,
    Boolean,
    Quantity,
    Decimal,
    String,
    Text,
    Rating,
    State,
    Object,
    Collection,
    /// Any tag outside the known set (kept verbatim for error messages).
    Other(String),
}

impl AttributeType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "INTEGER" => Self::Integer,
            "DATE" => Self::Date,
            "BOOLEAN" => Self::Boolean,
            "QUANTITY" => Self::Quantity,
            "DECIMAL" => Self::Decimal,
            "STRING" => Self::String,
            "TEXT" => Self::Text,
            "RATING" => Self::Rating,
            "STATE" => Self::State,
            "OBJECT" => Self::Object,
            "COLLECTION" => Self::Collection,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Integer => "INTEGER",
            Self::Date => "DATE",
            Self::Boolean => "BOOLEAN",
            Self::Quantity => "QUANTITY",
            Self::Decimal => "DECIMAL",
            Self::String => "STRING",
            Self::Text => "TEXT",
            Self::Rating => "RATING",
            Self::State => "STATE",
            Self::Object => "OBJECT",
            Self::Collection => "COLLECTION",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for AttributeType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<&str> for AttributeType {
    fn from(tag: &str) -> Self {
        Self::from_tag(tag)
    }
}

impl From<AttributeType> for String {
    fn from(ty: AttributeType) -> Self {
        ty.tag().to_string()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One attribute of a remote work-item type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub attribute_type: AttributeType,
    /// Target type of `OBJECT` / `COLLECTION` attributes (e.g. `User`).
    #[serde(default)]
    pub schema_type: Option<String>,
    /// Allowed labels of `RATING` / `STATE` attributes, in ALM order.
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

impl AttributeDef {
    pub fn new(name: &str, attribute_type: impl Into<AttributeType>) -> Self {
        Self {
            name: name.to_string(),
            attribute_type: attribute_type.into(),
            schema_type: None,
            allowed_values: Vec::new(),
        }
    }

    pub fn with_schema_type(mut self, schema_type: &str) -> Self {
        self.schema_type = Some(schema_type.to_string());
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_user_reference(&self) -> bool {
        self.attribute_type == AttributeType::Object
            && self.schema_type.as_deref() == Some(USER_SCHEMA_TYPE)
    }
}

/// Schema descriptor of one work-item type (`Defect`, `Feature`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: String,
    pub attributes: Vec<AttributeDef>,
}

impl EntityTypeDef {
    pub fn new(name: &str, attributes: Vec<AttributeDef>) -> Self {
        Self {
            name: name.to_string(),
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Workflow states of one entity type: `(state ObjectID, label)` in ALM order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLabels {
    states: Vec<(i64, String)>,
}

impl StateLabels {
    pub fn new(states: Vec<(i64, String)>) -> Self {
        Self { states }
    }

    pub fn label(&self, state_id: i64) -> Option<&str> {
        self.states
            .iter()
            .find(|(id, _)| *id == state_id)
            .map(|(_, label)| label.as_str())
    }

    pub fn labels(&self) -> Vec<String> {
        self.states.iter().map(|(_, label)| label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// ============================================================================
// Column model
// ============================================================================

/// Target column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    BigInt,
    TimestampTz,
    Boolean,
    Numeric,
    Text,
}

impl SqlType {
    /// Column definition used in `ADD COLUMN`.
    pub fn ddl(&self) -> &'static str {
        match self {
            Self::BigInt => "bigint",
            Self::TimestampTz => "timestamp with time zone",
            Self::Boolean => "boolean default false",
            Self::Numeric => "numeric",
            Self::Text => "text",
        }
    }

    /// Bare type name, usable in `CAST(... AS <type>)`.
    pub fn cast_name(&self) -> &'static str {
        match self {
            Self::BigInt => "bigint",
            Self::TimestampTz => "timestamptz",
            Self::Boolean => "boolean",
            Self::Numeric => "numeric",
            Self::Text => "text",
        }
    }

    /// Values of numeric columns are rendered as bare literals.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::BigInt | Self::Numeric)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ddl())
    }
}

/// How user references are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserResolution {
    /// Bare user ObjectID (`bigint`).
    ById,
    /// The user's display name (`text`).
    ByName,
}

/// Semantic category of a column; drives both DDL and value projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnCategory {
    /// Plain value of the given type.
    Scalar(SqlType),
    /// `RATING` / `STATE` label constrained to the allowed values.
    Enumerated(Vec<String>),
    /// Reference to another object, stored as its ObjectID.
    Reference,
    UserReference(UserResolution),
    /// Workflow-state reference stored as its label; carries the label set.
    StateReference(Vec<String>),
    /// One-to-many relationship; has no column.
    Collection,
}

impl ColumnCategory {
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Self::Scalar(ty) => Some(*ty),
            Self::Enumerated(_) | Self::StateReference(_) => Some(SqlType::Text),
            Self::Reference => Some(SqlType::BigInt),
            Self::UserReference(UserResolution::ById) => Some(SqlType::BigInt),
            Self::UserReference(UserResolution::ByName) => Some(SqlType::Text),
            Self::Collection => None,
        }
    }

    /// Values for the column's `CHECK (... IN (...))` constraint.
    pub fn allowed_values(&self) -> Option<&[String]> {
        match self {
            Self::Enumerated(values) | Self::StateReference(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection)
    }
}

/// Normalized column derived from one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Remote attribute name, used to read record values.
    pub attribute: String,
    /// Target column name.
    pub column: String,
    pub category: ColumnCategory,
    /// True for the `ObjectID` column.
    pub identifier: bool,
}

impl ColumnSpec {
    pub fn sql_type(&self) -> Option<SqlType> {
        self.category.sql_type()
    }
}
