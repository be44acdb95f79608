//! Type definition -> normalized column model.

use crate::model::{
    AttributeDef, AttributeType, ColumnCategory, ColumnSpec, EntityTypeDef, SqlType,
    StateLabels, UserResolution, FORMATTED_ID_ATTRIBUTE, IDENTIFIER_ATTRIBUTE,
    WORKFLOW_STATE_ATTRIBUTE,
};
use crate::sql::storage_name;
use crate::typemap::map_type;
use crate::{Result, SchemaError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// How allowlist entries are matched against attribute names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMatch {
    /// Whole-word match: `State` does not select `ScheduleState`.
    #[default]
    Word,
    /// Legacy unanchored substring match against the raw list, so a list naming
    /// only `ScheduleState` also selects `State`. Only for reproducing old tables.
    Substring,
}

/// The configured `fetch` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAllowlist {
    raw: String,
    fields: Vec<String>,
    words: BTreeSet<String>,
    mode: FieldMatch,
}

fn field_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]+").expect("valid regex"))
}

impl FieldAllowlist {
    pub fn parse(raw: &str, mode: FieldMatch) -> Self {
        let fields: Vec<String> = field_separator()
            .split(raw)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        let words = fields.iter().cloned().collect();
        Self {
            raw: raw.to_string(),
            fields,
            words,
            mode,
        }
    }

    pub fn matches(&self, attribute: &str) -> bool {
        match self.mode {
            FieldMatch::Word => self.words.contains(attribute),
            FieldMatch::Substring => !attribute.is_empty() && self.raw.contains(attribute),
        }
    }

    /// Entries in configuration order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn mode(&self) -> FieldMatch {
        self.mode
    }
}

/// Configuration-driven translation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatePolicy {
    pub users: UserResolution,
}

impl Default for TranslatePolicy {
    fn default() -> Self {
        Self {
            users: UserResolution::ById,
        }
    }
}

/// Source of per-entity workflow states.
///
/// Implementations are expected to cache: the translator and the record
/// projector both ask for the same entity.
pub trait StateCatalog {
    fn states(&mut self, entity: &str) -> Result<StateLabels>;
}

/// Translate the allowlisted attributes of `typedef` into column specs.
///
/// Attributes keep their type-definition order. `ObjectID` is always
/// included since every row is keyed by it.
pub fn translate(
    typedef: &EntityTypeDef,
    allowlist: &FieldAllowlist,
    policy: &TranslatePolicy,
    states: &mut dyn StateCatalog,
) -> Result<Vec<ColumnSpec>> {
    let mut columns = Vec::new();
    for attr in &typedef.attributes {
        let identifier = attr.name == IDENTIFIER_ATTRIBUTE;
        if !identifier && !allowlist.matches(&attr.name) {
            continue;
        }
        let spec = translate_attribute(&typedef.name, attr, identifier, policy, states)?;
        if spec.category.is_collection() {
            tracing::warn!(
                entity = %typedef.name,
                attribute = %attr.name,
                attribute_type = %attr.attribute_type,
                "skipping attribute: collection-valued attributes are not supported"
            );
        }
        columns.push(spec);
    }

    if !columns.iter().any(|c| c.identifier) {
        return Err(SchemaError::MissingIdentifier {
            entity: typedef.name.clone(),
        });
    }
    Ok(columns)
}

fn translate_attribute(
    entity: &str,
    attr: &AttributeDef,
    identifier: bool,
    policy: &TranslatePolicy,
    states: &mut dyn StateCatalog,
) -> Result<ColumnSpec> {
    let category = if identifier {
        ColumnCategory::Scalar(SqlType::BigInt)
    } else if attr.name == FORMATTED_ID_ATTRIBUTE {
        ColumnCategory::Scalar(SqlType::Text)
    } else {
        match &attr.attribute_type {
            AttributeType::Rating | AttributeType::State => {
                ColumnCategory::Enumerated(attr.allowed_values.clone())
            }
            AttributeType::Object if attr.is_user_reference() => {
                ColumnCategory::UserReference(policy.users)
            }
            AttributeType::Object if attr.name == WORKFLOW_STATE_ATTRIBUTE => {
                ColumnCategory::StateReference(states.states(entity)?.labels())
            }
            AttributeType::Object => ColumnCategory::Reference,
            AttributeType::Collection => ColumnCategory::Collection,
            other => ColumnCategory::Scalar(map_type(other).map_err(|_| {
                SchemaError::UnsupportedType {
                    attribute: attr.name.clone(),
                    tag: other.tag().to_string(),
                }
            })?),
        }
    };

    Ok(ColumnSpec {
        attribute: attr.name.clone(),
        column: storage_name(&attr.name),
        category,
        identifier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FixedStates {
        states: HashMap<String, StateLabels>,
        lookups: usize,
    }

    impl StateCatalog for FixedStates {
        fn states(&mut self, entity: &str) -> Result<StateLabels> {
            self.lookups += 1;
            self.states
                .get(entity)
                .cloned()
                .ok_or_else(|| SchemaError::StateLookup {
                    entity: entity.to_string(),
                    message: "no states".into(),
                })
        }
    }

    fn feature() -> EntityTypeDef {
        EntityTypeDef::new(
            "Feature",
            vec![
                AttributeDef::new("ObjectID", "INTEGER"),
                AttributeDef::new("FormattedID", "STRING"),
                AttributeDef::new("State", "OBJECT").with_schema_type("State"),
                AttributeDef::new("Owner", "OBJECT").with_schema_type("User"),
                AttributeDef::new("Parent", "OBJECT").with_schema_type("Initiative"),
                AttributeDef::new("Tags", "COLLECTION").with_schema_type("Tag"),
                AttributeDef::new("Risk", "RATING").with_allowed_values(["Low", "High"]),
                AttributeDef::new("LeafStoryPlanEstimateTotal", "QUANTITY"),
            ],
        )
    }

    fn feature_states() -> FixedStates {
        let mut states = FixedStates::default();
        states.states.insert(
            "Feature".into(),
            StateLabels::new(vec![(1, "Discovering".into()), (2, "Done".into())]),
        );
        states
    }

    #[test]
    fn word_matching_does_not_select_embedded_names() {
        let list = FieldAllowlist::parse("CreationDate,ObjectID,ScheduleState", FieldMatch::Word);
        assert!(list.matches("ScheduleState"));
        assert!(!list.matches("State"));

        let legacy = FieldAllowlist::parse("CreationDate,ObjectID,ScheduleState", FieldMatch::Substring);
        assert!(legacy.matches("State"));
    }

    #[test]
    fn allowlist_accepts_spaces_and_commas() {
        let list = FieldAllowlist::parse(" Name, Owner  State,", FieldMatch::Word);
        assert_eq!(list.fields(), ["Name", "Owner", "State"]);
    }

    #[test]
    fn categories_follow_attribute_kinds() {
        let list = FieldAllowlist::parse(
            "FormattedID,State,Owner,Parent,Tags,Risk,LeafStoryPlanEstimateTotal",
            FieldMatch::Word,
        );
        let mut states = feature_states();
        let cols = translate(&feature(), &list, &TranslatePolicy::default(), &mut states).unwrap();

        let by_attr = |name: &str| cols.iter().find(|c| c.attribute == name).unwrap();
        assert!(by_attr("ObjectID").identifier);
        assert_eq!(by_attr("FormattedID").category, ColumnCategory::Scalar(SqlType::Text));
        assert_eq!(
            by_attr("State").category,
            ColumnCategory::StateReference(vec!["Discovering".into(), "Done".into()])
        );
        assert_eq!(
            by_attr("Owner").category,
            ColumnCategory::UserReference(UserResolution::ById)
        );
        assert_eq!(by_attr("Parent").category, ColumnCategory::Reference);
        assert_eq!(by_attr("Tags").category, ColumnCategory::Collection);
        assert_eq!(
            by_attr("Risk").category,
            ColumnCategory::Enumerated(vec!["Low".into(), "High".into()])
        );
        assert_eq!(
            by_attr("LeafStoryPlanEstimateTotal").category,
            ColumnCategory::Scalar(SqlType::Numeric)
        );
        assert_eq!(by_attr("LeafStoryPlanEstimateTotal").column, "leafstoryplanestimatetotal");
        assert_eq!(states.lookups, 1);
    }

    #[test]
    fn user_policy_switches_column_type() {
        let list = FieldAllowlist::parse("Owner", FieldMatch::Word);
        let policy = TranslatePolicy {
            users: UserResolution::ByName,
        };
        let cols = translate(&feature(), &list, &policy, &mut feature_states()).unwrap();
        let owner = cols.iter().find(|c| c.attribute == "Owner").unwrap();
        assert_eq!(owner.sql_type(), Some(SqlType::Text));
    }

    #[test]
    fn identifier_is_included_even_when_not_listed() {
        let list = FieldAllowlist::parse("FormattedID", FieldMatch::Word);
        let cols = translate(&feature(), &list, &TranslatePolicy::default(), &mut feature_states())
            .unwrap();
        assert_eq!(
            cols.iter().map(|c| c.attribute.as_str()).collect::<Vec<_>>(),
            ["ObjectID", "FormattedID"]
        );
    }

    #[test]
    fn unknown_scalar_type_is_fatal() {
        let typedef = EntityTypeDef::new(
            "Defect",
            vec![
                AttributeDef::new("ObjectID", "INTEGER"),
                AttributeDef::new("Link", "WEB_LINK"),
            ],
        );
        let list = FieldAllowlist::parse("Link", FieldMatch::Word);
        let err = translate(&typedef, &list, &TranslatePolicy::default(), &mut FixedStates::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnsupportedType { ref attribute, ref tag } if attribute == "Link" && tag == "WEB_LINK"
        ));
    }

    #[test]
    fn missing_identifier_is_reported() {
        let typedef = EntityTypeDef::new("Defect", vec![AttributeDef::new("Name", "STRING")]);
        let list = FieldAllowlist::parse("Name", FieldMatch::Word);
        let err = translate(&typedef, &list, &TranslatePolicy::default(), &mut FixedStates::default())
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingIdentifier { .. }));
    }

    #[test]
    fn translation_is_idempotent() {
        let list = FieldAllowlist::parse("FormattedID,State,Owner,Tags,Risk", FieldMatch::Word);
        let mut states = feature_states();
        let policy = TranslatePolicy::default();
        let first = translate(&feature(), &list, &policy, &mut states).unwrap();
        let second = translate(&feature(), &list, &policy, &mut states).unwrap();
        assert_eq!(first, second);
    }
}
