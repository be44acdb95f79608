//! Remote attribute type -> target column type.

use crate::model::{AttributeType, SqlType};
use crate::{Result, SchemaError};

/// Map a scalar remote type to its column type.
///
/// Only plain scalar tags are accepted; enumerations, references and
/// collections are categorized by [`crate::translate`] before this is
/// consulted, so reaching here with one of them is an error.
pub fn map_type(remote: &AttributeType) -> Result<SqlType> {
    match remote {
        AttributeType::Integer => Ok(SqlType::BigInt),
        AttributeType::Date => Ok(SqlType::TimestampTz),
        AttributeType::Boolean => Ok(SqlType::Boolean),
        AttributeType::Quantity | AttributeType::Decimal => Ok(SqlType::Numeric),
        AttributeType::String | AttributeType::Text => Ok(SqlType::Text),
        other => Err(SchemaError::UnsupportedType {
            attribute: String::new(),
            tag: other.tag().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KNOWN: [&str; 7] = [
        "INTEGER", "DATE", "BOOLEAN", "QUANTITY", "DECIMAL", "STRING", "TEXT",
    ];

    #[test]
    fn known_tags() {
        let ddl = |tag: &str| map_type(&AttributeType::from_tag(tag)).unwrap().to_string();
        assert_eq!(ddl("INTEGER"), "bigint");
        assert_eq!(ddl("DATE"), "timestamp with time zone");
        assert_eq!(ddl("BOOLEAN"), "boolean default false");
        assert_eq!(ddl("QUANTITY"), "numeric");
        assert_eq!(ddl("DECIMAL"), "numeric");
        assert_eq!(ddl("STRING"), "text");
        assert_eq!(ddl("TEXT"), "text");
    }

    #[test]
    fn non_scalar_tags_are_unsupported() {
        for tag in ["RATING", "STATE", "OBJECT", "COLLECTION", "WEB_LINK"] {
            let err = map_type(&AttributeType::from_tag(tag)).unwrap_err();
            assert!(
                matches!(err, SchemaError::UnsupportedType { tag: ref t, .. } if t == tag),
                "{tag}: {err}"
            );
        }
    }

    proptest! {
        #[test]
        fn known_set_is_total_and_deterministic(idx in 0usize..KNOWN.len()) {
            let ty = AttributeType::from_tag(KNOWN[idx]);
            let first = map_type(&ty).unwrap();
            prop_assert_eq!(first, map_type(&ty).unwrap());
        }

        #[test]
        fn unknown_tags_fail(tag in "[A-Z_]{1,12}") {
            prop_assume!(!KNOWN.contains(&tag.as_str()));
            prop_assert!(map_type(&AttributeType::from_tag(&tag)).is_err());
        }
    }
}
