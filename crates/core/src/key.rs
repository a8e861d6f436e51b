//! Composite key derivation
//!
//! Partition and sort key strings are derived from an entity (or index)
//! name and an ordered list of dependency fields. Segments are joined
//! with a fixed separator:
//!
//! - Partition key: `name#<v1>#<v2>…`, or the bare `name` when the field
//!   list is empty (every instance shares one partition).
//! - Sort key: `<v1>#<v2>…` with no name prefix.
//!
//! Composite sort keys with two or more fields allow leading-subset
//! prefix queries, enabling coarse range scans before a full key is
//! known.
//!
//! Derivation is pure and never consults storage. Callers enforce the
//! sparse-index rule (derive only when every dependency field is
//! defined) via [`has_all_fields`]; [`derive_key`] itself fails on a
//! missing dependency rather than producing a partial key.

use crate::item::FieldMap;
use serde_json::Value;
use thiserror::Error;

/// Separator between key segments
pub const KEY_SEPARATOR: char = '#';

/// Whether a derivation produces a partition key or a sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Partition key: prefixed with the semantic name
    Partition,
    /// Sort key: joined values only
    Sort,
}

/// Key derivation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// A dependency field is missing or null on the value record
    #[error("cannot derive key '{name}': field '{field}' is not defined")]
    MissingField {
        /// Semantic name of the key being derived
        name: String,
        /// The missing dependency field
        field: String,
    },

    /// A dependency field holds a value that cannot form a key segment
    #[error("field '{field}' has non-scalar type '{type_name}', cannot form a key segment")]
    InvalidSegment {
        /// The offending field
        field: String,
        /// JSON type name of the rejected value
        type_name: &'static str,
    },
}

/// Check that every dependency field is defined (present and non-null)
///
/// This is the sparse-index gate: index key attributes are materialized
/// iff this returns true for the index's dependency fields.
pub fn has_all_fields(fields: &[String], values: &FieldMap) -> bool {
    fields
        .iter()
        .all(|f| matches!(values.get(f), Some(v) if !v.is_null()))
}

/// Derive a composite key string
///
/// `name` is the entity or index's semantic name. Fields are looked up
/// in `values` and concatenated in declared order.
///
/// # Errors
///
/// Fails with [`KeyError::MissingField`] if any dependency field is
/// absent or null, and [`KeyError::InvalidSegment`] if a field holds a
/// float, array, or object (key segments must be strings, integers, or
/// booleans).
pub fn derive_key(
    name: &str,
    fields: &[String],
    values: &FieldMap,
    kind: KeyKind,
) -> Result<String, KeyError> {
    let mut segments = Vec::with_capacity(fields.len() + 1);
    if kind == KeyKind::Partition {
        segments.push(name.to_string());
    }

    for field in fields {
        let value = values.get(field).filter(|v| !v.is_null()).ok_or_else(|| {
            KeyError::MissingField {
                name: name.to_string(),
                field: field.clone(),
            }
        })?;
        segments.push(key_segment(field, value)?);
    }

    Ok(segments.join(&KEY_SEPARATOR.to_string()))
}

/// Render one key segment from a scalar JSON value
fn key_segment(field: &str, value: &Value) -> Result<String, KeyError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Ok(u.to_string())
            } else {
                // Floats have no stable lexicographic rendering
                Err(KeyError::InvalidSegment {
                    field: field.to_string(),
                    type_name: "float",
                })
            }
        }
        Value::Null => Err(KeyError::MissingField {
            name: String::new(),
            field: field.to_string(),
        }),
        Value::Array(_) => Err(KeyError::InvalidSegment {
            field: field.to_string(),
            type_name: "array",
        }),
        Value::Object(_) => Err(KeyError::InvalidSegment {
            field: field.to_string(),
            type_name: "object",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // === Partition keys ===

    #[test]
    fn test_partition_key_single_field() {
        let v = values(&[("org_id", json!("acme"))]);
        let key = derive_key("user", &fields(&["org_id"]), &v, KeyKind::Partition).unwrap();
        assert_eq!(key, "user#acme");
    }

    #[test]
    fn test_partition_key_multiple_fields_in_declared_order() {
        let v = values(&[("region", json!("eu")), ("org_id", json!("acme"))]);
        let key = derive_key(
            "user",
            &fields(&["org_id", "region"]),
            &v,
            KeyKind::Partition,
        )
        .unwrap();
        assert_eq!(key, "user#acme#eu");
    }

    #[test]
    fn test_partition_key_empty_fields_degenerates_to_name() {
        let v = FieldMap::new();
        let key = derive_key("settings", &[], &v, KeyKind::Partition).unwrap();
        assert_eq!(key, "settings");
    }

    #[test]
    fn test_index_name_prefix() {
        let v = values(&[("email", json!("a@x"))]);
        let key = derive_key("byEmail", &fields(&["email"]), &v, KeyKind::Partition).unwrap();
        assert_eq!(key, "byEmail#a@x");
    }

    // === Sort keys ===

    #[test]
    fn test_sort_key_has_no_name_prefix() {
        let v = values(&[("id", json!("01ABC"))]);
        let key = derive_key("user", &fields(&["id"]), &v, KeyKind::Sort).unwrap();
        assert_eq!(key, "01ABC");
    }

    #[test]
    fn test_composite_sort_key_allows_prefix_queries() {
        let v = values(&[("year", json!(2024)), ("month", json!("07"))]);
        let key = derive_key("byDate", &fields(&["year", "month"]), &v, KeyKind::Sort).unwrap();
        assert_eq!(key, "2024#07");
        // A leading-subset derivation is a strict prefix of the full key
        let partial = derive_key("byDate", &fields(&["year"]), &v, KeyKind::Sort).unwrap();
        assert!(key.starts_with(&partial));
    }

    // === Segment types ===

    #[test]
    fn test_integer_and_bool_segments() {
        let v = values(&[("n", json!(42)), ("flag", json!(true))]);
        let key = derive_key("t", &fields(&["n", "flag"]), &v, KeyKind::Partition).unwrap();
        assert_eq!(key, "t#42#true");
    }

    #[test]
    fn test_float_segment_rejected() {
        let v = values(&[("score", json!(1.5))]);
        let result = derive_key("t", &fields(&["score"]), &v, KeyKind::Sort);
        assert!(matches!(result, Err(KeyError::InvalidSegment { .. })));
    }

    #[test]
    fn test_object_segment_rejected() {
        let v = values(&[("nested", json!({"a": 1}))]);
        let result = derive_key("t", &fields(&["nested"]), &v, KeyKind::Sort);
        assert!(matches!(
            result,
            Err(KeyError::InvalidSegment {
                type_name: "object",
                ..
            })
        ));
    }

    // === Missing dependencies ===

    #[test]
    fn test_missing_field_fails() {
        let v = values(&[("org_id", json!("acme"))]);
        let result = derive_key("user", &fields(&["org_id", "team"]), &v, KeyKind::Partition);
        assert!(matches!(
            result,
            Err(KeyError::MissingField { ref field, .. }) if field == "team"
        ));
    }

    #[test]
    fn test_null_field_counts_as_missing() {
        let v = values(&[("email", Value::Null)]);
        let result = derive_key("byEmail", &fields(&["email"]), &v, KeyKind::Partition);
        assert!(matches!(result, Err(KeyError::MissingField { .. })));
    }

    #[test]
    fn test_has_all_fields() {
        let v = values(&[("a", json!("x")), ("b", Value::Null)]);
        assert!(has_all_fields(&fields(&["a"]), &v));
        assert!(!has_all_fields(&fields(&["a", "b"]), &v));
        assert!(!has_all_fields(&fields(&["c"]), &v));
        assert!(has_all_fields(&[], &v));
    }

    // === Properties ===

    proptest::proptest! {
        #[test]
        fn prop_partition_key_always_prefixed(name in "[a-zA-Z][a-zA-Z0-9]{0,12}", val in "[a-zA-Z0-9@.-]{1,24}") {
            let v = values(&[("f", Value::String(val))]);
            let key = derive_key(&name, &fields(&["f"]), &v, KeyKind::Partition).unwrap();
            let prefix = format!("{}#", name);
            proptest::prop_assert!(key.starts_with(&prefix));
        }

        #[test]
        fn prop_derivation_is_deterministic(a in "[a-z0-9]{1,16}", b in "[a-z0-9]{1,16}") {
            let v = values(&[("a", Value::String(a)), ("b", Value::String(b))]);
            let f = fields(&["a", "b"]);
            let k1 = derive_key("e", &f, &v, KeyKind::Partition).unwrap();
            let k2 = derive_key("e", &f, &v, KeyKind::Partition).unwrap();
            proptest::prop_assert_eq!(k1, k2);
        }
    }
}
