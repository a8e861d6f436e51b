//! Abstract-expression → SQL translation for the relational backend
//!
//! Conditions become WHERE fragments over `json_extract`/`json_type` of
//! the payload column; updates become nested `json_set`/`json_remove`
//! expressions. Attribute paths and values are always bound as
//! parameters, never interpolated.
//!
//! Existence semantics mirror the reference evaluator: an attribute
//! "exists" when `json_type` reports a non-`null` type. JSON `null` is
//! therefore indistinguishable from absence, matching the sparse-index
//! rule.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use unitable_core::{Condition, StoreError, Update};

/// JSON path for a top-level attribute
fn attr_path(attr: &str) -> Result<String, StoreError> {
    // Attribute names come from schemas and descriptors; reject the two
    // characters that would change the meaning of a JSON path.
    if attr.contains('"') || attr.contains('\\') {
        return Err(StoreError::Backend(format!(
            "attribute name '{attr}' cannot form a JSON path"
        )));
    }
    Ok(format!("$.\"{attr}\""))
}

/// Bind a scalar condition value as a native SQL value
///
/// `json_extract` yields native scalars for JSON scalars, so equality
/// comparisons bind TEXT/INTEGER/REAL directly. Structural values have
/// no canonical SQL rendering and are rejected; engine-generated guards
/// are always scalars.
fn scalar_param(value: &Value) -> Result<SqlValue, StoreError> {
    match value {
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(StoreError::Backend(format!(
                    "number {n} is out of range for a condition value"
                )))
            }
        }
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(StoreError::Backend(
            "non-scalar condition values are not supported on the relational backend".to_string(),
        )),
    }
}

/// Render a condition as `(fragment, params)` over the payload column
pub fn condition_sql(condition: &Condition) -> Result<(String, Vec<SqlValue>), StoreError> {
    match condition {
        Condition::Eq(attr, value) => {
            let path = attr_path(attr)?;
            if value.is_null() {
                // Equality with null means "stored as JSON null"
                return Ok((
                    "json_type(payload, ?) = 'null'".to_string(),
                    vec![SqlValue::Text(path)],
                ));
            }
            Ok((
                "json_extract(payload, ?) = ?".to_string(),
                vec![SqlValue::Text(path), scalar_param(value)?],
            ))
        }
        Condition::Exists(attr) => {
            let path = attr_path(attr)?;
            Ok((
                "(json_type(payload, ?) IS NOT NULL AND json_type(payload, ?) <> 'null')"
                    .to_string(),
                vec![SqlValue::Text(path.clone()), SqlValue::Text(path)],
            ))
        }
        Condition::NotExists(attr) => {
            let path = attr_path(attr)?;
            Ok((
                "(json_type(payload, ?) IS NULL OR json_type(payload, ?) = 'null')".to_string(),
                vec![SqlValue::Text(path.clone()), SqlValue::Text(path)],
            ))
        }
        Condition::And(conds) => combine_sql(conds, " AND ", "1"),
        Condition::Or(conds) => combine_sql(conds, " OR ", "0"),
    }
}

fn combine_sql(
    conds: &[Condition],
    joiner: &str,
    empty: &str,
) -> Result<(String, Vec<SqlValue>), StoreError> {
    if conds.is_empty() {
        return Ok((empty.to_string(), Vec::new()));
    }
    let mut fragments = Vec::with_capacity(conds.len());
    let mut params = Vec::new();
    for cond in conds {
        let (frag, mut p) = condition_sql(cond)?;
        fragments.push(format!("({frag})"));
        params.append(&mut p);
    }
    Ok((fragments.join(joiner), params))
}

/// Render an update as a payload expression: `json_remove(json_set(payload, …), …)`
///
/// Set values are bound as JSON text and parsed with `json(?)` so
/// structural values round-trip; removes are JSON paths.
pub fn update_sql(update: &Update) -> Result<(String, Vec<SqlValue>), StoreError> {
    let mut expr = "payload".to_string();
    let mut params = Vec::new();

    if !update.set.is_empty() {
        let mut args = Vec::with_capacity(update.set.len());
        for (attr, value) in &update.set {
            args.push("?, json(?)");
            params.push(SqlValue::Text(attr_path(attr)?));
            let rendered = serde_json::to_string(value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            params.push(SqlValue::Text(rendered));
        }
        expr = format!("json_set({expr}, {})", args.join(", "));
    }

    if !update.remove.is_empty() {
        let mut args = Vec::with_capacity(update.remove.len());
        for attr in &update.remove {
            args.push("?");
            params.push(SqlValue::Text(attr_path(attr)?));
        }
        expr = format!("json_remove({expr}, {})", args.join(", "));
    }

    Ok((expr, params))
}
