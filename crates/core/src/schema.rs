//! Entity schema/codec collaborator
//!
//! The engine is generic over an [`EntitySchema`], the seam between
//! typed domain values and the flat attribute maps the backends store.
//! A schema declares its entity name, identifier field, current schema
//! version, and field list (the descriptor builder validates index
//! references against it), and encodes/decodes via serde by default.

use crate::error::EngineError;
use crate::item::FieldMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Typed entity codec
///
/// The default `encode`/`decode` go through `serde_json`; entities are
/// plain serde structs. Implementations only need the associated
/// constants.
pub trait EntitySchema: Send + Sync + 'static {
    /// The typed domain value
    type Value: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Static entity name
    const ENTITY: &'static str;
    /// Current schema version, stamped on insert and guarded on update
    const SCHEMA_VERSION: u32;
    /// Identifier field name (the primary sort key)
    const ID_FIELD: &'static str;
    /// Every declared field name, used for runtime descriptor validation
    const FIELDS: &'static [&'static str];

    /// Encode a domain value into a flat field map
    fn encode(value: &Self::Value) -> Result<FieldMap, EngineError> {
        let encoded = serde_json::to_value(value).map_err(|e| EngineError::EncodeFailed {
            entity: Self::ENTITY.to_string(),
            reason: e.to_string(),
        })?;
        match encoded {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(EngineError::EncodeFailed {
                entity: Self::ENTITY.to_string(),
                reason: format!("expected a JSON object, got {}", type_name(&other)),
            }),
        }
    }

    /// Decode a flat field map back into a domain value
    fn decode(fields: FieldMap) -> Result<Self::Value, EngineError> {
        let object = Value::Object(fields.into_iter().collect());
        serde_json::from_value(object).map_err(|e| EngineError::DecodeFailed {
            entity: Self::ENTITY.to_string(),
            reason: e.to_string(),
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
