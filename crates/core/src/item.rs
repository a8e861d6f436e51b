//! Stored item representation and metadata
//!
//! An [`Item`] is the physical record a backend stores: encoded domain
//! fields, metadata attributes, and derived key attributes in one flat
//! attribute map. Attribute values use `serde_json::Value` as the single
//! canonical representation; JSON `null` counts as "absent" everywhere a
//! presence check matters (sparse indexing, existence conditions).
//!
//! Metadata attribute names are fixed:
//!
//! | attribute | meaning |
//! |-----------|------------------------------|
//! | `_e`      | entity name                  |
//! | `_v`      | schema version               |
//! | `_t`      | change token                 |
//! | `_d`      | soft-delete flag             |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Entity name metadata attribute
pub const ATTR_ENTITY: &str = "_e";
/// Schema version metadata attribute
pub const ATTR_VERSION: &str = "_v";
/// Change token metadata attribute
pub const ATTR_TOKEN: &str = "_t";
/// Soft-delete flag metadata attribute
pub const ATTR_DELETED: &str = "_d";

/// Primary partition key attribute
pub const ATTR_PK: &str = "pk";
/// Primary sort key attribute
pub const ATTR_SK: &str = "sk";

/// All metadata attribute names
pub const META_ATTRS: &[&str] = &[ATTR_ENTITY, ATTR_VERSION, ATTR_TOKEN, ATTR_DELETED];

/// Flat attribute map: field name → JSON value
pub type FieldMap = BTreeMap<String, Value>;

/// A physical stored record
///
/// Domain fields, metadata, and derived key attributes share one flat
/// namespace; metadata and key attributes use reserved names that the
/// facade refuses to accept as domain fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item {
    attrs: FieldMap,
}

impl Item {
    /// Create an empty item
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an item from an attribute map
    pub fn from_attrs(attrs: FieldMap) -> Self {
        Item { attrs }
    }

    /// Get an attribute value
    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.attrs.get(attr)
    }

    /// Get an attribute as a string slice
    pub fn get_str(&self, attr: &str) -> Option<&str> {
        self.attrs.get(attr).and_then(Value::as_str)
    }

    /// True when the attribute is present and non-null
    pub fn is_defined(&self, attr: &str) -> bool {
        matches!(self.attrs.get(attr), Some(v) if !v.is_null())
    }

    /// Set an attribute value
    pub fn set(&mut self, attr: impl Into<String>, value: Value) {
        self.attrs.insert(attr.into(), value);
    }

    /// Remove an attribute, returning its previous value
    pub fn remove(&mut self, attr: &str) -> Option<Value> {
        self.attrs.remove(attr)
    }

    /// Borrow the underlying attribute map
    pub fn attrs(&self) -> &FieldMap {
        &self.attrs
    }

    /// Consume into the underlying attribute map
    pub fn into_attrs(self) -> FieldMap {
        self.attrs
    }

    /// Domain fields only: every attribute not named in `reserved`
    ///
    /// The caller supplies the reserved set (metadata plus the derived
    /// key attributes of the entity's configured indexes).
    pub fn domain_fields(&self, reserved: &[String]) -> FieldMap {
        self.attrs
            .iter()
            .filter(|(k, _)| !reserved.iter().any(|r| r == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Decoded item metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Entity name the item was written as
    pub entity: String,
    /// Schema version stamped at insert
    pub schema_version: u32,
    /// Change token of the last successful write
    pub token: String,
    /// Soft-delete flag
    pub deleted: bool,
}

impl Meta {
    /// Extract metadata from a stored item
    ///
    /// Returns `None` when any metadata attribute is missing or has the
    /// wrong type; callers surface that as a decode failure.
    pub fn from_item(item: &Item) -> Option<Meta> {
        let entity = item.get_str(ATTR_ENTITY)?.to_string();
        let schema_version = item.get(ATTR_VERSION)?.as_u64()? as u32;
        let token = item.get_str(ATTR_TOKEN)?.to_string();
        let deleted = item.get(ATTR_DELETED)?.as_bool()?;
        Some(Meta {
            entity,
            schema_version,
            token,
            deleted,
        })
    }

    /// Stamp this metadata onto an item
    pub fn stamp(&self, item: &mut Item) {
        item.set(ATTR_ENTITY, Value::String(self.entity.clone()));
        item.set(ATTR_VERSION, Value::from(self.schema_version));
        item.set(ATTR_TOKEN, Value::String(self.token.clone()));
        item.set(ATTR_DELETED, Value::Bool(self.deleted));
    }
}

/// The facade's unit of return: typed domain value plus metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Decoded domain value
    pub value: T,
    /// Item metadata
    pub meta: Meta,
}
