//! Core types for the Unitable entity engine
//!
//! This crate defines the foundational pieces shared by every layer:
//! - `Item`, `Meta`, `Envelope`: the stored record model
//! - key derivation: composite partition/sort key strings
//! - `EntityDescriptor`: the validated index registry
//! - `Condition` / `Update`: the abstract expression language backends
//!   translate into their native form
//! - query/cursor types, the `EntitySchema` codec seam, and the
//!   change-token source
//! - the error taxonomy (`EngineError`, `StoreError`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod error;
pub mod expr;
pub mod item;
pub mod key;
pub mod query;
pub mod schema;
pub mod token;

pub use descriptor::{
    index_partition_attr, index_sort_attr, DescriptorError, EntityDescriptor,
    EntityDescriptorBuilder, IndexKind, ResolvedIndex, PRIMARY_INDEX,
};
pub use error::{EngineError, Result, StoreError};
pub use expr::{Condition, Update};
pub use item::{
    Envelope, FieldMap, Item, Meta, ATTR_DELETED, ATTR_ENTITY, ATTR_PK, ATTR_SK, ATTR_TOKEN,
    ATTR_VERSION, META_ATTRS,
};
pub use key::{derive_key, has_all_fields, KeyError, KeyKind, KEY_SEPARATOR};
pub use query::{Cursor, Direction, KeyRange, QueryRequest, RangeOp, SortCondition};
pub use schema::EntitySchema;
pub use token::{TokenSource, UlidSource};
