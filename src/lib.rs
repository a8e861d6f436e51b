//! Unitable: single-table entity mapping and query engine
//!
//! Define a typed entity once and get identical CRUD, range-query,
//! change-subscription, and multi-item-transaction semantics over two
//! structurally different stores: a partitioned wide-column emulation
//! and embedded SQLite.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use unitable::{
//!     Entity, EntityDescriptor, EntitySchema, GetOptions, InsertOptions, MemoryBackend,
//!     UlidSource,
//! };
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     id: Option<String>,
//!     org_id: String,
//!     email: Option<String>,
//! }
//!
//! struct UserSchema;
//!
//! impl EntitySchema for UserSchema {
//!     type Value = User;
//!     const ENTITY: &'static str = "user";
//!     const SCHEMA_VERSION: u32 = 1;
//!     const ID_FIELD: &'static str = "id";
//!     const FIELDS: &'static [&'static str] = &["id", "org_id", "email"];
//! }
//!
//! # fn main() -> unitable::Result<()> {
//! let descriptor = EntityDescriptor::builder("user", 1, "id", UserSchema::FIELDS)
//!     .partition_key(&["org_id"])
//!     .secondary_index("byEmail", "gsi1", &["email"])
//!     .timeline_index("timeline", "gsi2")
//!     .build()?;
//!
//! let users: Entity<UserSchema> = Entity::new(
//!     Arc::new(descriptor),
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(UlidSource::new()),
//!     None,
//! )?;
//!
//! let inserted = users.insert(
//!     User { id: None, org_id: "acme".into(), email: Some("ada@acme.io".into()) },
//!     InsertOptions::default(),
//! )?;
//! assert!(inserted.value.id.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use unitable_core::{
    derive_key, has_all_fields, index_partition_attr, index_sort_attr, Condition, Cursor,
    DescriptorError, Direction, EngineError, EntityDescriptor, EntityDescriptorBuilder,
    EntitySchema, Envelope, FieldMap, Item, KeyError, KeyKind, KeyRange, Meta, QueryRequest,
    RangeOp, Result, SortCondition, StoreError, TokenSource, UlidSource, Update, ATTR_DELETED,
    ATTR_ENTITY, ATTR_PK, ATTR_SK, ATTR_TOKEN, ATTR_VERSION, KEY_SEPARATOR, PRIMARY_INDEX,
};
pub use unitable_engine::{
    ChangeEvent, ChangeSink, CollectingSink, Entity, GetOptions, InsertOptions, QueryKey,
    QueryOptions, SubscribeRequest, TransactItem, TransactionCoordinator, UpdateOptions,
};
pub use unitable_store::{MemoryBackend, SqliteBackend, StoreBackend, TransactOp};
