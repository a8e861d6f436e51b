//! Storage backend contract
//!
//! One trait, two conforming implementations ([`crate::MemoryBackend`]
//! and [`crate::SqliteBackend`]). Everything above this trait — key
//! derivation, expression translation, the entity facade — is
//! parameterized over it and never backend-specific.
//!
//! Semantics every implementation must provide:
//!
//! - `put_item` evaluates its condition against the currently stored
//!   row (or its absence: only non-existence checks hold) and replaces
//!   the row wholesale on success.
//! - `update_item` requires an existing row; a missing row is a
//!   condition failure even when no caller condition was given. It
//!   returns the post-write attributes.
//! - `query` scans exactly one partition, ordered by the routed
//!   index's sort key in the requested direction; rows whose sparse
//!   index attributes are absent never match an index query; the
//!   filter applies before the limit.
//! - `transact` is all-or-nothing: every condition is evaluated
//!   against pre-transaction state, and nothing is applied unless all
//!   members pass.
//! - `clear_entity` is the administrative bulk purge; it is the only
//!   operation that physically removes rows.

use unitable_core::{Condition, Item, QueryRequest, StoreError, Update};

/// A deferred write, executed as part of an atomic group
#[derive(Debug, Clone)]
pub enum TransactOp {
    /// Conditional full-item put
    Put {
        /// The complete item, derived attributes included
        item: Item,
        /// Condition over the currently stored row
        condition: Option<Condition>,
    },
    /// Conditional in-place update
    Update {
        /// Primary partition key
        partition_key: String,
        /// Primary sort key
        sort_key: String,
        /// Translated mutation
        update: Update,
        /// Condition over the currently stored row
        condition: Option<Condition>,
    },
}

/// Storage backend contract required by the engine
pub trait StoreBackend: Send + Sync {
    /// Read one item by primary key
    ///
    /// `consistent` requests a strongly consistent read where the
    /// backend distinguishes; both bundled backends always read their
    /// latest committed state.
    fn get_item(
        &self,
        partition_key: &str,
        sort_key: &str,
        consistent: bool,
    ) -> Result<Option<Item>, StoreError>;

    /// Conditionally write a complete item
    ///
    /// # Errors
    ///
    /// `StoreError::ConditionFailed` when the condition rejects the
    /// currently stored row (or its absence).
    fn put_item(&self, item: Item, condition: Option<&Condition>) -> Result<(), StoreError>;

    /// Conditionally mutate an existing item, returning the new attributes
    ///
    /// # Errors
    ///
    /// `StoreError::ConditionFailed` when the row is missing or the
    /// condition rejects it.
    fn update_item(
        &self,
        partition_key: &str,
        sort_key: &str,
        update: &Update,
        condition: Option<&Condition>,
    ) -> Result<Item, StoreError>;

    /// Ordered single-partition query, optionally routed through a
    /// secondary index (`QueryRequest::index` carries the physical id)
    fn query(&self, request: &QueryRequest) -> Result<Vec<Item>, StoreError>;

    /// Atomic all-or-nothing write group
    ///
    /// # Errors
    ///
    /// `StoreError::TransactionCanceled` when any member fails its
    /// condition; no member is applied in that case.
    fn transact(&self, ops: Vec<TransactOp>) -> Result<(), StoreError>;

    /// Administrative bulk purge: physically remove every row of one
    /// entity, returning the number removed
    fn clear_entity(&self, entity: &str) -> Result<usize, StoreError>;
}
