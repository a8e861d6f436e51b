//! Error types for the Unitable engine
//!
//! Two layers of errors exist:
//! - `StoreError`: what a storage backend reports at its boundary.
//!   Conditional-check failures are distinguished from every other
//!   backend failure before anything above interprets them.
//! - `EngineError`: the facade-level taxonomy. Backend conditional
//!   failures are reclassified here (insert conflict, stale update,
//!   canceled transaction); all other backend errors pass through
//!   unchanged inside `EngineError::Store`.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.

use crate::descriptor::DescriptorError;
use crate::key::KeyError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Facade-level error taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    /// Stored or returned data does not match the entity schema on read
    #[error("decode failed for entity '{entity}': {reason}")]
    DecodeFailed {
        /// Entity name
        entity: String,
        /// Decoder diagnostic
        reason: String,
    },

    /// A domain value could not be encoded into stored attributes
    #[error("encode failed for entity '{entity}': {reason}")]
    EncodeFailed {
        /// Entity name
        entity: String,
        /// Encoder diagnostic
        reason: String,
    },

    /// Insert conflict: the derived primary key already exists
    #[error("item already exists for entity '{entity}'")]
    ItemAlreadyExists {
        /// Entity name
        entity: String,
    },

    /// Update target is missing or failed its condition (stale version included)
    #[error("no item to update for entity '{entity}'")]
    NoItemToUpdate {
        /// Entity name
        entity: String,
    },

    /// Delete target is missing
    #[error("no item to delete for entity '{entity}'")]
    NoItemToDelete {
        /// Entity name
        entity: String,
    },

    /// Unknown index name or malformed query condition
    #[error("query failed: {reason}")]
    QueryFailed {
        /// What was wrong with the query
        reason: String,
    },

    /// A member of an atomic write group failed, so the whole group rolled back
    #[error("transaction failed: {reason}")]
    TransactionFailed {
        /// Why the group was rejected
        reason: String,
    },

    /// A mutation referenced a field the entity schema does not declare,
    /// or tried to write a reserved metadata/key attribute
    #[error("invalid field '{field}' for entity '{entity}'")]
    InvalidField {
        /// Entity name
        entity: String,
        /// Offending field name
        field: String,
    },

    /// Key derivation error (missing dependency field, non-scalar segment)
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Descriptor construction or mismatch error
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Backend error passed through unchanged (not locally recovered or retried)
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Storage-backend boundary errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write was rejected by the backend
    #[error("conditional check failed")]
    ConditionFailed,

    /// An atomic write group was rejected; nothing was applied
    #[error("transaction canceled: {reason}")]
    TransactionCanceled {
        /// First failure observed in the group
        reason: String,
    },

    /// SQLite-level failure (relational backend)
    #[error("sqlite error: {0}")]
    Sqlite(String),

    /// Item payload could not be serialized or deserialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when this error is a conditional-write rejection
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, StoreError::ConditionFailed)
    }
}
