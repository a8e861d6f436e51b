//! Storage backends for the Unitable entity engine
//!
//! The [`StoreBackend`] trait is the single seam between the typed
//! entity layer and physical storage. Two implementations ship here:
//!
//! - [`MemoryBackend`]: a partitioned ordered map, the wide-column
//!   store shape without a server
//! - [`SqliteBackend`]: an embedded relational store with one `items`
//!   table and mirrored index columns
//!
//! Both honor the same contract (conditional writes, sparse index
//! queries, atomic write groups), so every layer above is tested
//! against both.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod memory;
pub mod sqlite;
mod translate;

pub use backend::{StoreBackend, TransactOp};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
