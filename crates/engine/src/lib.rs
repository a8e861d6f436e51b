//! Entity facade, transactions, and change broadcast
//!
//! This crate is the typed surface of the engine: an [`Entity`] binds
//! an `EntitySchema` to an `EntityDescriptor` over any `StoreBackend`
//! and exposes CRUD, range queries, subscriptions, and transaction
//! preparation. A [`TransactionCoordinator`] commits prepared writes
//! atomically and broadcasts their events through a [`ChangeSink`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod sink;
pub mod txn;

pub use entity::{
    Entity, GetOptions, InsertOptions, QueryKey, QueryOptions, SubscribeRequest, UpdateOptions,
};
pub use sink::{ChangeEvent, ChangeSink, CollectingSink};
pub use txn::{TransactItem, TransactionCoordinator};
