//! Multi-item transactions
//!
//! `insert_op` / `update_op` compute a write without executing it:
//! derived attributes, translated expressions, and the broadcast event
//! are all precomputed. A [`TransactionCoordinator`] collects these
//! [`TransactItem`]s, hands the write ops to the backend's atomic
//! `transact`, and publishes every event only after the whole group
//! committed. On failure nothing is applied and nothing is broadcast.
//!
//! `update_op`'s broadcast payload is the current row merged with the
//! pending update, fetched before commit. That read is not atomic with
//! the commit, so a concurrent writer can make the payload stale; the
//! committed attributes themselves are never affected.

use crate::entity::Entity;
use crate::sink::{ChangeEvent, ChangeSink};
use std::sync::Arc;
use tracing::{debug, info};
use unitable_core::{
    Condition, EngineError, EntitySchema, FieldMap, Meta, Result, StoreError,
};
use unitable_store::{StoreBackend, TransactOp};

/// A deferred, precomputed write plus its broadcast event
#[derive(Debug, Clone)]
pub struct TransactItem {
    pub(crate) op: TransactOp,
    pub(crate) event: ChangeEvent,
}

impl TransactItem {
    /// The event that will be broadcast if the group commits
    pub fn event(&self) -> &ChangeEvent {
        &self.event
    }
}

impl<S: EntitySchema> Entity<S> {
    /// Precompute an insert as a transaction member
    ///
    /// Same derivation and implicit guard as [`Entity::insert`], but
    /// nothing is written until the owning coordinator commits.
    pub fn insert_op(
        &self,
        value: S::Value,
        condition: Option<Condition>,
    ) -> Result<TransactItem> {
        let (_pk, _sk, item, guard) = self.build_insert(&value, condition)?;
        let meta = Meta::from_item(&item).ok_or_else(|| EngineError::EncodeFailed {
            entity: S::ENTITY.to_string(),
            reason: "built item is missing metadata attributes".to_string(),
        })?;
        let event = self.event_for(&item, &meta);
        Ok(TransactItem {
            op: TransactOp::Put {
                item,
                condition: Some(guard),
            },
            event,
        })
    }

    /// Precompute a partial update as a transaction member
    ///
    /// The broadcast payload is the currently stored row merged with the
    /// pending update. The row must exist at preparation time.
    pub fn update_op(
        &self,
        key_fields: &FieldMap,
        updates: FieldMap,
        condition: Option<Condition>,
    ) -> Result<TransactItem> {
        let (pk, sk, update, guard) = self.build_update(key_fields, &updates, condition)?;
        let current =
            self.backend()
                .get_item(&pk, &sk, true)?
                .ok_or_else(|| EngineError::NoItemToUpdate {
                    entity: S::ENTITY.to_string(),
                })?;

        let mut preview = current;
        update.apply(&mut preview);
        let meta = Meta::from_item(&preview).ok_or_else(|| EngineError::DecodeFailed {
            entity: S::ENTITY.to_string(),
            reason: "stored item is missing metadata attributes".to_string(),
        })?;
        let event = self.event_for(&preview, &meta);

        Ok(TransactItem {
            op: TransactOp::Update {
                partition_key: pk,
                sort_key: sk,
                update,
                condition: Some(guard),
            },
            event,
        })
    }
}

/// Collects transaction members and commits them atomically
pub struct TransactionCoordinator {
    backend: Arc<dyn StoreBackend>,
    sink: Option<Arc<dyn ChangeSink>>,
    items: Vec<TransactItem>,
}

impl TransactionCoordinator {
    /// Start an empty transaction against one backend
    ///
    /// Members may come from different entities as long as they share
    /// this backend.
    pub fn new(backend: Arc<dyn StoreBackend>, sink: Option<Arc<dyn ChangeSink>>) -> Self {
        TransactionCoordinator {
            backend,
            sink,
            items: Vec::new(),
        }
    }

    /// Add a member
    pub fn add(&mut self, item: TransactItem) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Number of members collected so far
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no members were added
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Commit all members atomically, then broadcast their events
    ///
    /// # Errors
    ///
    /// `TransactionFailed` when any member failed its condition; in that
    /// case nothing was applied and nothing is broadcast.
    pub fn commit(self) -> Result<()> {
        if self.items.is_empty() {
            debug!("empty transaction, nothing to commit");
            return Ok(());
        }

        let mut ops = Vec::with_capacity(self.items.len());
        let mut events = Vec::with_capacity(self.items.len());
        for item in self.items {
            ops.push(item.op);
            events.push(item.event);
        }

        match self.backend.transact(ops) {
            Ok(()) => {
                info!(members = events.len(), "transaction committed");
                if let Some(sink) = &self.sink {
                    for event in events {
                        sink.publish(event);
                    }
                }
                Ok(())
            }
            Err(StoreError::TransactionCanceled { reason }) => {
                Err(EngineError::TransactionFailed { reason })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{GetOptions, InsertOptions};
    use crate::sink::CollectingSink;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use unitable_core::{EntityDescriptor, UlidSource};
    use unitable_store::MemoryBackend;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: Option<String>,
        org_id: String,
        balance: i64,
    }

    struct AccountSchema;

    impl EntitySchema for AccountSchema {
        type Value = Account;
        const ENTITY: &'static str = "account";
        const SCHEMA_VERSION: u32 = 1;
        const ID_FIELD: &'static str = "id";
        const FIELDS: &'static [&'static str] = &["id", "org_id", "balance"];
    }

    fn setup() -> (
        Entity<AccountSchema>,
        Arc<MemoryBackend>,
        Arc<CollectingSink>,
    ) {
        let descriptor = EntityDescriptor::builder("account", 1, "id", AccountSchema::FIELDS)
            .partition_key(&["org_id"])
            .build()
            .unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let sink = Arc::new(CollectingSink::new());
        let entity = Entity::new(
            Arc::new(descriptor),
            backend.clone(),
            Arc::new(UlidSource::new()),
            Some(sink.clone()),
        )
        .unwrap();
        (entity, backend, sink)
    }

    fn account(balance: i64) -> Account {
        Account {
            id: None,
            org_id: "acme".to_string(),
            balance,
        }
    }

    fn key(id: &str) -> FieldMap {
        let mut key = FieldMap::new();
        key.insert("org_id".to_string(), json!("acme"));
        key.insert("id".to_string(), json!(id));
        key
    }

    #[test]
    fn test_commit_applies_all_and_broadcasts() {
        let (entity, backend, sink) = setup();
        let a = entity.insert(account(100), InsertOptions::default()).unwrap();
        let b = entity.insert(account(0), InsertOptions::default()).unwrap();
        let published_before = sink.len();

        let a_key = key(a.value.id.as_deref().unwrap());
        let b_key = key(b.value.id.as_deref().unwrap());
        let mut debit = FieldMap::new();
        debit.insert("balance".to_string(), json!(60));
        let mut credit = FieldMap::new();
        credit.insert("balance".to_string(), json!(40));

        let mut txn = TransactionCoordinator::new(backend, Some(sink.clone()));
        txn.add(entity.update_op(&a_key, debit, None).unwrap());
        txn.add(entity.update_op(&b_key, credit, None).unwrap());
        assert_eq!(txn.len(), 2);
        txn.commit().unwrap();

        let a_now = entity.get(&a_key, GetOptions::default()).unwrap().unwrap();
        let b_now = entity.get(&b_key, GetOptions::default()).unwrap().unwrap();
        assert_eq!(a_now.value.balance, 60);
        assert_eq!(b_now.value.balance, 40);

        let events = sink.events();
        assert_eq!(events.len(), published_before + 2);
        assert_eq!(events[published_before].value["balance"], json!(60));
    }

    #[test]
    fn test_failed_member_rolls_back_everything() {
        let (entity, backend, sink) = setup();
        let a = entity.insert(account(100), InsertOptions::default()).unwrap();
        let a_key = key(a.value.id.as_deref().unwrap());
        let published_before = sink.len();

        let mut debit = FieldMap::new();
        debit.insert("balance".to_string(), json!(60));

        let mut txn = TransactionCoordinator::new(backend, Some(sink.clone()));
        txn.add(entity.update_op(&a_key, debit, None).unwrap());
        // Guard that can never hold
        txn.add(
            entity
                .update_op(
                    &a_key,
                    FieldMap::new(),
                    Some(Condition::eq("balance", 999)),
                )
                .unwrap(),
        );
        let err = txn.commit().unwrap_err();
        assert!(matches!(err, EngineError::TransactionFailed { .. }));

        // Nothing applied, nothing broadcast
        let a_now = entity.get(&a_key, GetOptions::default()).unwrap().unwrap();
        assert_eq!(a_now.value.balance, 100);
        assert_eq!(sink.len(), published_before);
    }

    #[test]
    fn test_insert_op_defers_the_write() {
        let (entity, backend, _sink) = setup();
        let item = entity.insert_op(account(5), None).unwrap();
        assert_eq!(item.event().entity, "account");

        // Not visible until commit
        let id = item.event().value["id"].as_str().unwrap().to_string();
        assert!(entity
            .get(&key(&id), GetOptions::default())
            .unwrap()
            .is_none());

        let mut txn = TransactionCoordinator::new(backend, None);
        txn.add(item);
        txn.commit().unwrap();
        let got = entity.get(&key(&id), GetOptions::default()).unwrap().unwrap();
        assert_eq!(got.value.balance, 5);
    }

    #[test]
    fn test_update_op_preview_merges_pending_fields() {
        let (entity, _backend, _sink) = setup();
        let a = entity.insert(account(100), InsertOptions::default()).unwrap();
        let a_key = key(a.value.id.as_deref().unwrap());

        let mut updates = FieldMap::new();
        updates.insert("balance".to_string(), json!(42));
        let item = entity.update_op(&a_key, updates, None).unwrap();
        assert_eq!(item.event().value["balance"], json!(42));
        assert!(item.event().meta.token > a.meta.token);
    }

    #[test]
    fn test_update_op_requires_existing_row() {
        let (entity, _backend, _sink) = setup();
        let err = entity
            .update_op(&key("missing"), FieldMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::NoItemToUpdate { .. }));
    }

    #[test]
    fn test_empty_transaction_commits() {
        let (_entity, backend, sink) = setup();
        let txn = TransactionCoordinator::new(backend, Some(sink.clone()));
        assert!(txn.is_empty());
        txn.commit().unwrap();
        assert_eq!(sink.len(), 0);
    }
}
