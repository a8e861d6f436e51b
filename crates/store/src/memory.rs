//! In-process partitioned wide-column backend
//!
//! Items live in a two-level ordered map (partition key → sort key →
//! item) behind a single `parking_lot::RwLock`; each backend call takes
//! the lock once for its duration and nothing is held across calls.
//!
//! Secondary-index queries select items whose derived index attributes
//! are materialized (the sparse-index rule) and order them by the index
//! sort key; there is no separate index structure to keep in sync, so
//! an item's index membership is always exactly its attributes.
//!
//! `transact` is two-phase under the write lock: every member's
//! condition is validated against pre-transaction state, then all
//! writes are applied. Nothing is applied if any member fails.

use crate::backend::{StoreBackend, TransactOp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;
use unitable_core::{
    index_partition_attr, index_sort_attr, Condition, Item, QueryRequest, StoreError, Update,
    ATTR_ENTITY, ATTR_PK, ATTR_SK,
};

type Partition = BTreeMap<String, Item>;

/// In-memory wide-column store emulation
#[derive(Debug, Default)]
pub struct MemoryBackend {
    partitions: RwLock<BTreeMap<String, Partition>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of physically stored rows (soft-deleted included)
    ///
    /// Test support: the soft-delete invariant is "row count unchanged".
    pub fn row_count(&self) -> usize {
        self.partitions.read().values().map(Partition::len).sum()
    }
}

/// Evaluate a condition against a stored row or its absence
fn condition_passes(existing: Option<&Item>, condition: Option<&Condition>) -> bool {
    match existing {
        Some(item) => condition.map_or(true, |c| c.matches(item)),
        None => condition.map_or(true, Condition::holds_on_missing),
    }
}

/// Extract the mandatory primary key attributes of a complete item
fn primary_key_of(item: &Item) -> Result<(String, String), StoreError> {
    let pk = item
        .get_str(ATTR_PK)
        .ok_or_else(|| StoreError::Backend("item is missing its 'pk' attribute".to_string()))?;
    let sk = item
        .get_str(ATTR_SK)
        .ok_or_else(|| StoreError::Backend("item is missing its 'sk' attribute".to_string()))?;
    Ok((pk.to_string(), sk.to_string()))
}

impl StoreBackend for MemoryBackend {
    fn get_item(
        &self,
        partition_key: &str,
        sort_key: &str,
        _consistent: bool,
    ) -> Result<Option<Item>, StoreError> {
        let partitions = self.partitions.read();
        Ok(partitions
            .get(partition_key)
            .and_then(|p| p.get(sort_key))
            .cloned())
    }

    fn put_item(&self, item: Item, condition: Option<&Condition>) -> Result<(), StoreError> {
        let (pk, sk) = primary_key_of(&item)?;
        let mut partitions = self.partitions.write();
        let existing = partitions.get(&pk).and_then(|p| p.get(&sk));
        if !condition_passes(existing, condition) {
            return Err(StoreError::ConditionFailed);
        }
        partitions.entry(pk).or_default().insert(sk, item);
        Ok(())
    }

    fn update_item(
        &self,
        partition_key: &str,
        sort_key: &str,
        update: &Update,
        condition: Option<&Condition>,
    ) -> Result<Item, StoreError> {
        let mut partitions = self.partitions.write();
        let item = partitions
            .get_mut(partition_key)
            .and_then(|p| p.get_mut(sort_key))
            .ok_or(StoreError::ConditionFailed)?;
        if let Some(c) = condition {
            if !c.matches(item) {
                return Err(StoreError::ConditionFailed);
            }
        }
        update.apply(item);
        Ok(item.clone())
    }

    fn query(&self, request: &QueryRequest) -> Result<Vec<Item>, StoreError> {
        let partitions = self.partitions.read();

        // Collect (index sort key, primary sort key, item), ascending
        let mut matches: Vec<(String, String, Item)> = Vec::new();
        match &request.index {
            None => {
                if let Some(partition) = partitions.get(&request.partition_key) {
                    for (sk, item) in partition {
                        matches.push((sk.clone(), sk.clone(), item.clone()));
                    }
                }
            }
            Some(physical_id) => {
                let pk_attr = index_partition_attr(physical_id);
                let sk_attr = index_sort_attr(physical_id);
                for partition in partitions.values() {
                    for item in partition.values() {
                        // Sparse rule: only materialized index attributes match
                        if item.get_str(&pk_attr) != Some(request.partition_key.as_str()) {
                            continue;
                        }
                        let Some(index_sk) = item.get_str(&sk_attr) else {
                            continue;
                        };
                        let primary_sk = item.get_str(ATTR_SK).unwrap_or_default().to_string();
                        matches.push((index_sk.to_string(), primary_sk, item.clone()));
                    }
                }
                matches.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
            }
        }

        if let Some(sort) = &request.sort {
            matches.retain(|(sk, _, _)| sort.admits(sk));
        }
        if let Some(filter) = &request.filter {
            matches.retain(|(_, _, item)| filter.matches(item));
        }
        if !request.scan_forward {
            matches.reverse();
        }
        if let Some(limit) = request.limit {
            matches.truncate(limit);
        }

        debug!(
            partition = %request.partition_key,
            index = request.index.as_deref().unwrap_or("primary"),
            results = matches.len(),
            "memory query"
        );
        Ok(matches.into_iter().map(|(_, _, item)| item).collect())
    }

    fn transact(&self, ops: Vec<TransactOp>) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write();

        // Phase 1: validate every condition against pre-transaction state
        for (position, op) in ops.iter().enumerate() {
            let passed = match op {
                TransactOp::Put { item, condition } => {
                    let (pk, sk) = primary_key_of(item)?;
                    let existing = partitions.get(&pk).and_then(|p| p.get(&sk));
                    condition_passes(existing, condition.as_ref())
                }
                TransactOp::Update {
                    partition_key,
                    sort_key,
                    condition,
                    ..
                } => {
                    let existing = partitions.get(partition_key).and_then(|p| p.get(sort_key));
                    existing.is_some() && condition_passes(existing, condition.as_ref())
                }
            };
            if !passed {
                return Err(StoreError::TransactionCanceled {
                    reason: format!("operation {position} failed its condition"),
                });
            }
        }

        // Phase 2: apply all writes
        for op in ops {
            match op {
                TransactOp::Put { item, .. } => {
                    let (pk, sk) = primary_key_of(&item)?;
                    partitions.entry(pk).or_default().insert(sk, item);
                }
                TransactOp::Update {
                    partition_key,
                    sort_key,
                    update,
                    ..
                } => {
                    if let Some(item) = partitions
                        .get_mut(&partition_key)
                        .and_then(|p| p.get_mut(&sort_key))
                    {
                        update.apply(item);
                    }
                }
            }
        }
        Ok(())
    }

    fn clear_entity(&self, entity: &str) -> Result<usize, StoreError> {
        let mut partitions = self.partitions.write();
        let mut removed = 0;
        for partition in partitions.values_mut() {
            let before = partition.len();
            partition.retain(|_, item| item.get_str(ATTR_ENTITY) != Some(entity));
            removed += before - partition.len();
        }
        partitions.retain(|_, p| !p.is_empty());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unitable_core::SortCondition;

    fn item(pk: &str, sk: &str, extra: &[(&str, serde_json::Value)]) -> Item {
        let mut it = Item::new();
        it.set(ATTR_PK, json!(pk));
        it.set(ATTR_SK, json!(sk));
        it.set(ATTR_ENTITY, json!("user"));
        for (k, v) in extra {
            it.set(*k, v.clone());
        }
        it
    }

    #[test]
    fn test_put_get_round_trip() {
        let backend = MemoryBackend::new();
        backend.put_item(item("user#1", "a", &[]), None).unwrap();
        let got = backend.get_item("user#1", "a", false).unwrap().unwrap();
        assert_eq!(got.get_str(ATTR_SK), Some("a"));
        assert!(backend.get_item("user#1", "b", false).unwrap().is_none());
    }

    #[test]
    fn test_conditional_put_rejects() {
        let backend = MemoryBackend::new();
        backend.put_item(item("user#1", "a", &[]), None).unwrap();
        let err = backend
            .put_item(
                item("user#1", "a", &[]),
                Some(&Condition::not_exists(ATTR_PK)),
            )
            .unwrap_err();
        assert!(err.is_condition_failed());
        // Missing row: the not-exists guard passes
        backend
            .put_item(
                item("user#1", "b", &[]),
                Some(&Condition::not_exists(ATTR_PK)),
            )
            .unwrap();
    }

    #[test]
    fn test_update_missing_row_is_condition_failure() {
        let backend = MemoryBackend::new();
        let err = backend
            .update_item("user#1", "a", &Update::new().set("x", 1), None)
            .unwrap_err();
        assert!(err.is_condition_failed());
    }

    #[test]
    fn test_update_returns_new_attributes() {
        let backend = MemoryBackend::new();
        backend
            .put_item(item("user#1", "a", &[("n", json!(1))]), None)
            .unwrap();
        let updated = backend
            .update_item(
                "user#1",
                "a",
                &Update::new().set("n", 2).remove("missing"),
                Some(&Condition::eq("n", 1)),
            )
            .unwrap();
        assert_eq!(updated.get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_primary_query_ordering_and_range() {
        let backend = MemoryBackend::new();
        for sk in ["a", "b", "c", "d", "e"] {
            backend.put_item(item("user#1", sk, &[]), None).unwrap();
        }

        let forward = backend
            .query(&QueryRequest::partition("user#1"))
            .unwrap()
            .iter()
            .map(|i| i.get_str(ATTR_SK).unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(forward, ["a", "b", "c", "d", "e"]);

        let mut req = QueryRequest::partition("user#1");
        req.sort = Some(SortCondition::Gt("c".to_string()));
        let after_c = backend.query(&req).unwrap();
        assert_eq!(after_c.len(), 2);
        assert_eq!(after_c[0].get_str(ATTR_SK), Some("d"));

        let mut req = QueryRequest::partition("user#1");
        req.scan_forward = false;
        req.limit = Some(2);
        let last_two = backend.query(&req).unwrap();
        assert_eq!(last_two[0].get_str(ATTR_SK), Some("e"));
        assert_eq!(last_two[1].get_str(ATTR_SK), Some("d"));
    }

    #[test]
    fn test_index_query_respects_sparse_attributes() {
        let backend = MemoryBackend::new();
        backend
            .put_item(
                item(
                    "user#1",
                    "a",
                    &[("gsi1pk", json!("byEmail#a@x")), ("gsi1sk", json!("001"))],
                ),
                None,
            )
            .unwrap();
        // No index attributes: must never match an index query
        backend.put_item(item("user#1", "b", &[]), None).unwrap();

        let mut req = QueryRequest::partition("byEmail#a@x");
        req.index = Some("gsi1".to_string());
        let hits = backend.query(&req).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get_str(ATTR_SK), Some("a"));
    }

    #[test]
    fn test_transact_is_all_or_nothing() {
        let backend = MemoryBackend::new();
        backend.put_item(item("user#1", "a", &[]), None).unwrap();

        let err = backend
            .transact(vec![
                TransactOp::Put {
                    item: item("user#1", "b", &[]),
                    condition: None,
                },
                TransactOp::Put {
                    item: item("user#1", "a", &[]),
                    condition: Some(Condition::not_exists(ATTR_PK)),
                },
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::TransactionCanceled { .. }));
        assert!(backend.get_item("user#1", "b", false).unwrap().is_none());
        assert_eq!(backend.row_count(), 1);
    }

    #[test]
    fn test_clear_entity_removes_only_that_entity() {
        let backend = MemoryBackend::new();
        backend.put_item(item("user#1", "a", &[]), None).unwrap();
        let mut other = item("task#1", "t", &[]);
        other.set(ATTR_ENTITY, json!("task"));
        backend.put_item(other, None).unwrap();

        let removed = backend.clear_entity("user").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.row_count(), 1);
    }
}
