//! Multi-item transaction atomicity and broadcast counting

mod common;

use common::*;
use serde_json::json;
use unitable::{
    Condition, EngineError, FieldMap, GetOptions, InsertOptions, TransactionCoordinator,
};

#[test]
fn committed_group_applies_all_members_and_broadcasts_once_each() {
    with_each_backend(|h| {
        let a = h
            .users
            .insert(user_with_id("a", "Ada"), InsertOptions::default())
            .unwrap();
        let published_before = h.sink.len();

        let mut rename = FieldMap::new();
        rename.insert("name".to_string(), json!("Ada L"));

        let mut txn = TransactionCoordinator::new(h.backend.clone(), Some(h.sink.clone()));
        txn.add(h.users.insert_op(user_with_id("b", "Grace"), None).unwrap());
        txn.add(h.users.update_op(&key_of(&a), rename, None).unwrap());
        txn.commit().unwrap();

        let a_now = h.users.get(&key_of(&a), GetOptions::default()).unwrap().unwrap();
        assert_eq!(a_now.value.name, "Ada L", "{}", h.name);
        let mut b_key = FieldMap::new();
        b_key.insert("org_id".to_string(), json!("acme"));
        b_key.insert("id".to_string(), json!("b"));
        let b = h.users.get(&b_key, GetOptions::default()).unwrap().unwrap();
        assert_eq!(b.value.name, "Grace", "{}", h.name);

        // Exactly one event per committed member
        assert_eq!(h.sink.len(), published_before + 2, "{}", h.name);
    });
}

#[test]
fn one_failed_condition_rolls_back_the_whole_group() {
    with_each_backend(|h| {
        let a = h
            .users
            .insert(user_with_id("a", "Ada"), InsertOptions::default())
            .unwrap();
        let rows_before = h.row_count();
        let published_before = h.sink.len();

        let mut rename = FieldMap::new();
        rename.insert("name".to_string(), json!("Ada L"));

        let mut txn = TransactionCoordinator::new(h.backend.clone(), Some(h.sink.clone()));
        txn.add(h.users.insert_op(user_with_id("b", "Grace"), None).unwrap());
        // Member whose guard cannot hold
        txn.add(
            h.users
                .update_op(
                    &key_of(&a),
                    rename,
                    Some(Condition::eq("name", "Somebody Else")),
                )
                .unwrap(),
        );
        let err = txn.commit().unwrap_err();
        assert!(
            matches!(err, EngineError::TransactionFailed { .. }),
            "{}",
            h.name
        );

        // Nothing applied, nothing broadcast
        assert_eq!(h.row_count(), rows_before, "{}", h.name);
        assert_eq!(h.sink.len(), published_before, "{}", h.name);
        let a_now = h.users.get(&key_of(&a), GetOptions::default()).unwrap().unwrap();
        assert_eq!(a_now.value.name, "Ada", "{}", h.name);
    });
}

#[test]
fn duplicate_insert_member_cancels_the_group() {
    with_each_backend(|h| {
        h.users
            .insert(user_with_id("a", "Ada"), InsertOptions::default())
            .unwrap();
        let rows_before = h.row_count();

        let mut txn = TransactionCoordinator::new(h.backend.clone(), Some(h.sink.clone()));
        txn.add(h.users.insert_op(user_with_id("b", "Grace"), None).unwrap());
        txn.add(h.users.insert_op(user_with_id("a", "Imposter"), None).unwrap());
        let err = txn.commit().unwrap_err();
        assert!(
            matches!(err, EngineError::TransactionFailed { .. }),
            "{}",
            h.name
        );
        assert_eq!(h.row_count(), rows_before, "{}", h.name);
    });
}

#[test]
fn events_carry_the_merged_pending_state() {
    with_each_backend(|h| {
        let a = h
            .users
            .insert(user_with_id("a", "Ada"), InsertOptions::default())
            .unwrap();
        let published_before = h.sink.len();

        let mut rename = FieldMap::new();
        rename.insert("name".to_string(), json!("Ada L"));
        let mut txn = TransactionCoordinator::new(h.backend.clone(), Some(h.sink.clone()));
        txn.add(h.users.update_op(&key_of(&a), rename, None).unwrap());
        txn.commit().unwrap();

        let events = h.sink.events();
        let event = &events[published_before];
        assert_eq!(event.entity, "user", "{}", h.name);
        assert_eq!(event.value["name"], json!("Ada L"), "{}", h.name);
        assert!(event.meta.token > a.meta.token, "{}", h.name);
    });
}
