//! Shared harness: one test entity exercised against both backends
#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use unitable::{
    CollectingSink, Entity, EntityDescriptor, EntitySchema, Envelope, FieldMap, MemoryBackend,
    SqliteBackend, StoreBackend, UlidSource,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<String>,
    pub org_id: String,
    pub email: Option<String>,
    pub name: String,
}

pub struct UserSchema;

impl EntitySchema for UserSchema {
    type Value = User;
    const ENTITY: &'static str = "user";
    const SCHEMA_VERSION: u32 = 1;
    const ID_FIELD: &'static str = "id";
    const FIELDS: &'static [&'static str] = &["id", "org_id", "email", "name"];
}

pub fn descriptor() -> EntityDescriptor {
    EntityDescriptor::builder("user", 1, "id", UserSchema::FIELDS)
        .partition_key(&["org_id"])
        .secondary_index("byEmail", "gsi1", &["email"])
        .timeline_index("timeline", "gsi2")
        .build()
        .unwrap()
}

/// One backend under test plus the entity facade bound to it
pub struct Harness {
    pub name: &'static str,
    pub backend: Arc<dyn StoreBackend>,
    pub sink: Arc<CollectingSink>,
    pub users: Entity<UserSchema>,
    row_count: Box<dyn Fn() -> usize>,
    _tmp: Option<TempDir>,
}

impl Harness {
    /// Physically stored rows, soft-deleted included
    pub fn row_count(&self) -> usize {
        (self.row_count)()
    }
}

fn memory_harness() -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let sink = Arc::new(CollectingSink::new());
    let users = Entity::new(
        Arc::new(descriptor()),
        backend.clone(),
        Arc::new(UlidSource::new()),
        Some(sink.clone()),
    )
    .unwrap();
    let counter = backend.clone();
    Harness {
        name: "memory",
        backend,
        sink,
        users,
        row_count: Box::new(move || counter.row_count()),
        _tmp: None,
    }
}

fn sqlite_harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(
        SqliteBackend::open(tmp.path().join("unitable.db"), &["gsi1", "gsi2"]).unwrap(),
    );
    let sink = Arc::new(CollectingSink::new());
    let users = Entity::new(
        Arc::new(descriptor()),
        backend.clone(),
        Arc::new(UlidSource::new()),
        Some(sink.clone()),
    )
    .unwrap();
    let counter = backend.clone();
    Harness {
        name: "sqlite",
        backend,
        sink,
        users,
        row_count: Box::new(move || counter.row_count().unwrap()),
        _tmp: Some(tmp),
    }
}

/// Run one test body against every backend
pub fn with_each_backend(test: impl Fn(&Harness)) {
    for harness in [memory_harness(), sqlite_harness()] {
        test(&harness);
    }
}

pub fn user(name: &str, email: Option<&str>) -> User {
    User {
        id: None,
        org_id: "acme".to_string(),
        email: email.map(str::to_string),
        name: name.to_string(),
    }
}

pub fn user_with_id(id: &str, name: &str) -> User {
    User {
        id: Some(id.to_string()),
        org_id: "acme".to_string(),
        email: None,
        name: name.to_string(),
    }
}

pub fn key_of(envelope: &Envelope<User>) -> FieldMap {
    let mut key = FieldMap::new();
    key.insert("org_id".to_string(), json!("acme"));
    key.insert(
        "id".to_string(),
        json!(envelope.value.id.clone().expect("inserted user has an id")),
    );
    key
}

pub fn org_partition() -> FieldMap {
    let mut partition = FieldMap::new();
    partition.insert("org_id".to_string(), json!("acme"));
    partition
}
