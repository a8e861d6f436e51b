//! Typed entity facade
//!
//! An [`Entity`] binds one schema to one descriptor over an abstract
//! backend and exposes the full operation surface: get, insert, update,
//! soft delete, range queries, change subscriptions, and the raw query
//! escape hatch. Collaborators (backend, token source, broadcast sink)
//! are explicit constructor dependencies.
//!
//! Concurrency is optimistic only. Every write is a conditional backend
//! write; there are no internal retries, and a rejected condition
//! surfaces as a typed error (`ItemAlreadyExists`, `NoItemToUpdate`,
//! `NoItemToDelete`).

use crate::sink::{ChangeEvent, ChangeSink};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};
use unitable_core::{
    derive_key, has_all_fields, Condition, Cursor, DescriptorError, Direction, EngineError,
    EntityDescriptor, EntitySchema, Envelope, FieldMap, Item, KeyKind, KeyRange, Meta,
    QueryRequest, ResolvedIndex, Result, SortCondition, StoreError, TokenSource, Update,
    ATTR_DELETED, ATTR_PK, ATTR_SK, ATTR_TOKEN, ATTR_VERSION,
};
use unitable_store::StoreBackend;

/// Read options
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Request a strongly consistent read where the backend distinguishes
    pub consistent_read: bool,
}

/// Insert options
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// On primary-key conflict, return the existing item instead of
    /// failing with `ItemAlreadyExists`
    pub ignore_if_already_present: bool,
    /// Extra caller condition, conjoined with the implicit
    /// key-must-not-exist guard
    pub condition: Option<Condition>,
}

/// Update options
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Extra caller condition, conjoined with the implicit
    /// schema-version guard
    pub condition: Option<Condition>,
}

/// Partition plus range of a facade query
#[derive(Debug, Clone)]
pub struct QueryKey {
    /// Partition-key field values
    pub partition: FieldMap,
    /// Sort-key range; the operator implies the scan direction
    pub range: KeyRange,
}

/// Query options
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Truncate the ordered result
    pub limit: Option<usize>,
}

/// A change subscription poll
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    /// Token-sorted index to poll
    pub index: String,
    /// Resume position; `None` means "no position yet", which yields
    /// nothing (the caller must first establish a cursor)
    pub cursor: Option<Cursor>,
    /// Truncate the ordered result
    pub limit: Option<usize>,
}

/// Typed facade over one entity
pub struct Entity<S: EntitySchema> {
    descriptor: Arc<EntityDescriptor>,
    backend: Arc<dyn StoreBackend>,
    tokens: Arc<dyn TokenSource>,
    sink: Option<Arc<dyn ChangeSink>>,
    reserved: Vec<String>,
    _schema: PhantomData<S>,
}

impl<S: EntitySchema> std::fmt::Debug for Entity<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("descriptor", &self.descriptor)
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

impl<S: EntitySchema> Entity<S> {
    /// Bind a schema to a descriptor over a backend
    ///
    /// # Errors
    ///
    /// `DescriptorError::SchemaMismatch` when the descriptor does not
    /// describe this schema (entity name, version, or identifier field
    /// differ).
    pub fn new(
        descriptor: Arc<EntityDescriptor>,
        backend: Arc<dyn StoreBackend>,
        tokens: Arc<dyn TokenSource>,
        sink: Option<Arc<dyn ChangeSink>>,
    ) -> Result<Self> {
        if descriptor.entity() != S::ENTITY
            || descriptor.schema_version() != S::SCHEMA_VERSION
            || descriptor.id_field() != S::ID_FIELD
        {
            return Err(DescriptorError::SchemaMismatch {
                expected: format!("{} v{} (id '{}')", S::ENTITY, S::SCHEMA_VERSION, S::ID_FIELD),
                actual: format!(
                    "{} v{} (id '{}')",
                    descriptor.entity(),
                    descriptor.schema_version(),
                    descriptor.id_field()
                ),
            }
            .into());
        }
        let reserved = descriptor.reserved_attrs();
        Ok(Entity {
            descriptor,
            backend,
            tokens,
            sink,
            reserved,
            _schema: PhantomData,
        })
    }

    /// The bound descriptor
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Read one instance by its key fields
    pub fn get(
        &self,
        key_fields: &FieldMap,
        options: GetOptions,
    ) -> Result<Option<Envelope<S::Value>>> {
        let (pk, sk) = self.primary_keys(key_fields)?;
        match self.backend.get_item(&pk, &sk, options.consistent_read)? {
            Some(item) => Ok(Some(self.decode_envelope(&item)?)),
            None => Ok(None),
        }
    }

    /// Insert a new instance
    ///
    /// Fills the identifier with a fresh token when absent, stamps the
    /// current schema version, and derives every index attribute whose
    /// dependency fields are defined. The write carries an implicit
    /// key-must-not-exist guard.
    pub fn insert(&self, value: S::Value, options: InsertOptions) -> Result<Envelope<S::Value>> {
        let (pk, sk, item, guard) = self.build_insert(&value, options.condition)?;
        match self.backend.put_item(item.clone(), Some(&guard)) {
            Ok(()) => {
                let envelope = self.decode_envelope(&item)?;
                debug!(entity = S::ENTITY, token = %envelope.meta.token, "insert");
                self.broadcast(self.event_for(&item, &envelope.meta));
                Ok(envelope)
            }
            Err(StoreError::ConditionFailed) if options.ignore_if_already_present => {
                let existing = self.backend.get_item(&pk, &sk, true)?.ok_or(
                    EngineError::ItemAlreadyExists {
                        entity: S::ENTITY.to_string(),
                    },
                )?;
                let envelope = self.decode_envelope(&existing)?;
                debug!(entity = S::ENTITY, "insert found existing");
                self.broadcast(self.event_for(&existing, &envelope.meta));
                Ok(envelope)
            }
            Err(StoreError::ConditionFailed) => Err(EngineError::ItemAlreadyExists {
                entity: S::ENTITY.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Partially update an existing instance
    ///
    /// Regenerates the change token, recomputes the index attributes
    /// whose dependencies can be resolved from the key fields and the
    /// update set, and writes conditionally on the caller condition AND
    /// the stored schema version matching this schema's version. The
    /// returned attributes are the backend's post-write state, not a
    /// client-side merge.
    pub fn update(
        &self,
        key_fields: &FieldMap,
        updates: FieldMap,
        options: UpdateOptions,
    ) -> Result<Envelope<S::Value>> {
        let (pk, sk, update, guard) = self.build_update(key_fields, &updates, options.condition)?;
        match self.backend.update_item(&pk, &sk, &update, Some(&guard)) {
            Ok(item) => {
                let envelope = self.decode_envelope(&item)?;
                debug!(entity = S::ENTITY, token = %envelope.meta.token, "update");
                self.broadcast(self.event_for(&item, &envelope.meta));
                Ok(envelope)
            }
            Err(StoreError::ConditionFailed) => Err(EngineError::NoItemToUpdate {
                entity: S::ENTITY.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Soft-delete an existing instance
    ///
    /// Sets the delete flag and regenerates the change token; the row
    /// stays in storage and keeps its place in every index. Physical
    /// removal only happens through [`Entity::clear_all`].
    pub fn delete(&self, key_fields: &FieldMap) -> Result<Envelope<S::Value>> {
        let (pk, sk) = self.primary_keys(key_fields)?;
        if self.backend.get_item(&pk, &sk, true)?.is_none() {
            return Err(EngineError::NoItemToDelete {
                entity: S::ENTITY.to_string(),
            });
        }
        let (pk, sk, update, guard) = self.build_update(key_fields, &FieldMap::new(), None)?;
        let update = update.set(ATTR_DELETED, Value::Bool(true));
        match self.backend.update_item(&pk, &sk, &update, Some(&guard)) {
            Ok(item) => {
                let envelope = self.decode_envelope(&item)?;
                debug!(entity = S::ENTITY, token = %envelope.meta.token, "soft delete");
                self.broadcast(self.event_for(&item, &envelope.meta));
                Ok(envelope)
            }
            Err(StoreError::ConditionFailed) => Err(EngineError::NoItemToDelete {
                entity: S::ENTITY.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Range query in the four-operator shorthand
    ///
    /// `>=` / `>` scan ascending, `<=` / `<` descending; a range with no
    /// bound value scans the whole partition in the implied direction.
    /// The index name `"primary"` addresses the primary derivation.
    pub fn query(
        &self,
        index_name: &str,
        key: QueryKey,
        options: QueryOptions,
    ) -> Result<Vec<Envelope<S::Value>>> {
        let direction = key.range.op.direction();
        self.query_raw(
            index_name,
            &key.partition,
            key.range.sort_condition(),
            direction,
            None,
            options.limit,
        )
    }

    /// Poll a change subscription
    ///
    /// Returns items of the cursor's partition strictly after the
    /// cursor's change token, oldest first. A `None` cursor yields
    /// nothing.
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<Vec<Envelope<S::Value>>> {
        let ix = self.resolve_index(&request.index)?;
        if !ix.is_token_sorted() {
            return Err(EngineError::QueryFailed {
                reason: format!(
                    "index '{}' is not sorted by change token; subscriptions need one that is",
                    request.index
                ),
            });
        }
        let Some(cursor) = request.cursor else {
            return Ok(Vec::new());
        };
        self.query_raw(
            &request.index,
            &cursor.partition,
            Some(SortCondition::Gt(cursor.token)),
            Direction::Ascending,
            None,
            request.limit,
        )
    }

    /// Raw query surface: backend-native range forms and abstract filters
    ///
    /// Same index routing as [`Entity::query`], with `Between` and
    /// `BeginsWith` available and an optional filter applied before the
    /// limit.
    pub fn query_raw(
        &self,
        index_name: &str,
        partition: &FieldMap,
        sort: Option<SortCondition>,
        direction: Direction,
        filter: Option<Condition>,
        limit: Option<usize>,
    ) -> Result<Vec<Envelope<S::Value>>> {
        let ix = self.resolve_index(index_name)?;
        let partition_key = derive_key(
            ix.derivation_name(S::ENTITY),
            ix.partition_fields,
            partition,
            KeyKind::Partition,
        )?;
        let request = QueryRequest {
            index: ix.physical_id.map(str::to_string),
            partition_key,
            sort,
            scan_forward: direction.forward(),
            limit,
            filter,
        };
        let items = self.backend.query(&request)?;
        debug!(
            entity = S::ENTITY,
            index = index_name,
            results = items.len(),
            "query"
        );
        items.iter().map(|item| self.decode_envelope(item)).collect()
    }

    /// Administrative bulk purge: physically remove every stored row of
    /// this entity, returning the number removed
    ///
    /// This is deliberately separate from [`Entity::delete`]; it is the
    /// only path that removes rows.
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self.backend.clear_entity(S::ENTITY)?;
        warn!(entity = S::ENTITY, removed, "cleared all rows");
        Ok(removed)
    }

    // === Internals (shared with the transaction coordinator) ===

    pub(crate) fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    fn resolve_index(&self, name: &str) -> Result<ResolvedIndex<'_>> {
        self.descriptor
            .resolve(name)
            .ok_or_else(|| EngineError::QueryFailed {
                reason: format!("unknown index '{name}'"),
            })
    }

    /// Derive the primary (pk, sk) pair from key field values
    pub(crate) fn primary_keys(&self, values: &FieldMap) -> Result<(String, String)> {
        let pk = derive_key(
            self.descriptor.entity(),
            self.descriptor.primary_partition_fields(),
            values,
            KeyKind::Partition,
        )?;
        let id_fields = [S::ID_FIELD.to_string()];
        let sk = derive_key(self.descriptor.entity(), &id_fields, values, KeyKind::Sort)?;
        Ok((pk, sk))
    }

    pub(crate) fn decode_envelope(&self, item: &Item) -> Result<Envelope<S::Value>> {
        let meta = Meta::from_item(item).ok_or_else(|| EngineError::DecodeFailed {
            entity: S::ENTITY.to_string(),
            reason: "missing or malformed metadata attributes".to_string(),
        })?;
        let value = S::decode(item.domain_fields(&self.reserved))?;
        Ok(Envelope { value, meta })
    }

    pub(crate) fn event_for(&self, item: &Item, meta: &Meta) -> ChangeEvent {
        let value = Value::Object(item.domain_fields(&self.reserved).into_iter().collect());
        ChangeEvent {
            entity: S::ENTITY.to_string(),
            value,
            meta: meta.clone(),
        }
    }

    pub(crate) fn broadcast(&self, event: ChangeEvent) {
        if let Some(sink) = &self.sink {
            sink.publish(event);
        }
    }

    /// Build the complete item and guard for an insert
    pub(crate) fn build_insert(
        &self,
        value: &S::Value,
        condition: Option<Condition>,
    ) -> Result<(String, String, Item, Condition)> {
        let mut fields = S::encode(value)?;
        for name in fields.keys() {
            if !S::FIELDS.contains(&name.as_str()) || self.reserved.iter().any(|r| r == name) {
                return Err(EngineError::InvalidField {
                    entity: S::ENTITY.to_string(),
                    field: name.clone(),
                });
            }
        }

        // Identifier auto-generation: absent or null means "give me one"
        let has_id = matches!(fields.get(S::ID_FIELD), Some(v) if !v.is_null());
        if !has_id {
            fields.insert(
                S::ID_FIELD.to_string(),
                Value::String(self.tokens.next_token()),
            );
        }

        let token = self.tokens.next_token();
        let mut item = Item::from_attrs(fields);
        let meta = Meta {
            entity: S::ENTITY.to_string(),
            schema_version: S::SCHEMA_VERSION,
            token: token.clone(),
            deleted: false,
        };
        meta.stamp(&mut item);

        let (pk, sk) = self.primary_keys(item.attrs())?;
        item.set(ATTR_PK, Value::String(pk.clone()));
        item.set(ATTR_SK, Value::String(sk.clone()));

        // Sparse projections: materialize only fully defined derivations
        for ix in self.descriptor.token_indexes() {
            if has_all_fields(ix.partition_fields, item.attrs()) {
                let index_pk = derive_key(
                    ix.derivation_name(S::ENTITY),
                    ix.partition_fields,
                    item.attrs(),
                    KeyKind::Partition,
                )?;
                item.set(ix.partition_attr(), Value::String(index_pk));
                item.set(ix.sort_attr(), Value::String(token.clone()));
            }
        }

        let guard = match condition {
            Some(c) => Condition::not_exists(ATTR_PK).and(c),
            None => Condition::not_exists(ATTR_PK),
        };
        Ok((pk, sk, item, guard))
    }

    /// Build the translated mutation and guard for a partial update
    ///
    /// Index attributes are recomputed only when every dependency field
    /// is resolvable from the key fields and the update set: all defined
    /// means re-derive, one gone null means drop the projection, and an
    /// unknown stored dependency leaves the projection untouched.
    pub(crate) fn build_update(
        &self,
        key_fields: &FieldMap,
        updates: &FieldMap,
        condition: Option<Condition>,
    ) -> Result<(String, String, Update, Condition)> {
        for name in updates.keys() {
            let declared = S::FIELDS.contains(&name.as_str());
            let reserved = self.reserved.iter().any(|r| r == name);
            let key_field = name == S::ID_FIELD
                || self
                    .descriptor
                    .primary_partition_fields()
                    .iter()
                    .any(|f| f == name);
            if !declared || reserved || key_field {
                return Err(EngineError::InvalidField {
                    entity: S::ENTITY.to_string(),
                    field: name.clone(),
                });
            }
        }

        let (pk, sk) = self.primary_keys(key_fields)?;
        let token = self.tokens.next_token();

        let mut update = Update::new();
        for (attr, value) in updates {
            update = update.set(attr.clone(), value.clone());
        }
        update = update.set(ATTR_TOKEN, Value::String(token.clone()));

        // Everything knowable without reading the stored row
        let mut merged = key_fields.clone();
        for (attr, value) in updates {
            merged.insert(attr.clone(), value.clone());
        }

        for ix in self.descriptor.token_indexes() {
            if !ix.partition_fields.iter().all(|f| merged.contains_key(f)) {
                continue;
            }
            if has_all_fields(ix.partition_fields, &merged) {
                let index_pk = derive_key(
                    ix.derivation_name(S::ENTITY),
                    ix.partition_fields,
                    &merged,
                    KeyKind::Partition,
                )?;
                update = update
                    .set(ix.partition_attr(), Value::String(index_pk))
                    .set(ix.sort_attr(), Value::String(token.clone()));
            } else {
                // A dependency went null: the sparse projection goes away
                update = update.remove(ix.partition_attr()).remove(ix.sort_attr());
            }
        }

        let version_guard = Condition::eq(ATTR_VERSION, S::SCHEMA_VERSION);
        let guard = match condition {
            Some(c) => version_guard.and(c),
            None => version_guard,
        };
        Ok((pk, sk, update, guard))
    }
}
