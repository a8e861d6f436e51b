//! Entity descriptors and the index registry builder
//!
//! An [`EntityDescriptor`] is the immutable, validated description of one
//! primary index, zero or more named secondary indexes, and an optional
//! timeline index, each as a (physical index id, partition-key field
//! list, sort-key field) triple:
//!
//! - the primary sort key is always the identifier field,
//! - secondary and timeline sort keys are always the change token,
//! - the timeline index reuses the primary partition-key fields.
//!
//! ## Contract
//!
//! The builder validates everything at construction time and fails fast
//! with a descriptive [`DescriptorError`]: every referenced field must
//! exist on the entity's declared field list, no two indexes may share a
//! semantic name or a physical id, the name `primary` is reserved, and
//! at most one timeline index may exist. (The source deferred this to
//! compile-time typing; runtime validation substitutes for it here.)

use crate::item::{ATTR_DELETED, ATTR_ENTITY, ATTR_PK, ATTR_SK, ATTR_TOKEN, ATTR_VERSION};
use std::collections::BTreeMap;
use thiserror::Error;

/// The literal name that addresses the primary index in query calls
pub const PRIMARY_INDEX: &str = "primary";

/// Descriptor construction and mismatch errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// An index references a field the entity schema does not declare
    #[error("entity '{entity}' has no field '{field}' referenced by index '{index}'")]
    UnknownField {
        /// Entity name
        entity: String,
        /// Index semantic name ("primary" for the primary derivation)
        index: String,
        /// The unknown field
        field: String,
    },

    /// The identifier field is not in the declared field list
    #[error("entity '{entity}' does not declare its identifier field '{field}'")]
    UnknownIdField {
        /// Entity name
        entity: String,
        /// The identifier field
        field: String,
    },

    /// Two indexes share a semantic name
    #[error("duplicate index name '{name}'")]
    DuplicateIndexName {
        /// The colliding name
        name: String,
    },

    /// `primary` is reserved for the primary derivation
    #[error("index name 'primary' is reserved")]
    ReservedIndexName,

    /// Two indexes share a physical index id
    #[error("duplicate physical index id '{id}'")]
    DuplicateIndexId {
        /// The colliding id
        id: String,
    },

    /// Physical index ids must be short lowercase identifiers because
    /// they become storage attribute and column names
    #[error("invalid physical index id '{id}' (expected [a-z][a-z0-9_]*)")]
    InvalidIndexId {
        /// The rejected id
        id: String,
    },

    /// More than one timeline index was configured
    #[error("entity '{entity}' already has a timeline index")]
    DuplicateTimeline {
        /// Entity name
        entity: String,
    },

    /// A descriptor was paired with a schema it does not describe
    #[error("descriptor mismatch: expected {expected}, got {actual}")]
    SchemaMismatch {
        /// What the schema declares
        expected: String,
        /// What the descriptor carries
        actual: String,
    },
}

/// One secondary or timeline derivation
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexDef {
    physical_id: String,
    partition_fields: Vec<String>,
}

/// Which derivation an index name resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// The primary (pk, sk) derivation; sort key is the identifier
    Primary,
    /// A named secondary index; sort key is the change token
    Secondary,
    /// The timeline index; primary partition fields, token sort key
    Timeline,
}

/// A resolved view of one index derivation
#[derive(Debug, Clone, Copy)]
pub struct ResolvedIndex<'a> {
    /// Semantic name used in query calls
    pub name: &'a str,
    /// Kind of derivation
    pub kind: IndexKind,
    /// Physical index id (`None` for the primary index)
    pub physical_id: Option<&'a str>,
    /// Ordered partition-key dependency fields
    pub partition_fields: &'a [String],
}

impl ResolvedIndex<'_> {
    /// Storage attribute holding this index's partition key
    pub fn partition_attr(&self) -> String {
        match self.physical_id {
            Some(id) => index_partition_attr(id),
            None => ATTR_PK.to_string(),
        }
    }

    /// Storage attribute holding this index's sort key
    pub fn sort_attr(&self) -> String {
        match self.physical_id {
            Some(id) => index_sort_attr(id),
            None => ATTR_SK.to_string(),
        }
    }

    /// True when the sort key is the change token
    pub fn is_token_sorted(&self) -> bool {
        !matches!(self.kind, IndexKind::Primary)
    }

    /// The semantic name used for partition-key derivation
    ///
    /// Secondary indexes derive under their own name; the primary and
    /// timeline derivations share the entity name (the timeline reuses
    /// the primary partition key verbatim).
    pub fn derivation_name<'b>(&'b self, entity: &'b str) -> &'b str {
        match self.kind {
            IndexKind::Secondary => self.name,
            IndexKind::Primary | IndexKind::Timeline => entity,
        }
    }
}

/// Partition-key attribute name for a physical index id
pub fn index_partition_attr(physical_id: &str) -> String {
    format!("{physical_id}pk")
}

/// Sort-key attribute name for a physical index id
pub fn index_sort_attr(physical_id: &str) -> String {
    format!("{physical_id}sk")
}

/// Immutable, validated entity index registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    entity: String,
    schema_version: u32,
    id_field: String,
    fields: Vec<String>,
    primary_partition_fields: Vec<String>,
    secondary: BTreeMap<String, IndexDef>,
    timeline: Option<(String, IndexDef)>,
}

impl EntityDescriptor {
    /// Start building a descriptor
    ///
    /// `fields` is the entity's declared field list, used to validate
    /// every field reference at construction time.
    pub fn builder(
        entity: &str,
        schema_version: u32,
        id_field: &str,
        fields: &[&str],
    ) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            entity: entity.to_string(),
            schema_version,
            id_field: id_field.to_string(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            primary_partition_fields: Vec::new(),
            secondary: Vec::new(),
            timeline: Vec::new(),
        }
    }

    /// Entity name
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Current schema version
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Identifier field name (always the primary sort key)
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Ordered primary partition-key fields (may be empty)
    pub fn primary_partition_fields(&self) -> &[String] {
        &self.primary_partition_fields
    }

    /// Resolve an index name to its derivation
    ///
    /// `"primary"` resolves to the primary derivation; any other name is
    /// looked up among the secondary and timeline indexes.
    pub fn resolve(&self, name: &str) -> Option<ResolvedIndex<'_>> {
        if name == PRIMARY_INDEX {
            return Some(ResolvedIndex {
                name: PRIMARY_INDEX,
                kind: IndexKind::Primary,
                physical_id: None,
                partition_fields: &self.primary_partition_fields,
            });
        }
        if let Some((key, def)) = self.secondary.get_key_value(name) {
            return Some(ResolvedIndex {
                name: key,
                kind: IndexKind::Secondary,
                physical_id: Some(&def.physical_id),
                partition_fields: &def.partition_fields,
            });
        }
        if let Some((tl_name, def)) = &self.timeline {
            if tl_name == name {
                return Some(ResolvedIndex {
                    name: tl_name,
                    kind: IndexKind::Timeline,
                    physical_id: Some(&def.physical_id),
                    partition_fields: &def.partition_fields,
                });
            }
        }
        None
    }

    /// All token-sorted derivations (secondary indexes plus timeline)
    pub fn token_indexes(&self) -> Vec<ResolvedIndex<'_>> {
        let mut out: Vec<ResolvedIndex<'_>> = self
            .secondary
            .iter()
            .map(|(name, def)| ResolvedIndex {
                name,
                kind: IndexKind::Secondary,
                physical_id: Some(&def.physical_id),
                partition_fields: &def.partition_fields,
            })
            .collect();
        if let Some((name, def)) = &self.timeline {
            out.push(ResolvedIndex {
                name,
                kind: IndexKind::Timeline,
                physical_id: Some(&def.physical_id),
                partition_fields: &def.partition_fields,
            });
        }
        out
    }

    /// Physical index ids in stable order (timeline last)
    pub fn physical_ids(&self) -> Vec<&str> {
        self.token_indexes()
            .into_iter()
            .filter_map(|ix| ix.physical_id)
            .collect()
    }

    /// Every reserved attribute name: metadata plus derived key attributes
    ///
    /// Used to strip non-domain attributes before decoding and to refuse
    /// reserved names in partial updates.
    pub fn reserved_attrs(&self) -> Vec<String> {
        let mut out = vec![
            ATTR_ENTITY.to_string(),
            ATTR_VERSION.to_string(),
            ATTR_TOKEN.to_string(),
            ATTR_DELETED.to_string(),
            ATTR_PK.to_string(),
            ATTR_SK.to_string(),
        ];
        for id in self.physical_ids() {
            out.push(index_partition_attr(id));
            out.push(index_sort_attr(id));
        }
        out
    }
}

/// Builder accumulating a primary derivation, secondary indexes, and an
/// optional timeline index
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    entity: String,
    schema_version: u32,
    id_field: String,
    fields: Vec<String>,
    primary_partition_fields: Vec<String>,
    secondary: Vec<(String, String, Vec<String>)>,
    timeline: Vec<(String, String)>,
}

impl EntityDescriptorBuilder {
    /// Set the primary partition-key fields (in derivation order)
    ///
    /// An empty list (the default) puts every instance in one partition
    /// named after the entity.
    pub fn partition_key(mut self, fields: &[&str]) -> Self {
        self.primary_partition_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add a named secondary index
    ///
    /// `physical_id` becomes the storage attribute/column prefix
    /// (`{id}pk` / `{id}sk`); the sort key is pinned to the change token.
    pub fn secondary_index(mut self, name: &str, physical_id: &str, fields: &[&str]) -> Self {
        self.secondary.push((
            name.to_string(),
            physical_id.to_string(),
            fields.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Add the timeline index
    ///
    /// Partition-key fields are copied from the primary derivation; the
    /// sort key is pinned to the change token.
    pub fn timeline_index(mut self, name: &str, physical_id: &str) -> Self {
        // Duplicate configuration is reported by build(), not here
        self.timeline.push((name.to_string(), physical_id.to_string()));
        self
    }

    /// Validate and construct the descriptor
    pub fn build(self) -> Result<EntityDescriptor, DescriptorError> {
        if !self.fields.contains(&self.id_field) {
            return Err(DescriptorError::UnknownIdField {
                entity: self.entity,
                field: self.id_field,
            });
        }
        for field in &self.primary_partition_fields {
            if !self.fields.contains(field) {
                return Err(DescriptorError::UnknownField {
                    entity: self.entity,
                    index: PRIMARY_INDEX.to_string(),
                    field: field.clone(),
                });
            }
        }

        let mut secondary = BTreeMap::new();
        let mut seen_names = vec![PRIMARY_INDEX.to_string()];
        let mut seen_ids: Vec<String> = Vec::new();

        for (name, physical_id, fields) in self.secondary {
            if name == PRIMARY_INDEX {
                return Err(DescriptorError::ReservedIndexName);
            }
            if seen_names.contains(&name) {
                return Err(DescriptorError::DuplicateIndexName { name });
            }
            validate_physical_id(&physical_id)?;
            if seen_ids.contains(&physical_id) {
                return Err(DescriptorError::DuplicateIndexId { id: physical_id });
            }
            for field in &fields {
                if !self.fields.contains(field) {
                    return Err(DescriptorError::UnknownField {
                        entity: self.entity,
                        index: name,
                        field: field.clone(),
                    });
                }
            }
            seen_names.push(name.clone());
            seen_ids.push(physical_id.clone());
            secondary.insert(
                name,
                IndexDef {
                    physical_id,
                    partition_fields: fields,
                },
            );
        }

        if self.timeline.len() > 1 {
            return Err(DescriptorError::DuplicateTimeline {
                entity: self.entity,
            });
        }
        let timeline = match self.timeline.into_iter().next() {
            None => None,
            Some((name, physical_id)) => {
                if name == PRIMARY_INDEX {
                    return Err(DescriptorError::ReservedIndexName);
                }
                if seen_names.contains(&name) {
                    return Err(DescriptorError::DuplicateIndexName { name });
                }
                validate_physical_id(&physical_id)?;
                if seen_ids.contains(&physical_id) {
                    return Err(DescriptorError::DuplicateIndexId { id: physical_id });
                }
                Some((
                    name,
                    IndexDef {
                        physical_id,
                        partition_fields: self.primary_partition_fields.clone(),
                    },
                ))
            }
        };

        Ok(EntityDescriptor {
            entity: self.entity,
            schema_version: self.schema_version,
            id_field: self.id_field,
            fields: self.fields,
            primary_partition_fields: self.primary_partition_fields,
            secondary,
            timeline,
        })
    }
}

fn validate_physical_id(id: &str) -> Result<(), DescriptorError> {
    let mut chars = id.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DescriptorError::InvalidIndexId { id: id.to_string() })
    }
}
