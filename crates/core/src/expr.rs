//! Abstract conditions and updates
//!
//! The facade expresses write guards and mutations in a small abstract
//! language; each backend translates it into its native form (the
//! memory backend evaluates it directly, the relational backend renders
//! SQL fragments). The engine injects two implicit guards the caller
//! never writes: insert requires the primary key attributes not to
//! exist, update requires the stored schema version to match the
//! engine's expected version.
//!
//! Existence semantics match sparse indexing: an attribute "exists"
//! when it is present and non-null. Against a missing row, `NotExists`
//! holds and everything else fails.

use crate::item::{FieldMap, Item};
use serde_json::Value;

/// Abstract write condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Attribute equals the given value
    Eq(String, Value),
    /// Attribute is present and non-null
    Exists(String),
    /// Attribute is absent or null
    NotExists(String),
    /// Every sub-condition holds
    And(Vec<Condition>),
    /// At least one sub-condition holds
    Or(Vec<Condition>),
}

impl Condition {
    /// Equality condition
    pub fn eq(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(attr.into(), value.into())
    }

    /// Existence condition
    pub fn exists(attr: impl Into<String>) -> Self {
        Condition::Exists(attr.into())
    }

    /// Non-existence condition
    pub fn not_exists(attr: impl Into<String>) -> Self {
        Condition::NotExists(attr.into())
    }

    /// Conjoin with another condition, flattening nested `And`s
    pub fn and(self, other: Condition) -> Condition {
        match (self, other) {
            (Condition::And(mut a), Condition::And(b)) => {
                a.extend(b);
                Condition::And(a)
            }
            (Condition::And(mut a), b) => {
                a.push(b);
                Condition::And(a)
            }
            (a, Condition::And(mut b)) => {
                b.insert(0, a);
                Condition::And(b)
            }
            (a, b) => Condition::And(vec![a, b]),
        }
    }

    /// Evaluate against a stored item (reference semantics)
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Condition::Eq(attr, value) => item.get(attr) == Some(value),
            Condition::Exists(attr) => item.is_defined(attr),
            Condition::NotExists(attr) => !item.is_defined(attr),
            Condition::And(conds) => conds.iter().all(|c| c.matches(item)),
            Condition::Or(conds) => conds.iter().any(|c| c.matches(item)),
        }
    }

    /// Evaluate against a missing row
    ///
    /// Used by conditional puts: when no row exists yet, only
    /// non-existence checks can hold.
    pub fn holds_on_missing(&self) -> bool {
        match self {
            Condition::Eq(..) | Condition::Exists(_) => false,
            Condition::NotExists(_) => true,
            Condition::And(conds) => conds.iter().all(Condition::holds_on_missing),
            Condition::Or(conds) => conds.iter().any(Condition::holds_on_missing),
        }
    }
}

/// Abstract field mutation: per-attribute set plus attribute removal
///
/// Removal exists so recomputed sparse-index attributes can be cleared
/// when a dependency field stops being defined.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    /// Attributes to write
    pub set: FieldMap,
    /// Attributes to remove
    pub remove: Vec<String>,
}

impl Update {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set mutation
    pub fn set(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(attr.into(), value.into());
        self
    }

    /// Add a remove mutation
    pub fn remove(mut self, attr: impl Into<String>) -> Self {
        self.remove.push(attr.into());
        self
    }

    /// True when the update mutates nothing
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Apply to an item in place (reference semantics)
    ///
    /// Sets are applied before removes; a name in both ends up removed.
    pub fn apply(&self, item: &mut Item) {
        for (attr, value) in &self.set {
            item.set(attr.clone(), value.clone());
        }
        for attr in &self.remove {
            item.remove(attr);
        }
    }
}
