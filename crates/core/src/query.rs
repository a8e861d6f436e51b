//! Query and cursor types
//!
//! The facade exposes a four-operator shorthand (`>=`, `>`, `<=`, `<`)
//! where the operator implies the scan direction and a missing sort
//! value means "scan the whole partition in that direction". The raw
//! query surface adds the backend-native range forms (`Between`,
//! `BeginsWith`) and an arbitrary abstract filter.
//!
//! All sort-key comparisons are lexicographic over the derived key
//! strings; both backends must produce identical ordering for identical
//! requests.

use crate::expr::Condition;
use crate::item::FieldMap;

/// Scan direction within a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending sort-key order
    Ascending,
    /// Descending sort-key order
    Descending,
}

impl Direction {
    /// True for ascending scans (the backend's "scan forward" flag)
    pub fn forward(self) -> bool {
        matches!(self, Direction::Ascending)
    }
}

/// Range operator of the query shorthand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// `>` — ascending, exclusive lower bound
    Gt,
    /// `>=` — ascending, inclusive lower bound
    Gte,
    /// `<` — descending, exclusive upper bound
    Lt,
    /// `<=` — descending, inclusive upper bound
    Lte,
}

impl RangeOp {
    /// The scan direction this operator implies
    pub fn direction(self) -> Direction {
        match self {
            RangeOp::Gt | RangeOp::Gte => Direction::Ascending,
            RangeOp::Lt | RangeOp::Lte => Direction::Descending,
        }
    }
}

/// Sort-key range of a facade query: operator plus optional bound
///
/// A `None` value scans the whole partition in the operator's implied
/// direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Range operator
    pub op: RangeOp,
    /// Bound value (`None` = unbounded)
    pub value: Option<String>,
}

impl KeyRange {
    /// Whole partition, ascending
    pub fn ascending() -> Self {
        KeyRange {
            op: RangeOp::Gte,
            value: None,
        }
    }

    /// Whole partition, descending
    pub fn descending() -> Self {
        KeyRange {
            op: RangeOp::Lte,
            value: None,
        }
    }

    /// Bounded range
    pub fn new(op: RangeOp, value: impl Into<String>) -> Self {
        KeyRange {
            op,
            value: Some(value.into()),
        }
    }

    /// Lower the shorthand into a backend sort condition
    pub fn sort_condition(&self) -> Option<SortCondition> {
        let value = self.value.clone()?;
        Some(match self.op {
            RangeOp::Gt => SortCondition::Gt(value),
            RangeOp::Gte => SortCondition::Gte(value),
            RangeOp::Lt => SortCondition::Lt(value),
            RangeOp::Lte => SortCondition::Lte(value),
        })
    }
}

/// Backend-native sort-key condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortCondition {
    /// Strictly greater than
    Gt(String),
    /// Greater than or equal
    Gte(String),
    /// Strictly less than
    Lt(String),
    /// Less than or equal
    Lte(String),
    /// Inclusive on both ends
    Between(String, String),
    /// Prefix match (leading-subset queries over composite sort keys)
    BeginsWith(String),
}

impl SortCondition {
    /// Whether a sort-key string satisfies this condition
    pub fn admits(&self, sk: &str) -> bool {
        match self {
            SortCondition::Gt(v) => sk > v.as_str(),
            SortCondition::Gte(v) => sk >= v.as_str(),
            SortCondition::Lt(v) => sk < v.as_str(),
            SortCondition::Lte(v) => sk <= v.as_str(),
            SortCondition::Between(lo, hi) => sk >= lo.as_str() && sk <= hi.as_str(),
            SortCondition::BeginsWith(prefix) => sk.starts_with(prefix.as_str()),
        }
    }
}

/// One backend query: a single partition, optionally range-bounded
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Physical index id to route through (`None` = the primary index)
    pub index: Option<String>,
    /// Derived partition-key string
    pub partition_key: String,
    /// Optional sort-key condition
    pub sort: Option<SortCondition>,
    /// Scan direction (true = ascending)
    pub scan_forward: bool,
    /// Truncate the ordered result
    pub limit: Option<usize>,
    /// Additional abstract filter, applied before the limit
    pub filter: Option<Condition>,
}

impl QueryRequest {
    /// Query a whole partition on the primary index, ascending
    pub fn partition(partition_key: impl Into<String>) -> Self {
        QueryRequest {
            index: None,
            partition_key: partition_key.into(),
            sort: None,
            scan_forward: true,
            limit: None,
            filter: None,
        }
    }
}

/// A resume position within one partition of a token-sorted index
///
/// Subscriptions return items strictly after the cursor's change token.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Partition-key field values of the watched partition
    pub partition: FieldMap,
    /// Change token to resume after
    pub token: String,
}

impl Cursor {
    /// Create a cursor
    pub fn new(partition: FieldMap, token: impl Into<String>) -> Self {
        Cursor {
            partition,
            token: token.into(),
        }
    }
}
