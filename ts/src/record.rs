//! The `Record` contract every persistable domain type implements, plus the
//! filter vocabulary used to query collections without a query language.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
///
/// Every domain type's `created_at`/`updated_at` fields are stamped with this,
/// so clocks stay consistent across the workspace.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A value that can be indexed for equality/ordering filters.
///
/// Kept deliberately small: the store never needs to index arbitrary JSON,
/// only the handful of scalar fields a collection chooses to expose via
/// `Record::indexed_fields`.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum IndexValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl IndexValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IndexValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IndexValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexValue::String(s) => write!(f, "{}", s),
            IndexValue::Integer(n) => write!(f, "{}", n),
            IndexValue::Float(n) => write!(f, "{}", n),
            IndexValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// A comparison operator for filtering a collection by an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// One clause of a `list` query: `field <op> value`.
///
/// Filters are ANDed together when several are passed to `Store::list`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    fn matches(&self, candidate: Option<&IndexValue>) -> bool {
        let Some(candidate) = candidate else {
            return self.op == FilterOp::NotEq;
        };
        match self.op {
            FilterOp::Eq => candidate == &self.value,
            FilterOp::NotEq => candidate != &self.value,
            FilterOp::Gt => candidate.partial_cmp(&self.value) == Some(std::cmp::Ordering::Greater),
            FilterOp::Gte => matches!(
                candidate.partial_cmp(&self.value),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ),
            FilterOp::Lt => candidate.partial_cmp(&self.value) == Some(std::cmp::Ordering::Less),
            FilterOp::Lte => matches!(
                candidate.partial_cmp(&self.value),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            ),
        }
    }
}

/// Apply a set of ANDed filters against a record's indexed fields.
pub fn matches_filters(fields: &HashMap<String, IndexValue>, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(fields.get(&f.field)))
}

/// Contract for any type the `Store` can persist.
///
/// Implementors are plain serde-serializable structs; the store never
/// interprets their contents beyond what `indexed_fields` exposes for
/// filtering.
pub trait Record: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone + Send + Sync + 'static {
    /// Stable unique identifier within the collection.
    fn id(&self) -> &str;

    /// Unix-ms timestamp of the last modification; used for ordering and
    /// for last-write-wins conflict resolution during sync.
    fn updated_at(&self) -> i64;

    /// Name of the SQLite table / JSONL file this type lives in.
    fn collection_name() -> &'static str
    where
        Self: Sized;

    /// Scalar fields exposed for `Store::list` filtering.
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
