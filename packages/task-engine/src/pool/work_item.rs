//! [`WorkItem`] and [`WorkResult`], the unit of work the [`super::WorkerPool`]
//! fans out over.

use std::collections::HashMap;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::error::ErrorKind;

/// A closed set of {integer, floating, string, byte-sequence} values —
/// the tagged-union stand-in for the source's `map[string]interface{}`
/// — a tagged-union stand-in for a dynamic, loosely-typed payload map.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// One unit of work submitted to a [`super::WorkerPool`] in a batch.
#[derive(Debug, Clone, TypedBuilder)]
pub struct WorkItem {
    /// Stable identifier, unique within the batch.
    pub id: String,
    /// Caller-defined operation selector (e.g. "compress", "hash").
    pub operation: String,
    /// Input locator — a path, URL, or other opaque reference.
    pub input: String,
    /// Optional per-item deadline; the pool wraps handler invocation in a
    /// timeout when set.
    #[builder(default, setter(strip_option))]
    pub deadline: Option<Duration>,
}

/// The outcome of running one [`WorkItem`] through a handler.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub item_id: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    pub data: HashMap<String, ResultValue>,
    pub duration: Duration,
}

impl WorkResult {
    pub fn success(item_id: impl Into<String>, data: HashMap<String, ResultValue>, duration: Duration) -> Self {
        Self {
            item_id: item_id.into(),
            success: true,
            error_kind: None,
            message: None,
            data,
            duration,
        }
    }

    pub fn failure(
        item_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            error_kind: Some(kind),
            message: Some(message.into()),
            data: HashMap::new(),
            duration,
        }
    }
}

/// How a [`super::WorkerPool::run`] call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    /// All items processed, none failed.
    Ok,
    /// The cancellation token fired before all items completed.
    Cancelled,
    /// All items were processed (or cancellation did not fire) but at
    /// least one item reports failure.
    Partial,
}
