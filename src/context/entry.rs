use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One recorded step in an operation's trace.
///
/// Entries are plain owned data: they never reference the operation that
/// recorded them and are immutable once appended.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    values: HashMap<String, Value>,
    stack: Vec<String>,
    created_at: DateTime<Utc>,
}

impl TraceEntry {
    pub(crate) fn new(values: HashMap<String, Value>, stack: Vec<String>) -> Self {
        Self {
            values,
            stack,
            created_at: Utc::now(),
        }
    }

    /// The key/value data supplied when the entry was recorded.
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Call-stack frame names captured when the entry was recorded.
    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
