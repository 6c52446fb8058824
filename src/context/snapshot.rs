use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::operation::Status;

/// Serializable view of an operation, produced by
/// [`OperationContext::snapshot`](super::OperationContext::snapshot) (long
/// form) and [`short_snapshot`](super::OperationContext::short_snapshot)
/// (first stack line only, no inter-entry timing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub status: Status,
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub trace: Vec<EntrySnapshot>,
    pub metrics: MetricsSnapshot,
    /// Epoch millis.
    pub started_at: i64,
    /// Epoch millis; absent while the operation is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySnapshot {
    pub values: HashMap<String, Value>,
    pub stacktrace: Vec<String>,
    /// Epoch millis.
    pub created_at: i64,
    /// Millis since the previous entry, -1 for the first. Long form only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_last_entry: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub entries: Vec<TimerEntrySnapshot>,
    pub cumulative: Vec<CumulativeSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerEntrySnapshot {
    pub name: String,
    /// Epoch millis.
    pub started_at: i64,
    /// Millis.
    pub duration: u64,
    /// -1 until the operation terminates.
    pub percentage_of_total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeSnapshot {
    pub name: String,
    pub event_count: u64,
    /// Millis.
    pub total_duration: u64,
    /// -1 until the operation terminates.
    pub total_percentage_of_total: f64,
}
