use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::TestType;
use super::Id;

/// Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Id,
    pub server_name: String,
    pub server_id: String,
    pub server_host: Option<String>,
    pub test_type: TestType,
    pub down_mbps: f64,
    pub up_mbps: f64,
    pub latency_ms_string: String,
    pub jitter_ms: Option<f64>,
    pub is_scheduled: bool,
    pub created_at: DateTime<Utc>,
}
