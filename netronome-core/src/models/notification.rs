use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Speedtest,
    Packetloss,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Id,
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Id,
    pub category: NotificationCategory,
    pub event_type: String,
    pub supports_threshold: bool,
    pub threshold_unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdOperator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
}

impl ThresholdOperator {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Eq => (value - threshold).abs() < f64::EPSILON,
            ThresholdOperator::Gte => value >= threshold,
            ThresholdOperator::Lte => value <= threshold,
        }
    }
}

/// Unique per `(channel_id, event_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: Id,
    pub channel_id: Id,
    pub event_id: Id,
    pub enabled: bool,
    pub threshold_value: Option<f64>,
    pub threshold_operator: Option<ThresholdOperator>,
}

impl NotificationRule {
    /// A rule with no threshold always matches; otherwise evaluate the
    /// operator/value predicate. `value = None` (e.g. a connect/disconnect
    /// event) only matches threshold-less rules.
    pub fn matches(&self, value: Option<f64>) -> bool {
        match (self.threshold_operator, self.threshold_value, value) {
            (None, _, _) => true,
            (Some(op), Some(threshold), Some(value)) => op.evaluate(value, threshold),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHistory {
    pub id: Id,
    pub channel_id: Id,
    pub event_id: Id,
    pub success: bool,
    pub error: Option<String>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}
