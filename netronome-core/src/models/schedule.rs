use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Speedtest,
    Iperf3,
    Librespeed,
}

/// Options forwarded to the [`crate::runner::Runner`] for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOptions {
    pub test_type: TestType,
    pub server_ids: Vec<String>,
    pub is_scheduled: bool,
}

/// A persisted recipe for running a speed test at a cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Id,
    pub target_ids: Vec<String>,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    pub options: TestOptions,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// True when this schedule is a candidate for the scheduler's current tick.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run <= now
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
