use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval,
    ExactTimes,
}

/// Edge-triggered monitor health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Unknown,
    Up,
    Degraded,
    Down,
}

/// A persisted recipe for continuously probing a packet-loss target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketLossMonitor {
    pub id: Id,
    pub host: String,
    pub name: Option<String>,
    pub schedule_kind: ScheduleKind,
    pub interval: Option<Duration>,
    pub exact_times: Option<Vec<NaiveTime>>,
    pub packet_count: u32,
    pub threshold_pct: f64,
    pub enabled: bool,
    pub last_state: MonitorState,
    pub last_state_change: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorValidationError {
    #[error("packet_count must be in 1..=100, got {0}")]
    PacketCount(u32),
    #[error("threshold_pct must be in 0..=100, got {0}")]
    ThresholdPct(f64),
    #[error("interval mode requires interval_duration and no exact_times")]
    IntervalMismatch,
    #[error("exact_times mode requires exact_times and no interval_duration")]
    ExactTimesMismatch,
}

impl PacketLossMonitor {
    pub fn validate(&self) -> Result<(), MonitorValidationError> {
        if !(1..=100).contains(&self.packet_count) {
            return Err(MonitorValidationError::PacketCount(self.packet_count));
        }
        if !(0.0..=100.0).contains(&self.threshold_pct) {
            return Err(MonitorValidationError::ThresholdPct(self.threshold_pct));
        }
        match self.schedule_kind {
            ScheduleKind::Interval => {
                if self.interval.is_none() || self.exact_times.is_some() {
                    return Err(MonitorValidationError::IntervalMismatch);
                }
            }
            ScheduleKind::ExactTimes => {
                if self.exact_times.is_none() || self.interval.is_some() {
                    return Err(MonitorValidationError::ExactTimesMismatch);
                }
            }
        }
        Ok(())
    }
}

/// Per-hop MTR path-quality record, stored as an opaque JSON blob alongside
/// the aggregate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtrHop {
    pub hop: u32,
    pub host: Option<String>,
    pub loss_pct: f64,
    pub avg_rtt_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketLossResult {
    pub id: Id,
    pub monitor_id: Id,
    pub loss_pct: f64,
    pub min_rtt_ms: f64,
    pub max_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub stddev_rtt_ms: f64,
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub used_mtr: bool,
    pub hop_count: Option<u32>,
    pub mtr_hops: Option<Vec<MtrHop>>,
    pub privileged: bool,
    pub created_at: DateTime<Utc>,
}

impl PacketLossResult {
    /// `loss_pct == (sent-recv)/sent * 100` within 0.01 tolerance.
    pub fn loss_pct_consistent(&self) -> bool {
        if self.packets_sent == 0 {
            return self.loss_pct == 0.0;
        }
        let expected = (self.packets_sent - self.packets_recv) as f64 / self.packets_sent as f64
            * 100.0;
        (expected - self.loss_pct).abs() <= 0.01
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_packet_count_out_of_range() {
        let m = sample_monitor_with(101, 5.0, ScheduleKind::Interval, Some(Duration::from_secs(60)), None);
        assert!(matches!(
            m.validate(),
            Err(MonitorValidationError::PacketCount(101))
        ));
    }

    #[test]
    fn rejects_mismatched_schedule_kind() {
        let m = sample_monitor_with(10, 5.0, ScheduleKind::Interval, None, None);
        assert!(matches!(
            m.validate(),
            Err(MonitorValidationError::IntervalMismatch)
        ));
    }

    #[test]
    fn loss_pct_consistency_checks_tolerance() {
        let mut r = sample_result(10, 8);
        r.loss_pct = 20.0;
        assert!(r.loss_pct_consistent());
        r.loss_pct = 25.0;
        assert!(!r.loss_pct_consistent());
    }

    fn sample_monitor_with(
        packet_count: u32,
        threshold_pct: f64,
        schedule_kind: ScheduleKind,
        interval: Option<Duration>,
        exact_times: Option<Vec<NaiveTime>>,
    ) -> PacketLossMonitor {
        let now = Utc::now();
        PacketLossMonitor {
            id: 1,
            host: "1.1.1.1".to_string(),
            name: None,
            schedule_kind,
            interval,
            exact_times,
            packet_count,
            threshold_pct,
            enabled: true,
            last_state: MonitorState::Unknown,
            last_state_change: None,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_result(sent: u32, recv: u32) -> PacketLossResult {
        PacketLossResult {
            id: 1,
            monitor_id: 1,
            loss_pct: 0.0,
            min_rtt_ms: 1.0,
            max_rtt_ms: 2.0,
            avg_rtt_ms: 1.5,
            stddev_rtt_ms: 0.1,
            packets_sent: sent,
            packets_recv: recv,
            used_mtr: false,
            hop_count: None,
            mtr_hops: None,
            privileged: false,
            created_at: Utc::now(),
        }
    }
}
