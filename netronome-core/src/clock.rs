//! Monotonic + wall clock source and the compact duration/time-of-day parsers
//! used throughout schedule and monitor definitions.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, Utc};

/// Thin wrapper so components depend on a trait rather than directly on
/// `SystemTime`/`Instant`; kept concrete rather than trait-object'd since the
/// whole control plane runs against the real clock and tests use `tokio`'s
/// paused-time facility instead of a fake clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock;

impl Clock {
    pub fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn instant(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }
}

/// Parses the compact `<N><unit>` duration form accepted throughout the
/// config and entity definitions. Units: `s`, `m`, `h`, `d` (days = 24h).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    let (digits, unit) = input.split_at(
        input
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration '{input}'"))?,
    );
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid number in duration '{input}'"))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    Ok(Duration::from_secs(secs))
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs % 86400 == 0 && secs != 0 {
        format!("{}d", secs / 86400)
    } else if secs % 3600 == 0 && secs != 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 && secs != 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Parses a 24-hour local-time `HH:MM` exact-time entry.
pub fn parse_exact_time(input: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|e| format!("invalid exact time '{input}': {e}"))
}

/// Current local time-of-day, using the host process's local time zone for
/// exact-times scheduling.
pub fn local_time_of_day() -> NaiveTime {
    Local::now().time()
}
