//! ICMP/MTR probe execution.
//!
//! Modeled as a strategy selected once per probe rather than a trait object:
//! both strategies return the same [`ProbeOutcome`] shape, and the choice is
//! a single `bool` (`used_mtr`) carried alongside the aggregate result, per
//! a preference for plain data over polymorphism where a probe's
//! lifetime is a single function call (see `services::node_health`'s signal
//! checks, which follow the same "decide, run, report" shape).

use std::net::IpAddr;
use std::time::{Duration, Instant};

use rand::Rng;
use surge_ping::{Client, Config as PingConfig, IcmpPacket, PingIdentifier, PingSequence, ICMP};
use tokio::time::timeout;

use crate::constants::packetloss::{INTER_PACKET_INTERVAL_MS, PACKET_TIMEOUT_MS};
use crate::error::ProbeError;
use crate::models::packetloss::{MtrHop, PacketLossMonitor};

/// Aggregate + optional per-hop outcome of one probe cycle.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub min_rtt_ms: f64,
    pub max_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub stddev_rtt_ms: f64,
    pub used_mtr: bool,
    pub hop_count: Option<u32>,
    pub mtr_hops: Option<Vec<MtrHop>>,
    pub privileged: bool,
}

impl ProbeOutcome {
    pub fn loss_pct(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        (self.packets_sent - self.packets_recv) as f64 / self.packets_sent as f64 * 100.0
    }
}

fn summarize(sent: u32, rtts: &[Duration]) -> (f64, f64, f64, f64) {
    if rtts.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let ms: Vec<f64> = rtts.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let min = ms.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let avg = ms.iter().sum::<f64>() / ms.len() as f64;
    let variance = ms.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / ms.len() as f64;
    let _ = sent;
    (min, max, avg, variance.sqrt())
}

/// Decides whether this cycle should use MTR: only available with privileged
/// ICMP, and only worth the extra cost once the path already looks unwell.
pub fn should_use_mtr(monitor: &PacketLossMonitor, privileged_icmp: bool) -> bool {
    use crate::models::packetloss::MonitorState;
    privileged_icmp
        && matches!(monitor.last_state, MonitorState::Degraded | MonitorState::Down)
}

/// Plain ICMP echo over `packet_count` packets, spaced by
/// [`INTER_PACKET_INTERVAL_MS`], honoring `cancel` between packets.
pub async fn run_icmp_probe(
    host: &str,
    packet_count: u32,
    privileged: bool,
    mut on_progress: impl FnMut(u32, u32),
) -> Result<ProbeOutcome, ProbeError> {
    let addr: IpAddr = resolve_host(host)?;
    let kind = if addr.is_ipv4() { ICMP::V4 } else { ICMP::V6 };
    let config = PingConfig::builder().kind(kind).build();
    let client = Client::new(&config).map_err(ProbeError::from_surge)?;

    let ident = PingIdentifier(rand::thread_rng().gen());
    let mut pinger = client.pinger(addr, ident).await;
    pinger.timeout(Duration::from_millis(PACKET_TIMEOUT_MS));

    let mut rtts = Vec::with_capacity(packet_count as usize);
    let mut recv = 0u32;

    for seq in 0..packet_count {
        let payload = [0u8; 56];
        let sent_at = Instant::now();
        match pinger.ping(PingSequence(seq as u16), &payload).await {
            Ok((IcmpPacket::V4(_), _)) | Ok((IcmpPacket::V6(_), _)) => {
                recv += 1;
                rtts.push(sent_at.elapsed());
            }
            Err(_) => {
                // Timeout or unreachable: counted as a lost packet, not an
                // aborted probe.
            }
        }
        on_progress(seq + 1, recv);
        if seq + 1 < packet_count {
            tokio::time::sleep(Duration::from_millis(INTER_PACKET_INTERVAL_MS)).await;
        }
    }

    let (min, max, avg, stddev) = summarize(packet_count, &rtts);
    Ok(ProbeOutcome {
        packets_sent: packet_count,
        packets_recv: recv,
        min_rtt_ms: min,
        max_rtt_ms: max,
        avg_rtt_ms: avg,
        stddev_rtt_ms: stddev,
        used_mtr: false,
        hop_count: None,
        mtr_hops: None,
        privileged,
    })
}

/// Unprivileged fallback used when ICMP raw sockets are unavailable.
/// `surge_ping` opens a UDP datagram
/// socket instead of a raw one when given `ICMP::V4`/`ICMP::V6` without
/// `CAP_NET_RAW`; the distinction that matters to callers is the
/// `privileged` flag recorded on the result, not a different code path.
pub async fn run_unprivileged_probe(
    host: &str,
    packet_count: u32,
    on_progress: impl FnMut(u32, u32),
) -> Result<ProbeOutcome, ProbeError> {
    run_icmp_probe(host, packet_count, false, on_progress).await
}

/// Per-hop MTR-style probe: repeats `packet_count` echoes at each TTL from 1
/// up to [`MAX_HOPS`] until the target itself replies, recording per-hop
/// loss/RTT. The aggregate fields mirror the final hop (the target) so
/// `ProbeOutcome::loss_pct` means the same thing for both strategies.
pub async fn run_mtr_probe(
    host: &str,
    packet_count: u32,
    mut on_progress: impl FnMut(u32, u32),
) -> Result<ProbeOutcome, ProbeError> {
    const MAX_HOPS: u32 = 30;

    let addr: IpAddr = resolve_host(host)?;
    let kind = if addr.is_ipv4() { ICMP::V4 } else { ICMP::V6 };

    let mut hops = Vec::new();
    let mut sent_total = 0u32;
    let mut recv_total = 0u32;
    let mut final_rtts = Vec::new();

    for ttl in 1..=MAX_HOPS {
        let config = PingConfig::builder().kind(kind).ttl(ttl as u8).build();
        let client = Client::new(&config).map_err(ProbeError::from_surge)?;
        let ident = PingIdentifier(rand::thread_rng().gen());
        let mut pinger = client.pinger(addr, ident).await;
        pinger.timeout(Duration::from_millis(PACKET_TIMEOUT_MS));

        let mut hop_recv = 0u32;
        let mut hop_rtts = Vec::with_capacity(packet_count as usize);
        let mut reached_target = false;

        for seq in 0..packet_count {
            sent_total += 1;
            let sent_at = Instant::now();
            let payload = [0u8; 56];
            match timeout(
                Duration::from_millis(PACKET_TIMEOUT_MS),
                pinger.ping(PingSequence(seq as u16), &payload),
            )
            .await
            {
                Ok(Ok((IcmpPacket::V4(_), _))) | Ok(Ok((IcmpPacket::V6(_), _))) => {
                    hop_recv += 1;
                    recv_total += 1;
                    let rtt = sent_at.elapsed();
                    hop_rtts.push(rtt);
                    reached_target = true;
                }
                _ => {}
            }
            on_progress(sent_total, recv_total);
            if seq + 1 < packet_count {
                tokio::time::sleep(Duration::from_millis(INTER_PACKET_INTERVAL_MS)).await;
            }
        }

        let loss = if packet_count == 0 {
            0.0
        } else {
            (packet_count - hop_recv) as f64 / packet_count as f64 * 100.0
        };
        let avg_rtt = if hop_rtts.is_empty() {
            0.0
        } else {
            hop_rtts.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>() / hop_rtts.len() as f64
        };
        hops.push(MtrHop {
            hop: ttl,
            host: if reached_target {
                Some(host.to_string())
            } else {
                None
            },
            loss_pct: loss,
            avg_rtt_ms: avg_rtt,
        });

        if reached_target {
            final_rtts = hop_rtts;
            break;
        }
    }

    let hop_count = hops.len() as u32;
    let (min, max, avg, stddev) = summarize(packet_count, &final_rtts);
    // The aggregate loss/RTT reflect the final (target) hop only; intermediate
    // hop loss is informational and lives in `mtr_hops`.
    let last_hop_sent = packet_count;
    let last_hop_recv = final_rtts.len() as u32;

    Ok(ProbeOutcome {
        packets_sent: last_hop_sent,
        packets_recv: last_hop_recv,
        min_rtt_ms: min,
        max_rtt_ms: max,
        avg_rtt_ms: avg,
        stddev_rtt_ms: stddev,
        used_mtr: true,
        hop_count: Some(hop_count),
        mtr_hops: Some(hops),
        privileged: true,
    })
}

fn resolve_host(host: &str) -> Result<IpAddr, ProbeError> {
    host.parse::<IpAddr>().or_else(|_| {
        use std::net::ToSocketAddrs;
        (host, 0)
            .to_socket_addrs()
            .ok()
            .and_then(|mut it| it.next())
            .map(|a| a.ip())
            .ok_or_else(|| ProbeError::Parse(format!("could not resolve host '{host}'")))
    })
}

impl ProbeError {
    /// `surge_ping` fails client construction when raw-socket creation is
    /// denied (missing `CAP_NET_RAW`), which is the only failure mode this
    /// callsite expects; anything else still surfaces as a permission error
    /// since no ICMP traffic could be sent at all.
    fn from_surge(_e: surge_ping::SurgeError) -> ProbeError {
        ProbeError::Permission
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::packetloss::{MonitorState, ScheduleKind};
    use chrono::Utc;

    fn monitor(state: MonitorState) -> PacketLossMonitor {
        let now = Utc::now();
        PacketLossMonitor {
            id: 1,
            host: "1.1.1.1".to_string(),
            name: None,
            schedule_kind: ScheduleKind::Interval,
            interval: Some(Duration::from_secs(60)),
            exact_times: None,
            packet_count: 5,
            threshold_pct: 5.0,
            enabled: true,
            last_state: state,
            last_state_change: None,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn mtr_only_selected_when_privileged_and_unwell() {
        assert!(!should_use_mtr(&monitor(MonitorState::Up), true));
        assert!(!should_use_mtr(&monitor(MonitorState::Degraded), false));
        assert!(should_use_mtr(&monitor(MonitorState::Degraded), true));
        assert!(should_use_mtr(&monitor(MonitorState::Down), true));
    }

    #[test]
    fn summarize_computes_stats() {
        let rtts = vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
        ];
        let (min, max, avg, _stddev) = summarize(3, &rtts);
        assert_eq!(min, 10.0);
        assert_eq!(max, 30.0);
        assert_eq!(avg, 20.0);
    }
}
