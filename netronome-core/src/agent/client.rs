//! One long-lived SSE consumer per [`MonitorAgent`].
//!
//! Grounded on `trusted_file_transfer::follower_downloader`
//! (a `reqwest` GET whose body is consumed as a byte stream, wrapped in a
//! periodic retry loop) for the connect-and-stream shape, generalized from a
//! one-shot download to an indefinite SSE read with exponential backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client as HttpClient;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::constants::agent::{BACKOFF_INITIAL_SECS, BACKOFF_MAX_SECS, SAMPLE_PERSIST_HZ};
use crate::models::agent::{AgentPeakStats, BandwidthSample, MonitorAgent};
use crate::models::update::{AgentBandwidth, AgentStatus, Update};
use crate::models::Id;
use crate::store::Store;

use super::sse::{RawBandwidthEvent, SseEventParser};

/// Snapshot returned by [`AgentClient::status`]`).
#[derive(Debug, Clone)]
pub struct AgentClientStatus {
    pub connected: bool,
    pub last_sample: Option<BandwidthSample>,
    pub rx_rate_str: Option<String>,
    pub tx_rate_str: Option<String>,
    pub malformed_payload_count: u64,
}

struct ClientState {
    connected: bool,
    last_sample: Option<BandwidthSample>,
    rx_rate_str: Option<String>,
    tx_rate_str: Option<String>,
    peaks: AgentPeakStats,
    last_persist: Option<tokio::time::Instant>,
}

pub struct AgentClient {
    agent_id: Id,
    url: String,
    base_url: String,
    api_key: Option<String>,
    store: Arc<dyn Store>,
    bus: Bus,
    http: HttpClient,
    state: parking_lot::Mutex<ClientState>,
    malformed_count: AtomicU64,
}

impl AgentClient {
    pub fn new(agent: &MonitorAgent, store: Arc<dyn Store>, bus: Bus, http: HttpClient) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            agent_id: agent.id,
            url: agent.url.clone(),
            base_url: agent.base_url(),
            api_key: agent.api_key.clone(),
            store,
            bus,
            http,
            state: parking_lot::Mutex::new(ClientState {
                connected: false,
                last_sample: None,
                rx_rate_str: None,
                tx_rate_str: None,
                peaks: AgentPeakStats::zero(agent.id, now),
                last_persist: None,
            }),
            malformed_count: AtomicU64::new(0),
        })
    }

    pub fn status(&self) -> AgentClientStatus {
        let state = self.state.lock();
        AgentClientStatus {
            connected: state.connected,
            last_sample: state.last_sample,
            rx_rate_str: state.rx_rate_str.clone(),
            tx_rate_str: state.tx_rate_str.clone(),
            malformed_payload_count: self.malformed_count.load(Ordering::Relaxed),
        }
    }

    /// Runs the connect-loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Some(peaks) = self.store.get_peak_stats(self.agent_id).await.ok().flatten() {
            self.state.lock().peaks = peaks;
        }

        let mut backoff = Duration::from_secs(BACKOFF_INITIAL_SECS);
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.connect_once().await {
                Ok(response) => {
                    info!(target: "agent_client::run", agent_id = self.agent_id, "connected to agent SSE stream");
                    self.set_connected(true);
                    backoff = Duration::from_secs(BACKOFF_INITIAL_SECS);

                    self.seed_peaks().await;
                    self.consume_stream(response, &cancel).await;

                    self.set_connected(false);
                    if cancel.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(target: "agent_client::run", agent_id = self.agent_id, error = %e, backoff_secs = backoff.as_secs(), "failed to connect, backing off");
                    self.announce_connect_failure();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(Duration::from_secs(BACKOFF_MAX_SECS));
                }
            }
        }

        self.set_connected(false);
    }

    async fn connect_once(&self) -> Result<reqwest::Response, String> {
        let mut req = self
            .http
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }

        let response = req.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("unexpected status {}", response.status()));
        }
        Ok(response)
    }

    /// One-shot fetch of `<base>/stats/peaks` to seed [`AgentPeakStats`],
    /// best-effort.
    async fn seed_peaks(&self) {
        let url = format!("{}/stats/peaks", self.base_url);
        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }
        let fetched = match req
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response.json::<PeaksResponse>().await.ok(),
            Err(e) => {
                debug!(target: "agent_client::seed_peaks", agent_id = self.agent_id, error = %e, "peaks endpoint unavailable");
                None
            }
        };

        let Some(fetched) = fetched else { return };
        let mut state = self.state.lock();
        let mut changed = false;
        if fetched.peak_rx > state.peaks.peak_rx_bytes {
            state.peaks.peak_rx_bytes = fetched.peak_rx;
            state.peaks.peak_rx_ts = fetched.peak_rx_timestamp;
            changed = true;
        }
        if fetched.peak_tx > state.peaks.peak_tx_bytes {
            state.peaks.peak_tx_bytes = fetched.peak_tx;
            state.peaks.peak_tx_ts = fetched.peak_tx_timestamp;
            changed = true;
        }
        let peaks = state.peaks;
        drop(state);
        if changed {
            if let Err(e) = self.store.upsert_peak_stats(peaks).await {
                warn!(target: "agent_client::seed_peaks", agent_id = self.agent_id, error = %e, "failed to persist seeded peaks");
            }
        }
    }

    /// Reads newline-framed SSE lines until the body ends, cancellation
    /// fires, or the underlying connection errors.
    async fn consume_stream(&self, response: reqwest::Response, cancel: &CancellationToken) {
        let byte_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let reader = StreamReader::new(byte_stream);
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(1 << 20));
        let mut parser = SseEventParser::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = lines.next() => next,
            };
            match next {
                Some(Ok(line)) => {
                    if let Some(payload) = parser.feed_line(&line) {
                        self.handle_payload(&payload).await;
                    }
                }
                Some(Err(e)) => {
                    debug!(target: "agent_client::consume_stream", agent_id = self.agent_id, error = %e, "stream read error, will reconnect");
                    return;
                }
                None => return,
            }
        }
    }

    async fn handle_payload(&self, payload: &str) {
        let event: RawBandwidthEvent = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(e) => {
                self.malformed_count.fetch_add(1, Ordering::Relaxed);
                debug!(target: "agent_client::handle_payload", agent_id = self.agent_id, error = %e, "dropping malformed SSE payload");
                return;
            }
        };

        let sample = BandwidthSample {
            rx_bytes_per_s: event.rx.bytes_per_second,
            tx_bytes_per_s: event.tx.bytes_per_second,
        };
        let now = Utc::now();

        let (rx_increased, tx_increased, peaks, should_persist_sample) = {
            let mut state = self.state.lock();
            state.last_sample = Some(sample);
            state.rx_rate_str = Some(event.rx.rate_string.clone());
            state.tx_rate_str = Some(event.tx.rate_string.clone());

            let (rx_increased, tx_increased) = state.peaks.apply_sample(sample, now);

            let should_persist = match state.last_persist {
                Some(last) => {
                    last.elapsed() >= Duration::from_millis(1000 / SAMPLE_PERSIST_HZ.max(1))
                }
                None => true,
            };
            if should_persist {
                state.last_persist = Some(tokio::time::Instant::now());
            }

            (rx_increased, tx_increased, state.peaks, should_persist)
        };

        self.bus.publish(Update::AgentBandwidth(AgentBandwidth {
            agent_id: self.agent_id,
            rx_bytes_per_s: sample.rx_bytes_per_s,
            tx_bytes_per_s: sample.tx_bytes_per_s,
            rx_rate_str: event.rx.rate_string,
            tx_rate_str: event.tx.rate_string,
        }));

        if should_persist_sample {
            if let Err(e) = self
                .store
                .insert_bandwidth_sample(self.agent_id, sample.rx_bytes_per_s, sample.tx_bytes_per_s, now)
                .await
            {
                warn!(target: "agent_client::handle_payload", agent_id = self.agent_id, error = %e, "failed to persist bandwidth sample");
            }
        }

        if rx_increased || tx_increased {
            if let Err(e) = self.store.upsert_peak_stats(peaks).await {
                warn!(target: "agent_client::handle_payload", agent_id = self.agent_id, error = %e, "failed to persist peak stats");
            }
        }
    }

    /// Test-only hook for exercising connection-transition logic elsewhere
    /// without driving a real connect-loop.
    #[cfg(test)]
    pub(crate) fn set_connected_for_test(&self, connected: bool) {
        self.set_connected(connected);
    }

    fn set_connected(&self, connected: bool) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        };
        if changed {
            self.bus.publish(Update::AgentStatus(AgentStatus {
                agent_id: self.agent_id,
                connected,
            }));
        }
    }

    /// Publishes `connected=false` unconditionally, unlike [`Self::set_connected`].
    /// A failed connect attempt is not a transition out of a terminated
    /// session, so two consecutive failures (e.g. back-to-back 503s) each get
    /// their own announcement even though `state.connected` was already
    /// `false` after the first one.
    fn announce_connect_failure(&self) {
        self.state.lock().connected = false;
        self.bus.publish(Update::AgentStatus(AgentStatus {
            agent_id: self.agent_id,
            connected: false,
        }));
    }
}

#[derive(Debug, serde::Deserialize)]
struct PeaksResponse {
    peak_rx: u64,
    peak_tx: u64,
    peak_rx_timestamp: DateTime<Utc>,
    peak_tx_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn test_agent(url: String) -> MonitorAgent {
        let now = Utc::now();
        MonitorAgent {
            id: 1,
            name: "test".to_string(),
            url,
            api_key: None,
            enabled: true,
            is_tailscale: false,
            tailscale_hostname: None,
            protocol_variant: crate::models::agent::AgentProtocolVariant::Unified,
            discovered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn handle_payload_updates_cache_and_publishes_exactly_once() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let (mut sub, _cancel) = bus.subscribe();
        let agent = test_agent("http://example.invalid/events".to_string());
        let client = AgentClient::new(&agent, store.clone(), bus, HttpClient::new());

        client
            .handle_payload(r#"{"rx":{"bytespersecond":100,"ratestring":"100 B/s"},"tx":{"bytespersecond":10,"ratestring":"10 B/s"}}"#)
            .await;

        let status = client.status();
        assert_eq!(status.last_sample.unwrap().rx_bytes_per_s, 100);

        let update = sub.next().await.unwrap();
        match update {
            Update::AgentBandwidth(b) => assert_eq!(b.rx_bytes_per_s, 100),
            _ => panic!("expected AgentBandwidth"),
        }
        assert_eq!(store.bandwidth_sample_count(1), 1);
    }

    #[tokio::test]
    async fn malformed_payload_increments_counter_without_publishing() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let (mut sub, _cancel) = bus.subscribe();
        let agent = test_agent("http://example.invalid/events".to_string());
        let client = AgentClient::new(&agent, store, bus, HttpClient::new());

        client.handle_payload("{bad json}").await;
        assert_eq!(client.status().malformed_payload_count, 1);
        assert!(client.status().last_sample.is_none());

        client
            .handle_payload(r#"{"rx":{"bytespersecond":5,"ratestring":"5 B/s"},"tx":{"bytespersecond":1,"ratestring":"1 B/s"}}"#)
            .await;
        assert!(matches!(sub.next().await, Some(Update::AgentBandwidth(_))));
    }

    #[tokio::test]
    async fn consecutive_failed_attempts_each_publish_disconnected() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let (mut sub, _cancel) = bus.subscribe();
        let agent = test_agent("http://example.invalid/events".to_string());
        let client = AgentClient::new(&agent, store, bus, HttpClient::new());

        client.announce_connect_failure();
        client.announce_connect_failure();
        client.set_connected(true);
        client.set_connected(false);

        for expected in [false, false, true, false] {
            match sub.next().await.unwrap() {
                Update::AgentStatus(s) => assert_eq!(s.connected, expected),
                _ => panic!("expected AgentStatus"),
            }
        }
    }

    #[tokio::test]
    async fn peak_persists_only_on_strict_increase() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Bus::new();
        let agent = test_agent("http://example.invalid/events".to_string());
        let client = AgentClient::new(&agent, store.clone(), bus, HttpClient::new());

        for rx in [100u64, 200, 150, 250] {
            client
                .handle_payload(&format!(
                    r#"{{"rx":{{"bytespersecond":{rx},"ratestring":"x"}},"tx":{{"bytespersecond":0,"ratestring":"x"}}}}"#
                ))
                .await;
        }

        let peaks = store.get_peak_stats(1).await.unwrap().unwrap();
        assert_eq!(peaks.peak_rx_bytes, 250);
    }
}
