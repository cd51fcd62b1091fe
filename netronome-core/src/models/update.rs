use serde::{Deserialize, Serialize};

use super::Id;

/// One broadcast item on the live update bus. Tagged so a
/// single SSE stream can multiplex every update kind to connected UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Update {
    SpeedtestProgress(SpeedtestProgress),
    SpeedtestDone(SpeedtestDone),
    PacketlossProgress(PacketlossProgress),
    PacketlossDone(PacketlossDone),
    AgentBandwidth(AgentBandwidth),
    AgentStatus(AgentStatus),
    AgentDiscovered(AgentDiscovered),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedtestProgress {
    pub schedule_id: Id,
    pub progress_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedtestDone {
    pub schedule_id: Id,
    pub result_id: Id,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketlossProgress {
    pub monitor_id: Id,
    pub progress_pct: f64,
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub used_mtr: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketlossDone {
    pub monitor_id: Id,
    pub result_id: Id,
    pub loss_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBandwidth {
    pub agent_id: Id,
    pub rx_bytes_per_s: u64,
    pub tx_bytes_per_s: u64,
    pub rx_rate_str: String,
    pub tx_rate_str: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: Id,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDiscovered {
    pub agent_id: Id,
    pub name: String,
}
