//! Agent client/service pair: one [`client::AgentClient`]
//! per monitored agent consuming its SSE bandwidth stream, supervised by a
//! single [`service::AgentService`] that also owns the periodic pull-side
//! collectors (hardware/historical snapshots) and the retention sweep.

pub mod client;
pub mod service;
pub mod sse;

pub use client::{AgentClient, AgentClientStatus};
pub use service::AgentService;
