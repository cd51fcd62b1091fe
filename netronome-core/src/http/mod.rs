//! The one HTTP surface the core owns: the live-update
//! SSE endpoint and a `/healthz` probe. Everything else (the embedded UI,
//! the REST CRUD surface over schedules/monitors/agents/channels) is an
//! external API collaborator.

mod routes;
mod sse;

pub use routes::create_app;
