//! Error kinds surfaced by the control plane, and their HTTP mapping for the
//! one route family the core owns (the live-update SSE endpoint and health
//! probe).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Expected on shutdown; kept distinct from other errors so logs stay quiet.
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum ProbeError {
    #[error("target unreachable")]
    Unreachable,
    #[error("insufficient permission for raw sockets")]
    Permission,
    #[error("failed to parse probe output: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum AgentError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("failed to parse payload: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum NotifyError {
    #[error("failed to build payload: {0}")]
    Build(String),
    #[error("failed to send: {0}")]
    Send(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Error::Store(StoreError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::Store(StoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            Error::Store(StoreError::Transient(msg)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            Error::Probe(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Error::Agent(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            Error::Notify(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Error::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled".to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Retries a fallible store operation up to 3 times with a 100ms backoff,
/// following `StoreError::Transient`'s documented retry policy.
pub async fn retry_transient<T, F, Fut>(mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::constants::store::{TRANSIENT_RETRY_ATTEMPTS, TRANSIENT_RETRY_BACKOFF_MS};

    let mut attempts = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(Error::Store(StoreError::Transient(msg))) => {
                attempts += 1;
                if attempts >= TRANSIENT_RETRY_ATTEMPTS {
                    return Err(Error::Store(StoreError::Transient(msg)));
                }
                tokio::time::sleep(std::time::Duration::from_millis(TRANSIENT_RETRY_BACKOFF_MS)).await;
            }
            Err(other) => return Err(other),
        }
    }
}
