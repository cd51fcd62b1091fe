//! Notification delivery abstraction. The concrete transport library (email,
//! webhook, push services, ...) is an external collaborator;
//! only the interface the [`crate::notify::dispatcher::Dispatcher`] calls
//! through is defined here, plus scriptable fakes used by tests.

use async_trait::async_trait;

use crate::error::NotifyError;

#[async_trait]
pub trait Sender: Send + Sync {
    /// Delivers `payload` to the transport identified by `url` (the
    /// scheme prefix selects the concrete transport, e.g. `discord://`,
    /// `smtp://`).
    async fn send(&self, url: &str, payload: &str) -> Result<(), NotifyError>;
}

/// Placeholder used by the binary's default wiring when no concrete
/// notification transport library has been wired in. Logs the payload at
/// `warn` instead of delivering it, so notifications remain visible in the
/// logs of a deployment that hasn't configured a transport yet.
pub struct LoggingSender;

#[async_trait]
impl Sender for LoggingSender {
    async fn send(&self, url: &str, payload: &str) -> Result<(), NotifyError> {
        tracing::warn!(
            target: "sender::logging",
            url,
            payload,
            "no transport configured; logging notification instead of delivering it"
        );
        Ok(())
    }
}

/// Always-succeeds fake, for exercising the happy path without a transport.
pub struct AlwaysSucceedsSender;

#[async_trait]
impl Sender for AlwaysSucceedsSender {
    async fn send(&self, _url: &str, _payload: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Always-fails fake, for exercising per-channel failure isolation.
pub struct AlwaysFailsSender;

#[async_trait]
impl Sender for AlwaysFailsSender {
    async fn send(&self, _url: &str, _payload: &str) -> Result<(), NotifyError> {
        Err(NotifyError::Send("simulated transport failure".to_string()))
    }
}
