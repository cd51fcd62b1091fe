//! Speed-test execution abstraction. The concrete speedtest/iperf3/librespeed
//! invocations are external collaborators; only the interface
//! the [`crate::scheduler::Scheduler`] calls through is defined here, plus a
//! scriptable fake used by tests.

use async_trait::async_trait;

use crate::models::schedule::TestOptions;
use crate::models::speedtest::TestResult;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner failed: {0}")]
    Failed(String),
    #[error("timed out")]
    Timeout,
}

#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, options: &TestOptions) -> Result<TestResult, RunnerError>;
}

/// Placeholder used by the binary's default wiring when no concrete
/// speedtest/iperf3/librespeed runner has been wired in. Always fails, so a
/// deployment running without a real [`Runner`] sees scheduled tests
/// reported as failed rather than silently producing fake measurements.
pub struct NullRunner;

#[async_trait]
impl Runner for NullRunner {
    async fn run(&self, _options: &TestOptions) -> Result<TestResult, RunnerError> {
        Err(RunnerError::Failed(
            "no Runner configured for this deployment".to_string(),
        ))
    }
}

/// Deterministic fake runner for tests: returns a fixed or scripted sequence
/// of outcomes rather than ever touching the network.
pub struct FakeRunner {
    outcomes: parking_lot::Mutex<std::collections::VecDeque<Result<TestResult, RunnerError>>>,
}

impl FakeRunner {
    pub fn new(outcomes: Vec<Result<TestResult, RunnerError>>) -> Self {
        Self {
            outcomes: parking_lot::Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run(&self, _options: &TestOptions) -> Result<TestResult, RunnerError> {
        let mut outcomes = self.outcomes.lock();
        outcomes
            .pop_front()
            .unwrap_or_else(|| Err(RunnerError::Failed("no scripted outcome left".to_string())))
    }
}
