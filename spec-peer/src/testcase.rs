//! Scenario results.

use crate::trace::Trace;

/// Result of running a scenario.
#[derive(Debug)]
pub struct TestResult {
    /// Whether the scenario passed.
    pub passed: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Frames exchanged before the run ended.
    pub trace: Trace,
}

impl TestResult {
    /// Create a passing result.
    pub fn pass() -> Self {
        Self {
            passed: true,
            error: None,
            trace: Trace::default(),
        }
    }

    /// Create a failing result with an error message.
    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(msg.into()),
            trace: Trace::default(),
        }
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }
}
