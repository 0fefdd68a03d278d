mod download_errors;
mod outbox_errors;
mod repository_errors;
mod session_errors;
mod storage_errors;
mod validation_errors;

pub use download_errors::*;
pub use outbox_errors::*;
pub use repository_errors::*;
pub use session_errors::*;
pub use storage_errors::*;
pub use validation_errors::*;

/// How a failure should be treated by callers and sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input; rejected synchronously and never retried
    Validation,
    /// Operation invalid for the current state; never auto-retried
    IllegalState,
    /// Network or provider failure; recorded as a FAILED transition and retried by a sweep
    TransientInfrastructure,
    /// Retry budget exhausted; surfaced for operators, no further automatic action
    TerminalFailure,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::TransientInfrastructure)
    }
}
