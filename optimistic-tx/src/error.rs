#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),
    #[error("The transaction reverted: {0}")]
    Reverted(String),
    #[error("Timed out waiting for confirmation")]
    ConfirmationTimedOut,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Handle {0} is not supported by this receipt source")]
    UnsupportedHandle(String),
    #[error("Relay error: {0}")]
    RelayError(String),
    #[error("{0}")]
    EyreError(String),
}

impl From<eyre::Report> for CoordinatorError {
    fn from(report: eyre::Report) -> Self {
        CoordinatorError::EyreError(format!("{report:?}"))
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CoordinatorError::RelayError(err.to_string())
        } else {
            CoordinatorError::NetworkError(err.to_string())
        }
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CoordinatorError {
    /// Whether a caller could reasonably try the same call again.
    /// Nothing in this crate retries on its own, but a confirmation wait that
    /// ends in a retryable error leaves the request unsettled instead of failed.
    fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::NetworkError(_) | CoordinatorError::ConfirmationTimedOut => true,
            CoordinatorError::SubmissionFailed(_)
            | CoordinatorError::Reverted(_)
            | CoordinatorError::UnsupportedHandle(_)
            | CoordinatorError::RelayError(_)
            | CoordinatorError::EyreError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_and_network_errors_are_retryable() {
        assert!(CoordinatorError::ConfirmationTimedOut.is_retryable());
        assert!(CoordinatorError::NetworkError("connection reset".into()).is_retryable());
        assert!(!CoordinatorError::SubmissionFailed("user rejected".into()).is_retryable());
        assert!(!CoordinatorError::Reverted("out of gas".into()).is_retryable());
        assert!(!CoordinatorError::UnsupportedHandle("RelayTask(0x01)".into()).is_retryable());
    }

    #[test]
    fn test_eyre_reports_keep_their_message() {
        let err: CoordinatorError = eyre::eyre!("wallet locked").into();
        assert!(err.to_string().contains("wallet locked"));
        assert!(!err.is_retryable());
    }
}
