//! Error types for the Compass API client.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CompassError {
    #[error("Request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Compass session is invalid or expired: {0}")]
    InvalidSession(String),
    #[error("Gave up after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<CompassError>,
    },
    #[error("No profile available for {0}")]
    ProfileMissing(String),
}

impl CompassError {
    /// Whether another attempt at the same request may succeed.
    ///
    /// Session problems are excluded: they need a new handshake, not a resend.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompassError::Transport { source, .. } => !source.is_builder(),
            CompassError::ParseFailed { .. } => true,
            CompassError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            CompassError::InvalidSession(_)
            | CompassError::RetriesExhausted { .. }
            | CompassError::ProfileMissing(_) => false,
        }
    }

    /// Unwrap `RetriesExhausted` down to the error that ended the last attempt.
    pub fn root(&self) -> &CompassError {
        match self {
            CompassError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_EARLY
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> CompassError {
        CompassError::Status {
            status: code,
            url: "https://compass.test/x".to_owned(),
        }
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
    }

    #[test]
    fn client_errors_are_terminal() {
        assert!(!status(404).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!CompassError::InvalidSession("expired".into()).is_retryable());
    }

    #[test]
    fn root_unwraps_nested_exhaustion() {
        let err = CompassError::RetriesExhausted {
            attempts: 3,
            last: Box::new(status(502)),
        };
        assert!(matches!(err.root(), CompassError::Status { status: 502, .. }));
    }
}
