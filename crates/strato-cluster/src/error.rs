//! Error types for the cluster client.

use thiserror::Error;

/// Result type alias using [`ClusterError`].
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur talking to the cluster API.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API error.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The referenced node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A resource quantity could not be parsed.
    #[error("unparseable resource quantity: {0}")]
    QuantityParse(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Whether retrying the operation later can reasonably succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => {
                response.code >= 500 || response.code == 429
            }
            // Connection, TLS and protocol failures.
            Self::Kube(_) => true,
            Self::NodeNotFound(_) | Self::QuantityParse(_) | Self::Config(_) => false,
        }
    }

    /// Whether the error is the API saying the object is already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => response.code == 404,
            Self::NodeNotFound(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> ClusterError {
        ClusterError::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: String::new(),
            reason: String::new(),
            code,
        }))
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(api_error(500).is_transient());
        assert!(api_error(429).is_transient());
        assert!(!api_error(404).is_transient());
        assert!(!api_error(403).is_transient());
    }

    #[test]
    fn not_found_detection() {
        assert!(api_error(404).is_not_found());
        assert!(ClusterError::NodeNotFound("n".to_owned()).is_not_found());
        assert!(!api_error(500).is_not_found());
    }
}
