//! Error types for the hypervisor client.

use thiserror::Error;

/// Result type alias using [`HypervisorError`].
pub type HypervisorResult<T> = Result<T, HypervisorError>;

/// Errors that can occur talking to the hypervisor fleet.
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// A VM with the requested name already exists.
    #[error("VM name already in use: {0}")]
    NameCollision(String),

    /// The referenced VM does not exist.
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// The template VM could not be found.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl HypervisorError {
    /// Whether retrying the operation later can reasonably succeed.
    ///
    /// Transport failures and server-side errors are transient; name
    /// collisions, missing VMs and bad configuration are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder(),
            Self::Api { status, .. } => *status >= 500,
            Self::NameCollision(_)
            | Self::VmNotFound(_)
            | Self::TemplateNotFound(_)
            | Self::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let e = HypervisorError::Api {
            status: 503,
            message: "unavailable".to_owned(),
        };
        assert!(e.is_transient());

        let e = HypervisorError::Api {
            status: 400,
            message: "bad request".to_owned(),
        };
        assert!(!e.is_transient());
    }

    #[test]
    fn structural_errors_are_not_transient() {
        assert!(!HypervisorError::NameCollision("x".to_owned()).is_transient());
        assert!(!HypervisorError::VmNotFound("x".to_owned()).is_transient());
    }
}
