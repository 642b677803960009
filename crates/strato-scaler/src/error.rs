//! Error types for the scaler service.

use thiserror::Error;

use strato_cluster::ClusterError;
use strato_hypervisor::HypervisorError;
use strato_queue::QueueError;

/// Result type alias using [`ScalerError`].
pub type ScalerResult<T> = Result<T, ScalerError>;

/// Errors that can occur in the scaling engine and its pipelines.
#[derive(Debug, Error)]
pub enum ScalerError {
    /// Configuration error, fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Hypervisor client error.
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    /// Cluster client error.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Work queue error.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A freshly provisioned node did not join the cluster in time.
    #[error("node {node} did not join within {timeout_secs}s")]
    JoinTimeout {
        /// The node that never became ready.
        node: String,
        /// The join wait that expired.
        timeout_secs: u64,
    },

    /// A VM did not reach the running state in time.
    #[error("VM {node} did not start within {timeout_secs}s")]
    StartTimeout {
        /// The VM's node name.
        node: String,
        /// The start wait that expired.
        timeout_secs: u64,
    },

    /// Remote state disagrees with the event in a way that is not safe to
    /// paper over.
    #[error("remote state error: {0}")]
    RemoteState(String),

    /// An event violates a scaling invariant; refusing to act on it.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl ScalerError {
    /// Whether a pipeline should requeue the event and try again later.
    ///
    /// Timeouts, remote-state conflicts and invariant violations are final
    /// for the event in hand; transport-level failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Hypervisor(e) => e.is_transient(),
            Self::Cluster(e) => e.is_transient(),
            Self::Queue(e) => e.is_transient(),
            Self::Config(_)
            | Self::JoinTimeout { .. }
            | Self::StartTimeout { .. }
            | Self::RemoteState(_)
            | Self::Invariant(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_final() {
        let err = ScalerError::JoinTimeout {
            node: "kp-node-a".to_owned(),
            timeout_secs: 60,
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn transport_failures_are_retried() {
        let err = ScalerError::from(QueueError::Connect("refused".to_owned()));
        assert!(err.is_transient());

        let err = ScalerError::from(HypervisorError::Api {
            status: 502,
            message: "bad gateway".to_owned(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn invariant_violations_are_final() {
        assert!(!ScalerError::Invariant("non-owned target".to_owned()).is_transient());
        assert!(!ScalerError::RemoteState("missing VM".to_owned()).is_transient());
    }
}
