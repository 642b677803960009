//! Configuration for the scaler service.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use tracing::warn;

use strato_core::{NodePattern, MIB};
use strato_hypervisor::ProxmoxConfig;
use strato_queue::QueueConfig;

use crate::error::{ScalerError, ScalerResult};

/// Top-level configuration for the scaler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScalerConfig {
    /// Scaling behaviour.
    #[serde(default)]
    pub scaling: ScalingConfig,

    /// Hypervisor connection.
    #[serde(default)]
    pub hypervisor: ProxmoxConfig,

    /// Work-queue broker connection.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Pipeline worker pool.
    #[serde(default)]
    pub workers: WorkerConfig,
}

impl ScalerConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default values
    /// 2. `strato.toml` in the current directory (if present)
    /// 3. Environment variables with `STRATO_` prefix
    pub fn load() -> ScalerResult<Self> {
        Figment::new()
            .merge(Toml::file("strato.toml"))
            .merge(Env::prefixed("STRATO_").split("__"))
            .extract()
            .map_err(|e| ScalerError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ScalerResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STRATO_").split("__"))
            .extract()
            .map_err(|e| ScalerError::Config(e.to_string()))
    }

    /// Validate the configuration, clamping out-of-range values to their
    /// floors and rejecting figures the maths cannot work with.
    pub fn validate(&mut self) -> ScalerResult<()> {
        self.scaling.validate()
    }
}

/// Scaling behaviour. Immutable after startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// CPU cores each new worker provides.
    pub node_cores: u32,
    /// Memory each new worker provides, in MiB.
    pub node_memory_mib: u64,
    /// Hard cap on owned workers plus inflight create events.
    pub max_nodes: u32,
    /// Fraction of capacity kept free when assessing scale-down.
    /// Clamped to at least 0.2.
    pub load_headroom: f64,
    /// Control-loop tick period in seconds. Clamped to at least 10.
    pub poll_interval_secs: u64,
    /// Timeout waiting for a new worker to become Ready, in seconds.
    /// Clamped to at least 60.
    pub wait_join_secs: u64,
    /// Name prefix for owned worker nodes.
    pub node_name_prefix: String,
    /// Name of the template VM to clone.
    pub template_name: String,
    /// Login user created on each worker via cloud-init.
    pub cloud_init_user: String,
    /// SSH public key authorised on each worker.
    pub ssh_key: String,
    /// Run orphan reconciliation every this many ticks.
    pub reconcile_every_ticks: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            node_cores: 2,
            node_memory_mib: 2048,
            max_nodes: 10,
            load_headroom: 0.2,
            poll_interval_secs: 10,
            wait_join_secs: 60,
            node_name_prefix: "kp-node".to_owned(),
            template_name: "worker-template".to_owned(),
            cloud_init_user: "worker".to_owned(),
            ssh_key: String::new(),
            reconcile_every_ticks: 5,
        }
    }
}

impl ScalingConfig {
    /// Apply floors and reject unusable figures.
    pub fn validate(&mut self) -> ScalerResult<()> {
        if self.node_cores == 0 {
            return Err(ScalerError::Config("node_cores must be positive".to_owned()));
        }
        if self.node_memory_mib == 0 {
            return Err(ScalerError::Config("node_memory_mib must be positive".to_owned()));
        }
        if self.max_nodes == 0 {
            return Err(ScalerError::Config("max_nodes must be positive".to_owned()));
        }
        if self.reconcile_every_ticks == 0 {
            return Err(ScalerError::Config(
                "reconcile_every_ticks must be positive".to_owned(),
            ));
        }

        if self.load_headroom < 0.2 {
            warn!(configured = self.load_headroom, "load_headroom below floor, clamping to 0.2");
            self.load_headroom = 0.2;
        }
        if self.poll_interval_secs < 10 {
            warn!(configured = self.poll_interval_secs, "poll_interval_secs below floor, clamping to 10");
            self.poll_interval_secs = 10;
        }
        if self.wait_join_secs < 60 {
            warn!(configured = self.wait_join_secs, "wait_join_secs below floor, clamping to 60");
            self.wait_join_secs = 60;
        }

        Ok(())
    }

    /// The owned-node name pattern for this configuration.
    pub fn pattern(&self) -> ScalerResult<NodePattern> {
        NodePattern::new(self.node_name_prefix.as_str())
            .map_err(|e| ScalerError::Config(format!("node_name_prefix: {e}")))
    }

    /// Memory each new worker provides, in bytes.
    #[must_use]
    pub fn node_memory_bytes(&self) -> f64 {
        self.node_memory_mib as f64 * MIB
    }

    /// Control-loop tick period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Join wait deadline.
    #[must_use]
    pub fn wait_join(&self) -> Duration {
        Duration::from_secs(self.wait_join_secs)
    }
}

/// Pipeline worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent CREATE pipeline workers. DESTROY is always a single
    /// worker, matching the one-victim-per-tick discipline.
    pub create_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { create_concurrency: 2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let mut config = ScalerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scaling.node_cores, 2);
        assert_eq!(config.scaling.max_nodes, 10);
        assert_eq!(config.workers.create_concurrency, 2);
        assert_eq!(config.queue.port, 4222);
    }

    #[test]
    fn floors_are_clamped() {
        let mut scaling = ScalingConfig {
            load_headroom: 0.05,
            poll_interval_secs: 1,
            wait_join_secs: 5,
            ..ScalingConfig::default()
        };
        scaling.validate().unwrap();
        assert!((scaling.load_headroom - 0.2).abs() < f64::EPSILON);
        assert_eq!(scaling.poll_interval_secs, 10);
        assert_eq!(scaling.wait_join_secs, 60);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut scaling = ScalingConfig {
            node_cores: 0,
            ..ScalingConfig::default()
        };
        assert!(matches!(scaling.validate(), Err(ScalerError::Config(_))));

        let mut scaling = ScalingConfig {
            max_nodes: 0,
            ..ScalingConfig::default()
        };
        assert!(matches!(scaling.validate(), Err(ScalerError::Config(_))));
    }

    #[test]
    fn config_from_toml() {
        let raw = r#"
            [scaling]
            node_cores = 4
            node_memory_mib = 8192
            max_nodes = 6
            node_name_prefix = "edge-worker"

            [hypervisor]
            url = "https://pve.internal:8006"
            token_id = "scaler@pve!autoscale"
            secret = "sekret"

            [queue]
            host = "nats.internal"
            port = 4223

            [workers]
            create_concurrency = 4
        "#;

        let config: ScalerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.scaling.node_cores, 4);
        assert_eq!(config.scaling.node_memory_mib, 8192);
        assert_eq!(config.scaling.node_name_prefix, "edge-worker");
        assert_eq!(config.hypervisor.url, "https://pve.internal:8006");
        assert_eq!(config.queue.host, "nats.internal");
        assert_eq!(config.queue.port, 4223);
        assert_eq!(config.workers.create_concurrency, 4);
    }

    #[test]
    fn memory_is_converted_to_bytes() {
        let scaling = ScalingConfig {
            node_memory_mib: 2048,
            ..ScalingConfig::default()
        };
        assert!((scaling.node_memory_bytes() - 2_147_483_648.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pattern_uses_prefix() {
        let scaling = ScalingConfig::default();
        let pattern = scaling.pattern().unwrap();
        assert!(pattern.matches("kp-node-163c3d58-4c4d-426d-baef-e0c30ecb5fcd"));
    }
}
