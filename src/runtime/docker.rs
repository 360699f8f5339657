//! Docker-backed node provisioning
//!
//! Each cluster node is backed by one long-running container. Provisioning
//! runs `docker run -d`, decommissioning runs `docker stop` followed by
//! `docker rm -f`. Argument construction is kept pure so it can be tested
//! without a Docker daemon.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::provisioner::{BackingHandle, ProvisionError, ProvisionSpec, Provisioner};

/// Docker settings for node backing containers
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DockerConfig {
    /// Image every node container runs
    #[serde(default = "default_image")]
    pub image: String,

    /// Command keeping the container alive
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Container name prefix
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Pass the node's CPU capacity to `--cpus`
    #[serde(default)]
    pub limit_cpus: bool,

    /// Network mode: "bridge", "host", "none" or a custom network name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

fn default_image() -> String {
    "alpine".to_string()
}

fn default_command() -> Vec<String> {
    vec!["sleep".to_string(), "3600".to_string()]
}

fn default_name_prefix() -> String {
    "clusterlet-node".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            command: default_command(),
            name_prefix: default_name_prefix(),
            limit_cpus: false,
            network: None,
        }
    }
}

// ============================================================================
// SBIO: Pure argument builders (no I/O)
// ============================================================================

/// Generate a unique container name
pub fn generate_container_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..12])
}

/// Generate Docker run arguments for a node container
pub fn generate_run_args(
    config: &DockerConfig,
    spec: &ProvisionSpec,
    container_name: &str,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        container_name.to_string(),
        "--label".to_string(),
        format!("clusterlet.auto-scaled={}", spec.auto_scaled),
    ];

    if let Some(network) = &config.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }

    if config.limit_cpus {
        args.push("--cpus".to_string());
        args.push(spec.cpu.to_string());
    }

    args.push(config.image.clone());
    args.extend(config.command.iter().cloned());

    args
}

/// Generate Docker stop arguments
pub fn generate_stop_args(container: &str) -> Vec<String> {
    vec!["stop".to_string(), container.to_string()]
}

/// Generate Docker rm arguments
pub fn generate_rm_args(container: &str) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), container.to_string()]
}

// ============================================================================
// I/O: docker CLI wrapper
// ============================================================================

/// Provisions node containers through the local `docker` CLI
#[derive(Debug, Clone, Default)]
pub struct DockerProvisioner {
    config: DockerConfig,
}

impl DockerProvisioner {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    async fn docker(&self, args: &[String]) -> Result<String, ProvisionError> {
        debug!("docker {:?}", args);

        let output = Command::new("docker").args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::CommandFailed {
                command: format!("docker {}", args.first().map(String::as_str).unwrap_or("")),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn provision(&self, spec: &ProvisionSpec) -> Result<BackingHandle, ProvisionError> {
        let container_name = generate_container_name(&self.config.name_prefix);
        let args = generate_run_args(&self.config, spec, &container_name);

        let container_id = self.docker(&args).await?;
        if container_id.is_empty() {
            return Err(ProvisionError::CommandFailed {
                command: "docker run".to_string(),
                message: "no container id returned".to_string(),
            });
        }

        info!(
            "Started container {} ({}) from image {}",
            container_name, container_id, self.config.image
        );
        Ok(BackingHandle::new(container_id))
    }

    async fn decommission(&self, handle: &BackingHandle) -> Result<(), ProvisionError> {
        if let Err(e) = self.docker(&generate_stop_args(handle.as_str())).await {
            warn!("docker stop {} failed, forcing removal: {}", handle, e);
        }

        self.docker(&generate_rm_args(handle.as_str())).await?;
        info!("Removed container {}", handle);
        Ok(())
    }
}
