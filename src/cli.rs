use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::cluster::{SchedulingStrategy, CONTROL_PLANE_PORT};
use crate::config::{ClusterConfig, ProvisionerKind};

#[derive(Parser, Debug)]
#[command(name = "clusterlet")]
#[command(about = "Schedule CPU-bound pods onto a self-healing, auto-scaling node pool")]
#[command(version)]
pub struct Args {
    /// Path to the cluster config file (YAML or JSON)
    #[arg(short, long, value_name = "FILE", env = "CLUSTERLET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: validate config and show the effective settings without running
    #[arg(long)]
    pub dry_run: bool,

    /// Address the control plane API binds to
    #[arg(long, value_name = "ADDR", env = "CLUSTERLET_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Port the control plane API listens on
    #[arg(short, long, value_name = "PORT", env = "CLUSTERLET_PORT")]
    pub port: Option<u16>,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Override the provisioner backing new nodes
    #[arg(long, value_enum, env = "CLUSTERLET_PROVISIONER")]
    pub provisioner: Option<ProvisionerKind>,

    /// Override the initial scheduling strategy (first-fit, best-fit, worst-fit)
    #[arg(long, value_name = "STRATEGY", env = "CLUSTERLET_STRATEGY")]
    pub strategy: Option<SchedulingStrategy>,

    /// Start with auto-scaling enabled
    #[arg(long)]
    pub autoscale: bool,

    /// Override the heartbeat timeout in seconds
    #[arg(long, value_name = "SECS", env = "CLUSTERLET_NODE_TIMEOUT")]
    pub node_timeout: Option<u64>,

    /// Override the reconciliation interval in seconds
    #[arg(long, value_name = "SECS", env = "CLUSTERLET_INTERVAL")]
    pub interval: Option<u64>,
}

impl Args {
    /// Address the API server listens on
    pub fn listen_addr(&self) -> String {
        let bind_addr = self.bind_addr.as_deref().unwrap_or("0.0.0.0");
        let port = self.port.unwrap_or(CONTROL_PLANE_PORT);
        format!("{}:{}", bind_addr, port)
    }

    /// Apply command-line overrides on top of a loaded config
    pub fn apply_overrides(&self, config: &mut ClusterConfig) {
        if let Some(provisioner) = self.provisioner {
            config.provisioner = provisioner;
        }
        if let Some(strategy) = self.strategy {
            config.scheduling_strategy = strategy;
        }
        if self.autoscale {
            config.autoscaling.enabled = true;
        }
        if let Some(timeout) = self.node_timeout {
            config.node_timeout_secs = timeout;
        }
        if let Some(interval) = self.interval {
            config.reconcile_interval_secs = interval;
        }
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Format a dry-run output showing the effective configuration.
/// Pure function - returns a formatted string.
pub fn format_dry_run(config: &ClusterConfig, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "clusterlet v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    match args.config {
        Some(ref path) => output.push_str(&format!("Config: {}\n", path.display())),
        None => output.push_str("Config: (defaults)\n"),
    }
    output.push_str(&format!("Listen: {}\n\n", args.listen_addr()));

    output.push_str("Reconciliation:\n");
    output.push_str(&format!(
        "  Interval: {}s\n",
        config.reconcile_interval_secs
    ));
    output.push_str(&format!("  Node timeout: {}s\n", config.node_timeout_secs));
    output.push_str(&format!(
        "  Scheduling strategy: {}\n\n",
        config.scheduling_strategy
    ));

    let scaling = &config.autoscaling;
    output.push_str(&format!(
        "Auto-scaling: {}\n",
        if scaling.enabled { "enabled" } else { "disabled" }
    ));
    output.push_str(&format!(
        "  Nodes: {} - {}\n",
        scaling.min_nodes, scaling.max_nodes
    ));
    output.push_str(&format!(
        "  Scale up above: {:.0}%\n",
        scaling.cpu_threshold * 100.0
    ));
    output.push_str(&format!(
        "  Scale down below: {:.0}%\n",
        scaling.scale_down_threshold() * 100.0
    ));
    output.push_str(&format!("  New node CPU: {}\n\n", scaling.node_cpu));

    match config.provisioner {
        ProvisionerKind::Docker => {
            output.push_str("Provisioner: docker\n");
            output.push_str(&format!(
                "  Image: {} {}\n",
                config.docker.image,
                config.docker.command.join(" ")
            ));
            if let Some(ref network) = config.docker.network {
                output.push_str(&format!("  Network: {}\n", network));
            }
        }
        ProvisionerKind::Simulated => output.push_str("Provisioner: simulated\n"),
    }

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to start control plane. Remove --dry-run to execute.\n");

    output
}
