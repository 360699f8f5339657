use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clusterlet::cli::{format_dry_run, Args};
use clusterlet::cluster::{
    create_control_plane_router, spawn_reconciler, ClusterController, ControlPlaneState,
};
use clusterlet::config::{load_config, validate_config, ProvisionerKind};
use clusterlet::runtime::{DockerProvisioner, Provisioner, SimulatedProvisioner};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    // Load config, apply overrides, validate the result
    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            match args.config {
                Some(ref path) => error!("Failed to load config file {}: {}", path.display(), e),
                None => error!("Failed to load config: {}", e),
            }
            process::exit(1);
        }
    };
    args.apply_overrides(&mut config);
    if let Err(e) = validate_config(&config) {
        error!("Invalid configuration: {}", e);
        process::exit(1);
    }

    // Dry-run mode: print effective settings and exit
    if args.dry_run {
        let output = format_dry_run(&config, &args);
        println!("{}", output);
        return;
    }

    let provisioner: Arc<dyn Provisioner> = match config.provisioner {
        ProvisionerKind::Docker => Arc::new(DockerProvisioner::new(config.docker.clone())),
        ProvisionerKind::Simulated => Arc::new(SimulatedProvisioner::new()),
    };

    let controller = ClusterController::new(config.controller_config(), provisioner);
    let shutdown = spawn_reconciler(controller.clone(), config.reconcile_interval());

    let addr = args.listen_addr();
    info!("Starting clusterlet control plane on {}", addr);

    let app = create_control_plane_router(ControlPlaneState::new(controller));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            process::exit(1);
        }
    };

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health              - Health check");
    info!("  GET  /v1/status           - Cluster status");
    info!("  GET  /v1/nodes            - Nodes (POST to add)");
    info!("  GET  /v1/pods             - Pods (POST to launch)");
    info!("  GET  /v1/policies         - Network policies (POST to record)");
    info!("  PUT  /v1/scheduling       - Change scheduling strategy");
    info!("  POST /v1/autoscaling/toggle - Toggle auto-scaling");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    let _ = shutdown.send(true);

    if let Err(e) = served {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
