//! Reconciliation loop - the single periodic driver of the control plane
//!
//! Every tick runs three phases in order: the failure sweep, the
//! auto-scaler (a no-op while disabled) and the telemetry simulator. A
//! phase that errors or panics is logged and skipped; the remaining phases
//! and later ticks still run. A slow tick delays the next one instead of
//! overlapping it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::autoscaler::ScalingDecision;
use super::controller::ClusterController;
use super::failure::SweepReport;
use super::store::ClusterError;

/// What each phase of one tick produced; `None` for a phase that failed
#[derive(Debug, Default)]
pub struct TickReport {
    pub sweep: Option<SweepReport>,
    pub scaling: Option<ScalingDecision>,
    pub sampled: Option<usize>,
}

/// Spawn the reconciliation loop as a background task
///
/// Send `true` on the returned channel (or drop it) to stop the loop.
pub fn spawn_reconciler(controller: ClusterController, period: Duration) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Reconciler started, ticking every {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_tick(&controller).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}

/// Run one reconciliation tick
pub async fn run_tick(controller: &ClusterController) -> TickReport {
    let sweep = run_phase("failure-sweep", controller.run_failure_sweep()).await;
    let scaling = run_phase("autoscaler", controller.run_autoscaler()).await;
    let sampled = run_phase("telemetry", async {
        Ok::<_, ClusterError>(controller.run_telemetry().await)
    })
    .await;

    debug!("Reconciler tick complete");
    TickReport {
        sweep,
        scaling,
        sampled,
    }
}

/// Run one phase, containing both errors and panics
async fn run_phase<T, F>(name: &'static str, phase: F) -> Option<T>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    match AssertUnwindSafe(phase).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("Reconciler phase '{}' failed: {}", name, e);
            None
        }
        Err(_) => {
            error!("Reconciler phase '{}' panicked", name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::autoscaler::AutoscalerConfig;
    use crate::cluster::controller::ControllerConfig;
    use crate::runtime::SimulatedProvisioner;
    use std::sync::Arc;

    fn make_controller(autoscale: bool) -> (ClusterController, Arc<SimulatedProvisioner>) {
        let provisioner = Arc::new(SimulatedProvisioner::new());
        let config = ControllerConfig {
            autoscaler: AutoscalerConfig {
                enabled: autoscale,
                ..Default::default()
            },
            ..Default::default()
        };
        (ClusterController::new(config, provisioner.clone()), provisioner)
    }

    #[tokio::test]
    async fn test_run_tick_runs_all_phases() {
        let (controller, _) = make_controller(false);
        let node = controller.add_node(4.0).await.unwrap();
        let pod = controller.launch_pod(1.0, Some(node)).await.unwrap();

        let report = run_tick(&controller).await;

        assert!(report.sweep.unwrap().is_empty());
        assert_eq!(report.scaling, Some(ScalingDecision::NoChange));
        assert_eq!(report.sampled, Some(1));
        assert!(controller.pod_usage(pod).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_phase_does_not_stop_tick() {
        let (controller, provisioner) = make_controller(true);
        let node = controller.add_node(2.0).await.unwrap();
        controller.launch_pod(2.0, Some(node)).await.unwrap();
        provisioner.set_fail_provision(true);

        let report = run_tick(&controller).await;

        assert!(report.sweep.is_some());
        assert!(report.scaling.is_none());
        assert_eq!(report.sampled, Some(1));
    }

    #[tokio::test]
    async fn test_panicking_phase_is_contained() {
        let result = run_phase("boom", async {
            if true {
                panic!("phase exploded");
            }
            Ok::<u32, ClusterError>(1)
        })
        .await;
        assert!(result.is_none());

        let result = run_phase("ok", async { Ok::<u32, ClusterError>(7) }).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn test_loop_reschedules_and_stops() {
        let (controller, _) = make_controller(false);
        let n1 = controller.add_node(4.0).await.unwrap();
        let n2 = controller.add_node(4.0).await.unwrap();
        controller.launch_pod(2.0, Some(n1)).await.unwrap();
        controller.simulate_node_failure(n1).await.unwrap();

        let shutdown = spawn_reconciler(controller.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let running = controller.list_pods(false).await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].node, Some(n2));

        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(shutdown.is_closed());
    }
}
