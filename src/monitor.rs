//! Application state and the job worker.
//!
//! [`Monitor`] wires the services around one shared [`Store`] and one
//! [`TaskQueue`]. HTTP handlers receive it as axum state; the job worker
//! started by [`run_jobs`] executes the fired jobs one at a time.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::AlertManager;
use crate::analysis::AnalysisService;
use crate::config::TimingConfig;
use crate::devices::DeviceRegistry;
use crate::liveness::LivenessMonitor;
use crate::readings::ReadingService;
use crate::scheduler::{Job, JobReceiver, TaskQueue};
use crate::simulation::{SimulationScheduler, TickOutcome};
use crate::store::Store;

// ---

pub struct Monitor {
    pub timing: TimingConfig,
    pub devices: DeviceRegistry,
    pub readings: ReadingService,
    pub alerts: AlertManager,
    pub analysis: AnalysisService,
    pub simulation: SimulationScheduler,
    pub liveness: LivenessMonitor,
    pub queue: TaskQueue,
}

impl Monitor {
    /// Build the services. The returned receiver must be handed to
    /// [`run_jobs`], otherwise scheduled jobs are never executed.
    pub fn new(store: Arc<dyn Store>, timing: TimingConfig) -> (Arc<Self>, JobReceiver) {
        // ---
        let (queue, rx) = TaskQueue::new();
        let alerts = AlertManager::new(store.clone());
        let readings = ReadingService::new(store.clone(), alerts.clone());
        let devices = DeviceRegistry::new(store.clone(), alerts.clone());
        let analysis = AnalysisService::new(store.clone(), alerts.clone());
        let simulation = SimulationScheduler::new(
            store.clone(),
            readings.clone(),
            alerts.clone(),
            queue.clone(),
            timing.simulation_interval,
            timing.history_window,
        );
        let liveness = LivenessMonitor::new(
            store,
            alerts.clone(),
            queue.clone(),
            timing.staleness_threshold,
            timing.liveness_scan_interval,
        );

        let monitor = Arc::new(Self {
            timing,
            devices,
            readings,
            alerts,
            analysis,
            simulation,
            liveness,
            queue,
        });
        (monitor, rx)
    }

    /// Execute one fired job. Errors are logged; the job has already armed
    /// its own continuation where one is due.
    pub async fn dispatch(&self, job: Job) {
        // ---
        match job {
            Job::GenerationTick(device_id) => match self.simulation.tick(device_id).await {
                Ok(TickOutcome::Generated(_)) => {}
                Ok(TickOutcome::Terminated) => {
                    debug!(device_id = %device_id, "generation chain terminated")
                }
                Err(err) => warn!(device_id = %device_id, error = %err, "generation tick failed"),
            },
            Job::LivenessScan => {
                if let Err(err) = self.liveness.run_scheduled().await {
                    warn!(error = %err, "liveness scan failed");
                }
            }
        }
    }
}

/// Drain fired jobs until `shutdown` is cancelled or every sender is gone.
pub async fn run_jobs(monitor: Arc<Monitor>, mut rx: JobReceiver, shutdown: CancellationToken) {
    // ---
    info!("job worker started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("job worker shutting down");
                break;
            }
            job = rx.recv() => match job {
                Some(job) => monitor.dispatch(job).await,
                None => break,
            },
        }
    }
}
