//! Periodic background jobs.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// A task run at a fixed interval until shutdown.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// The name of this job (used for logging).
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Run once. Errors are logged and the job keeps its schedule.
    async fn execute(&self) -> Result<(), String>;
}

/// Runs registered jobs on their intervals until `shutdown`.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn Job>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    pub fn register<J: Job + 'static>(&mut self, job: J) {
        self.jobs.push(Arc::new(job));
    }

    /// Spawn every registered job. The first run happens one interval after start.
    pub fn start(&mut self) {
        info!("Starting job scheduler with {} jobs", self.jobs.len());

        for job in self.jobs.drain(..) {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.spawn(async move {
                let name = job.name();
                let mut interval = tokio::time::interval(job.interval());
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let start = std::time::Instant::now();
                            if let Err(e) = job.execute().await {
                                error!(
                                    job = name,
                                    elapsed_ms = start.elapsed().as_millis(),
                                    error = %e,
                                    "Job failed"
                                );
                            }
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                info!(job = name, "Job shutting down");
                                break;
                            }
                        }
                    }
                }
            });
        }
    }

    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every job to stop after its current run.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for jobs to stop, aborting whatever is left after `timeout`.
    pub async fn wait_for_shutdown(mut self, timeout: Duration) {
        let drain = async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Job task panicked: {}", e);
                }
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("Job shutdown timed out after {:?}", timeout);
            self.tasks.abort_all();
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
