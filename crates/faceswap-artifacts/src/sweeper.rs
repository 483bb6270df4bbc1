//! Background retention sweep.

use crate::store::{ArtifactStore, SweepReport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodic retention sweep over an [`ArtifactStore`].
pub struct Sweeper;

impl Sweeper {
    /// Run [`ArtifactStore::sweep`] once immediately and then every `interval`.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub fn spawn(store: Arc<ArtifactStore>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let last_report = Arc::new(Mutex::new(None));
        let report_slot = Arc::clone(&last_report);
        let period = interval.max(Duration::from_secs(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = period.as_secs(), "artifact sweeper started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match store.sweep().await {
                            Ok(report) => {
                                if report.total_deleted() > 0 || report.failures > 0 {
                                    tracing::info!(
                                        staging = report.staging_deleted,
                                        output = report.output_deleted,
                                        debug = report.debug_deleted,
                                        failures = report.failures,
                                        "sweep complete"
                                    );
                                }
                                if let Ok(mut slot) = report_slot.lock() {
                                    *slot = Some(report);
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "sweep failed"),
                        }
                    }
                }
            }
            tracing::info!("artifact sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task,
            last_report,
        }
    }
}

pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    last_report: Arc<Mutex<Option<SweepReport>>>,
}

impl SweeperHandle {
    /// Report of the most recent successful sweep, if any has finished.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.lock().ok().and_then(|r| *r)
    }

    /// Signal the sweeper to stop and wait for it. A sweep in progress completes first.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "sweeper task ended abnormally");
        }
    }
}
