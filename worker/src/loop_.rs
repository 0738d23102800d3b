//! The worker training loop.
//!
//! Design, per iteration:
//! - pull weights and load them into the model's session,
//! - run the configured number of local `batch_train` steps on the
//!   blocking pool (the model is moved in and out, no cloning),
//! - push the accumulated delta under the pulled version token.
//!
//! A `VersionMismatch` from the master drops the delta and re-syncs;
//! transport errors back off briefly and retry.

use std::io;
use std::time::Duration;

use log::{debug, warn};
use tokio::task;
use training::Training;

use crate::client::{MasterClient, PushOutcome};

const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// How many successfully applied pushes to perform before returning.
    pub rounds: u64,
    /// Local `batch_train` calls between pull and push.
    pub steps_per_sync: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rounds: u64::MAX,
            steps_per_sync: 1,
        }
    }
}

pub struct WorkerLoop {
    cfg: WorkerConfig,
    client: MasterClient,
}

impl WorkerLoop {
    pub fn new(cfg: WorkerConfig, client: MasterClient) -> Self {
        assert!(cfg.steps_per_sync > 0, "steps_per_sync must be positive");
        Self { cfg, client }
    }

    /// Runs until `cfg.rounds` pushes have been applied, returning the
    /// model for inspection.
    pub async fn run<T>(self, mut model: T) -> io::Result<T>
    where
        T: Training + 'static,
    {
        let Self { cfg, client } = self;
        let mut applied = 0u64;

        while applied < cfg.rounds {
            let (version, weights) = match client.pull_weights().await {
                Ok(pulled) => pulled,
                Err(e) => {
                    warn!("pull failed: {e}, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            // CPU-bound section runs on the blocking pool; the model and
            // the pulled buffer are moved, not copied.
            let steps = cfg.steps_per_sync;
            let trained = task::spawn_blocking(move || {
                model.session().set_weights(&weights)?;
                for _ in 0..steps {
                    model.batch_train()?;
                }
                let update = model.session().get_update()?;
                Ok::<_, training::TrainError>((model, update))
            })
            .await
            .map_err(|e| io::Error::other(format!("training task failed: {e}")))?;

            let (trained_model, update) = trained.map_err(io::Error::other)?;
            model = trained_model;

            match client.push_update(&version, &update).await {
                Ok(PushOutcome::Applied(next)) => {
                    applied += 1;
                    debug!("update applied, master version {next}");
                }
                Ok(PushOutcome::VersionMismatch) => {
                    // The delta is already lost to a faster writer; the
                    // next pull recomputes it against fresh weights.
                    debug!("version mismatch, dropping delta and re-syncing");
                }
                Err(e) => {
                    warn!("push failed: {e}, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        Ok(model)
    }
}
