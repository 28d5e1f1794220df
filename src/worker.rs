use crate::config::{AppConfig, OddsConfig};
use crate::errors::{EngineError, EngineResult};
use crate::execution::batch::{self, BatchLimits, BatchOutcome};
use crate::models::HitModel;
use crate::state::{OddsRequest, WorkerCounters, WorkerState};
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

struct WorkerJob {
    request: OddsRequest,
    reply: oneshot::Sender<BatchOutcome>,
}

/// Handle to the background odds worker.
///
/// One request in, one outcome out. Jobs queue on a bounded channel and run
/// one at a time on the blocking pool, so the async side never stalls on
/// numeric work. Cloning the handle shares the same worker.
#[derive(Clone)]
pub struct OddsWorker {
    tx: mpsc::Sender<WorkerJob>,
    cancel: Arc<AtomicBool>,
    state_rx: watch::Receiver<WorkerState>,
    counters: Arc<WorkerCounters>,
}

impl OddsWorker {
    pub fn spawn(model: Arc<dyn HitModel>, config: &AppConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<WorkerJob>(config.worker_queue.max(1));
        let (state_tx, state_rx) = watch::channel(WorkerState::Idle);
        let cancel = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(WorkerCounters::new());

        let handle = tokio::spawn(run_worker(
            rx,
            model,
            config.odds,
            config.batch_budget,
            cancel.clone(),
            state_tx,
            counters.clone(),
        ));

        (
            Self {
                tx,
                cancel,
                state_rx,
                counters,
            },
            handle,
        )
    }

    /// Queue a batch. Waits only for queue space, not for the batch itself;
    /// batches run and reply in submission order.
    pub async fn submit(&self, request: OddsRequest) -> EngineResult<PendingBatch> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerJob { request, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed("odds worker queue".into()))?;
        Ok(PendingBatch(reply_rx))
    }

    /// Stop the running batch (or the next one, if idle) between cells.
    /// Cells already evaluated are returned as a truncated result.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    #[inline]
    pub fn counters(&self) -> &WorkerCounters {
        &self.counters
    }
}

/// Reply handle for a queued batch.
#[derive(Debug)]
pub struct PendingBatch(oneshot::Receiver<BatchOutcome>);

impl PendingBatch {
    pub async fn outcome(self) -> EngineResult<BatchOutcome> {
        self.0
            .await
            .map_err(|_| EngineError::ChannelClosed("odds worker reply".into()))
    }
}

/// Worker loop. Owns the queue; exits when every handle is dropped.
async fn run_worker(
    mut rx: mpsc::Receiver<WorkerJob>,
    model: Arc<dyn HitModel>,
    odds_cfg: OddsConfig,
    budget: Option<Duration>,
    cancel: Arc<AtomicBool>,
    state_tx: watch::Sender<WorkerState>,
    counters: Arc<WorkerCounters>,
) {
    tracing::info!(model = model.name(), "odds worker started");

    while let Some(job) = rx.recv().await {
        state_tx.send_replace(WorkerState::Computing);

        let batch_id = uuid::Uuid::new_v4();
        let cells = job.request.cell_count();
        tracing::debug!(batch_id = %batch_id, cells, "batch received");

        let task_model = model.clone();
        let task_cancel = cancel.clone();
        let request = job.request;
        let joined = tokio::task::spawn_blocking(move || {
            let limits = BatchLimits {
                budget,
                cancel: &task_cancel,
            };
            batch::run_batch(batch_id, &request, task_model.as_ref(), &odds_cfg, &limits)
        })
        .await;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = EngineError::from(e);
                tracing::error!(batch_id = %batch_id, error = %err, "batch task aborted");
                BatchOutcome::Failed { reason: err.to_string() }
            }
        };

        match &outcome {
            BatchOutcome::Done { results, truncated } => {
                counters.batches_completed.fetch_add(1, Ordering::Relaxed);
                counters.cells_evaluated.fetch_add(results.len() as u64, Ordering::Relaxed);
                if *truncated {
                    counters.batches_truncated.fetch_add(1, Ordering::Relaxed);
                }
            }
            BatchOutcome::Failed { .. } => {
                counters.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        cancel.store(false, Ordering::Relaxed);
        state_tx.send_replace(outcome.state());
        tracing::debug!(batch_id = %batch_id, state = %outcome.state(), "batch finished");

        if job.reply.send(outcome).is_err() {
            tracing::warn!(batch_id = %batch_id, "caller went away before the batch finished");
        }
        state_tx.send_replace(WorkerState::Idle);
    }

    tracing::info!("odds worker shutting down");
}
