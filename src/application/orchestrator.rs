//! Chain Orchestrator: the only component that decides whether a finished
//! segment advances its chain, triggers the merge, or is ignored.

use crate::application::segment_factory::{plan_scripts, ScriptInput, SegmentTaskFactory};
use crate::application::sink::SinkOutcome;
use crate::domain::av::frame::FramePosition;
use crate::domain::batch::{BatchPhase, BatchState, Decision, Rejection};
use crate::domain::progress::BatchProgress;
use crate::domain::tasks::{BatchMetadata, Task, TaskKind, TaskStatus};
use crate::ports::control::ChainControl;
use crate::ports::pipeline::{FrameSource, MergePort, ResultPort};
use crate::ports::queue::TaskQueuePort;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PROGRESS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Completed before this orchestrator started.
    Stale,
    /// Carries no batch metadata.
    NotChained,
    Duplicate,
    OutOfRange,
    NotVideoCompletion,
    Cancelled,
}

/// What handling one event led to. Batch-scoped failures end up here, never
/// as an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Ignored(IgnoreReason),
    Advanced { next_task_id: String, seeded: bool },
    AdvanceFailed { reason: String },
    /// A "create next" for the same segment is already in flight.
    AdvanceSkipped,
    Waiting { completed: usize, total: usize },
    Merged(SinkOutcome),
    MergeFailed { reason: String },
    /// The merge succeeded but neither insertion nor download did.
    DeliveryFailed { reason: String },
    MergeInProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: String,
    pub total_segments: usize,
    pub completed_segments: usize,
    #[serde(flatten)]
    pub phase: BatchPhase,
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("A batch needs at least one script")]
    NoScripts,

    #[error("Failed to submit the first segment: {0}")]
    Submit(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NudgeError {
    #[error("Unknown batch {0}")]
    UnknownBatch(String),

    #[error("Batch has {completed} of {total} segments")]
    NotReady { completed: usize, total: usize },

    #[error("Batch is merging or already merged")]
    Busy,
}

/// A merge claimed under the lock, ready to run.
#[derive(Debug)]
pub struct PendingMerge {
    batch_id: String,
    urls: Vec<String>,
    cancel: CancellationToken,
}

impl PendingMerge {
    pub(crate) fn new(batch_id: impl Into<String>, urls: Vec<String>, cancel: CancellationToken) -> Self {
        Self {
            batch_id: batch_id.into(),
            urls,
            cancel,
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }
}

pub struct ChainOrchestrator<Q, F, M, R> {
    factory: SegmentTaskFactory<Q>,
    frames: F,
    merger: M,
    sink: R,
    started_at: DateTime<Utc>,
    batches: Mutex<HashMap<String, BatchState>>,
    progress: broadcast::Sender<BatchProgress>,
}

impl<Q, F, M, R> ChainOrchestrator<Q, F, M, R>
where
    Q: TaskQueuePort,
    F: FrameSource,
    M: MergePort,
    R: ResultPort,
{
    pub fn new(queue: Q, frames: F, merger: M, sink: R) -> Self {
        Self::with_started_at(queue, frames, merger, sink, Utc::now())
    }

    pub fn with_started_at(queue: Q, frames: F, merger: M, sink: R, started_at: DateTime<Utc>) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            factory: SegmentTaskFactory::new(queue),
            frames,
            merger,
            sink,
            started_at,
            batches: Mutex::new(HashMap::new()),
            progress,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    // Never held across an await.
    fn batches(&self) -> MutexGuard<'_, HashMap<String, BatchState>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry point for raw queue events.
    pub async fn on_task_event(&self, task: &Task) -> ChainOutcome {
        if task.status != TaskStatus::Completed || task.kind != TaskKind::Video {
            return ChainOutcome::Ignored(IgnoreReason::NotVideoCompletion);
        }
        self.on_segment_completed(task).await
    }

    pub async fn on_segment_completed(&self, task: &Task) -> ChainOutcome {
        if let Some(completed_at) = task.completed_at {
            if completed_at < self.started_at {
                debug!(task_id = %task.id, %completed_at, "ignoring stale task");
                return ChainOutcome::Ignored(IgnoreReason::Stale);
            }
        }

        let Some(meta) = task.params.batch.as_ref() else {
            debug!(task_id = %task.id, "task is not part of a chain");
            return ChainOutcome::Ignored(IgnoreReason::NotChained);
        };
        if !meta.is_in_range() {
            // Rejected before the map is touched so no batch is created for it.
            debug!(
                batch_id = %meta.batch_id,
                segment_index = meta.segment_index,
                total = meta.total_segments,
                "segment index out of range"
            );
            return ChainOutcome::Ignored(IgnoreReason::OutOfRange);
        }
        let url = task.result_url();

        let (decision, phase, cancel, completed, total) = {
            let mut batches = self.batches();
            let batch = batches
                .entry(meta.batch_id.clone())
                .or_insert_with(|| BatchState::new(meta.total_segments));

            if batch.cancel_token().is_cancelled() {
                return ChainOutcome::Ignored(IgnoreReason::Cancelled);
            }
            if let Err(rejection) = batch.record(meta.segment_index, url) {
                debug!(
                    batch_id = %meta.batch_id,
                    segment_index = meta.segment_index,
                    ?rejection,
                    "ignoring completion"
                );
                return ChainOutcome::Ignored(match rejection {
                    Rejection::Duplicate => IgnoreReason::Duplicate,
                    Rejection::OutOfRange => IgnoreReason::OutOfRange,
                });
            }
            let decision = batch.decide(meta.segment_index);
            (
                decision,
                batch.phase(),
                batch.cancel_token(),
                batch.completed_count(),
                batch.total_segments(),
            )
        };

        info!(
            batch_id = %meta.batch_id,
            segment_index = meta.segment_index,
            task_id = %task.id,
            completed,
            total,
            "segment completed"
        );

        match decision {
            Decision::Advance { from_segment } => self.advance(task, meta, from_segment, url, cancel).await,
            Decision::Merge { urls } => {
                self.run_merge(PendingMerge::new(meta.batch_id.clone(), urls, cancel))
                    .await
            }
            Decision::Busy if matches!(phase, BatchPhase::Merging | BatchPhase::Merged) => {
                ChainOutcome::MergeInProgress
            }
            Decision::Busy => {
                debug!(batch_id = %meta.batch_id, segment_index = meta.segment_index, "next segment already being created");
                ChainOutcome::AdvanceSkipped
            }
            Decision::Wait => ChainOutcome::Waiting { completed, total },
        }
    }

    async fn advance(
        &self,
        task: &Task,
        meta: &BatchMetadata,
        from_segment: usize,
        url: Option<&str>,
        cancel: CancellationToken,
    ) -> ChainOutcome {
        let seed = match url.filter(|_| meta.needs_last_frame) {
            Some(url) => match self.frames.extract(url, FramePosition::Last, cancel.clone()).await {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!(batch_id = %meta.batch_id, segment_index = from_segment, error = %e, "frame extraction failed");
                    None
                }
            },
            None => None,
        };

        let submitted = self
            .factory
            .create_next(meta, &task.params, seed.as_ref(), &cancel)
            .await;

        if let Some(batch) = self.batches().get_mut(&meta.batch_id) {
            batch.finish_advance(from_segment);
        }

        match submitted {
            Ok(next_task_id) => ChainOutcome::Advanced {
                next_task_id,
                seeded: seed.is_some(),
            },
            Err(e) => {
                error!(
                    batch_id = %meta.batch_id,
                    segment_index = from_segment + 1,
                    error = %e,
                    "failed to create next segment, batch stalls"
                );
                ChainOutcome::AdvanceFailed { reason: e.to_string() }
            }
        }
    }

    /// Claim the merge of a batch whose earlier merge failed.
    pub fn claim_merge(&self, batch_id: &str) -> Result<PendingMerge, NudgeError> {
        let mut batches = self.batches();
        let batch = batches
            .get_mut(batch_id)
            .ok_or_else(|| NudgeError::UnknownBatch(batch_id.to_string()))?;

        match batch.begin_merge() {
            Decision::Merge { urls } => Ok(PendingMerge::new(batch_id, urls, batch.cancel_token())),
            Decision::Busy => Err(NudgeError::Busy),
            _ => Err(NudgeError::NotReady {
                completed: batch.completed_count(),
                total: batch.total_segments(),
            }),
        }
    }

    pub async fn retrigger_merge(&self, batch_id: &str) -> Result<ChainOutcome, NudgeError> {
        let pending = self.claim_merge(batch_id)?;
        info!(batch_id, "merge re-triggered");
        Ok(self.run_merge(pending).await)
    }

    /// Run a claimed merge and hand the result to the sink.
    pub async fn run_merge(&self, pending: PendingMerge) -> ChainOutcome {
        let PendingMerge { batch_id, urls, cancel } = pending;
        info!(batch_id = %batch_id, segments = urls.len(), "merging batch");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = {
            let progress = self.progress.clone();
            let batch_id = batch_id.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let _ = progress.send(BatchProgress {
                        batch_id: batch_id.clone(),
                        progress: event,
                    });
                }
            })
        };

        let merged = self.merger.merge(&batch_id, urls, tx, cancel).await;
        let _ = forward.await;

        let succeeded = merged.is_ok();
        if let Some(batch) = self.batches().get_mut(&batch_id) {
            batch.finish_merge(succeeded);
        }

        let video = match merged {
            Ok(video) => video,
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "merge failed for batch {}", batch_id);
                return ChainOutcome::MergeFailed {
                    reason: format!("Merge failed for batch {}: {}", batch_id, e),
                };
            }
        };

        match self.sink.deliver(video).await {
            Ok(outcome) => {
                if outcome.is_warning() {
                    warn!(batch_id = %batch_id, "{}", outcome.message());
                } else {
                    info!(batch_id = %batch_id, "{}", outcome.message());
                }
                ChainOutcome::Merged(outcome)
            }
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "merged video could not be delivered");
                ChainOutcome::DeliveryFailed { reason: e.to_string() }
            }
        }
    }

    /// Plan a new batch and submit its first segment.
    pub async fn start_batch(
        &self,
        scripts: Vec<ScriptInput>,
        params: Map<String, Value>,
    ) -> Result<(String, String), StartError> {
        if scripts.is_empty() {
            return Err(StartError::NoScripts);
        }
        let batch_id = Uuid::new_v4().to_string();
        let scripts = plan_scripts(&batch_id, scripts);
        let total = scripts.len();

        let task_id = self
            .factory
            .submit_first(&batch_id, scripts, &params)
            .await
            .map_err(|e| StartError::Submit(e.to_string()))?;

        self.batches()
            .entry(batch_id.clone())
            .or_insert_with(|| BatchState::new(total));
        info!(batch_id = %batch_id, task_id = %task_id, total, "started batch");
        Ok((batch_id, task_id))
    }

    /// Cancel everything in flight for a batch. Returns false for unknown ids.
    pub fn cancel_batch(&self, batch_id: &str) -> bool {
        match self.batches().get(batch_id) {
            Some(batch) => {
                batch.cancel_token().cancel();
                info!(batch_id, "batch cancelled");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<BatchSnapshot> {
        let mut snapshots: Vec<BatchSnapshot> = self
            .batches()
            .iter()
            .map(|(id, batch)| snapshot_of(id, batch))
            .collect();
        snapshots.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        snapshots
    }

    pub fn batch_snapshot(&self, batch_id: &str) -> Option<BatchSnapshot> {
        self.batches().get(batch_id).map(|batch| snapshot_of(batch_id, batch))
    }

    /// Batches that have not merged yet and were not cancelled.
    pub fn unfinished(&self) -> Vec<BatchSnapshot> {
        let mut open: Vec<BatchSnapshot> = self
            .batches()
            .iter()
            .filter(|(_, batch)| !batch.is_finished() && !batch.cancel_token().is_cancelled())
            .map(|(id, batch)| snapshot_of(id, batch))
            .collect();
        open.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        open
    }
}

fn snapshot_of(batch_id: &str, batch: &BatchState) -> BatchSnapshot {
    BatchSnapshot {
        batch_id: batch_id.to_string(),
        total_segments: batch.total_segments(),
        completed_segments: batch.completed_count(),
        phase: batch.phase(),
        cancelled: batch.cancel_token().is_cancelled(),
    }
}

#[async_trait]
impl<Q, F, M, R> ChainControl for ChainOrchestrator<Q, F, M, R>
where
    Q: TaskQueuePort,
    F: FrameSource,
    M: MergePort,
    R: ResultPort,
{
    async fn on_task_event(&self, task: Task) -> ChainOutcome {
        ChainOrchestrator::on_task_event(self, &task).await
    }

    async fn start_batch(
        &self,
        scripts: Vec<ScriptInput>,
        params: Map<String, Value>,
    ) -> Result<(String, String), StartError> {
        ChainOrchestrator::start_batch(self, scripts, params).await
    }

    fn claim_merge(&self, batch_id: &str) -> Result<PendingMerge, NudgeError> {
        ChainOrchestrator::claim_merge(self, batch_id)
    }

    async fn run_merge(&self, pending: PendingMerge) -> ChainOutcome {
        ChainOrchestrator::run_merge(self, pending).await
    }

    fn cancel_batch(&self, batch_id: &str) -> bool {
        ChainOrchestrator::cancel_batch(self, batch_id)
    }

    fn snapshot(&self) -> Vec<BatchSnapshot> {
        ChainOrchestrator::snapshot(self)
    }

    fn batch_snapshot(&self, batch_id: &str) -> Option<BatchSnapshot> {
        ChainOrchestrator::batch_snapshot(self, batch_id)
    }

    fn unfinished(&self) -> Vec<BatchSnapshot> {
        ChainOrchestrator::unfinished(self)
    }
}
