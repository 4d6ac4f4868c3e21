use super::hub::EventHub;
use super::TaskEvent;
use crate::ports::control::ChainControl;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Feed hub events to the chain. Each event runs on its own task so a long
/// merge in one batch does not hold up the others.
///
/// Dropped events are not replayed. When the receiver lags, every open batch
/// is logged since any of them may have lost its completion and will need a
/// manual merge or a resubmitted segment.
pub fn start(event_hub: Arc<EventHub>, chain: Arc<dyn ChainControl>) -> JoinHandle<()> {
    let mut rx = event_hub.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(TaskEvent::Updated(task)) => {
                    let chain = chain.clone();
                    tokio::spawn(async move {
                        let task_id = task.id.clone();
                        let outcome = chain.on_task_event(task).await;
                        debug!(task_id = %task_id, ?outcome, "task event handled");
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged, events dropped");
                    for batch in chain.unfinished() {
                        warn!(
                            batch_id = %batch.batch_id,
                            completed = batch.completed_segments,
                            total = batch.total_segments,
                            "batch may have missed a completion; POST /batches/{}/merge or resubmit the segment",
                            batch.batch_id
                        );
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::orchestrator::{BatchSnapshot, ChainOutcome, IgnoreReason};
    use crate::domain::batch::BatchPhase;
    use crate::domain::tasks::{Task, TaskKind, TaskParams, TaskStatus};
    use crate::ports::control::MockChainControl;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_events_reach_the_chain() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut chain = MockChainControl::new();
        chain.expect_on_task_event().returning(move |task| {
            let _ = seen_tx.send(task.id);
            ChainOutcome::Ignored(IgnoreReason::NotChained)
        });

        let hub = Arc::new(EventHub::new(8));
        let handle = start(hub.clone(), Arc::new(chain));

        hub.publish(TaskEvent::Updated(task("task-9"))).unwrap();

        assert_eq!(seen_rx.recv().await.unwrap(), "task-9");
        handle.abort();
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            kind: TaskKind::Video,
            status: TaskStatus::Completed,
            completed_at: None,
            params: TaskParams::default(),
            result: None,
        }
    }

    #[tokio::test]
    async fn test_lag_reports_open_batches_and_keeps_listening() {
        let (asked_tx, mut asked_rx) = mpsc::unbounded_channel();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut chain = MockChainControl::new();
        chain.expect_unfinished().times(1).returning(move || {
            let _ = asked_tx.send(());
            vec![BatchSnapshot {
                batch_id: "batch-1".into(),
                total_segments: 3,
                completed_segments: 1,
                phase: BatchPhase::Collecting,
                cancelled: false,
            }]
        });
        chain.expect_on_task_event().returning(move |task| {
            let _ = seen_tx.send(task.id);
            ChainOutcome::Ignored(IgnoreReason::NotChained)
        });

        let hub = Arc::new(EventHub::new(1));
        let handle = start(hub.clone(), Arc::new(chain));

        // The listener has not run yet, so only the newest event survives.
        for id in ["task-1", "task-2", "task-3"] {
            hub.publish(TaskEvent::Updated(task(id))).unwrap();
        }

        asked_rx.recv().await.unwrap();
        assert_eq!(seen_rx.recv().await.unwrap(), "task-3");
        handle.abort();
    }
}
