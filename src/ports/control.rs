//! Inbound contract: what the HTTP API and the event listener may ask of the chain.

use crate::application::orchestrator::{BatchSnapshot, ChainOutcome, NudgeError, PendingMerge, StartError};
use crate::application::segment_factory::ScriptInput;
use crate::domain::tasks::Task;
use async_trait::async_trait;
use serde_json::{Map, Value};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainControl: Send + Sync {
    async fn on_task_event(&self, task: Task) -> ChainOutcome;

    /// Returns `(batch_id, first_task_id)`.
    async fn start_batch(
        &self,
        scripts: Vec<ScriptInput>,
        params: Map<String, Value>,
    ) -> Result<(String, String), StartError>;

    fn claim_merge(&self, batch_id: &str) -> Result<PendingMerge, NudgeError>;

    async fn run_merge(&self, pending: PendingMerge) -> ChainOutcome;

    fn cancel_batch(&self, batch_id: &str) -> bool;

    fn snapshot(&self) -> Vec<BatchSnapshot>;

    fn batch_snapshot(&self, batch_id: &str) -> Option<BatchSnapshot>;

    /// Batches still waiting on segments or a merge.
    fn unfinished(&self) -> Vec<BatchSnapshot>;
}
