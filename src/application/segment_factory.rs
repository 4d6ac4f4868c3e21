//! Segment Task Factory: builds and submits generation requests for a chain.

use crate::domain::av::frame::ExtractedFrame;
use crate::domain::tasks::{BatchMetadata, GenerationRequest, SegmentScript, TaskParams};
use crate::ports::queue::TaskQueuePort;
use serde_json::{Map, Value};
use std::error::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Prompt plus opaque generation parameters for one planned segment.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ScriptInput {
    pub prompt: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Number the scripts 1..=N under `batch_id`.
pub fn plan_scripts(batch_id: &str, inputs: Vec<ScriptInput>) -> Vec<SegmentScript> {
    let total = inputs.len();
    inputs
        .into_iter()
        .enumerate()
        .map(|(position, input)| SegmentScript {
            index: position + 1,
            total,
            prompt: input.prompt,
            params: input.params,
            batch_id: batch_id.to_string(),
        })
        .collect()
}

/// Request for segment 1. Shared parameters are overridden by the script's own.
pub fn build_first_request(
    batch_id: &str,
    scripts: Vec<SegmentScript>,
    shared: &Map<String, Value>,
) -> Option<GenerationRequest> {
    let first = scripts.first()?.clone();
    let mut params = shared.clone();
    params.extend(first.params);

    Some(GenerationRequest {
        prompt: first.prompt,
        seed_image: None,
        params,
        batch: BatchMetadata::for_segment(batch_id, 1, scripts),
    })
}

/// Request for the segment after `current`, seeded with `seed` when there is one.
///
/// The previous task's model/style parameters carry forward; the next
/// script's own parameters take precedence.
pub fn build_next_request(
    current: &BatchMetadata,
    previous: &TaskParams,
    seed: Option<&ExtractedFrame>,
) -> GenerationRequest {
    let next_index = current.segment_index + 1;
    let script = current.script(next_index);

    let mut params = previous.extra.clone();
    let prompt = match script {
        Some(script) => {
            params.extend(script.params.clone());
            script.prompt.clone()
        }
        None => previous.prompt.clone(),
    };

    GenerationRequest {
        prompt,
        seed_image: seed.map(ExtractedFrame::to_data_url),
        params,
        batch: BatchMetadata {
            batch_id: current.batch_id.clone(),
            segment_index: next_index,
            total_segments: current.total_segments,
            scripts: current.scripts.clone(),
            needs_last_frame: next_index < current.total_segments,
        },
    }
}

pub struct SegmentTaskFactory<Q> {
    queue: Q,
}

impl<Q> SegmentTaskFactory<Q>
where
    Q: TaskQueuePort,
{
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub async fn submit_first(
        &self,
        batch_id: &str,
        scripts: Vec<SegmentScript>,
        shared: &Map<String, Value>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let request = build_first_request(batch_id, scripts, shared).ok_or("a batch needs at least one script")?;
        let task_id = self.queue.submit_task(request).await?;
        info!(batch_id, task_id = %task_id, "submitted segment 1");
        Ok(task_id)
    }

    /// Submit the segment after `current`. Without a seed frame the segment is
    /// generated from its prompt alone.
    pub async fn create_next(
        &self,
        current: &BatchMetadata,
        previous: &TaskParams,
        seed: Option<&ExtractedFrame>,
        cancel: &CancellationToken,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let request = build_next_request(current, previous, seed);
        let next_index = request.batch.segment_index;
        if seed.is_none() {
            warn!(
                batch_id = %current.batch_id,
                segment_index = next_index,
                "no seed frame, submitting text-only segment"
            );
        }

        let task_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err("batch cancelled".into()),
            submitted = self.queue.submit_task(request) => submitted?,
        };
        info!(
            batch_id = %current.batch_id,
            segment_index = next_index,
            task_id = %task_id,
            seeded = seed.is_some(),
            "submitted next segment"
        );
        Ok(task_id)
    }
}
