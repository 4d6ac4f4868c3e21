use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of work an external generation task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Video,
    Image,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A task as reported by the external generation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub params: TaskParams,
    #[serde(default)]
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn result_url(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|result| result.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchMetadata>,
    /// Model and style parameters, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub url: Option<String>,
}

/// One planned chunk of a long video. Never mutated after the batch is planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentScript {
    /// 1-based position in the chain
    pub index: usize,
    pub total: usize,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    pub batch_id: String,
}

/// Chain bookkeeping carried inside each task's parameters so it survives
/// the round trip through the external queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub batch_id: String,
    pub segment_index: usize,
    pub total_segments: usize,
    #[serde(default)]
    pub scripts: Vec<SegmentScript>,
    pub needs_last_frame: bool,
}

impl BatchMetadata {
    pub fn for_segment(
        batch_id: impl Into<String>,
        segment_index: usize,
        scripts: Vec<SegmentScript>,
    ) -> Self {
        let total_segments = scripts.len();
        Self {
            batch_id: batch_id.into(),
            segment_index,
            total_segments,
            scripts,
            needs_last_frame: segment_index < total_segments,
        }
    }

    /// Segment indices run 1..=total_segments.
    pub fn is_in_range(&self) -> bool {
        (1..=self.total_segments).contains(&self.segment_index)
    }

    pub fn script(&self, index: usize) -> Option<&SegmentScript> {
        self.scripts.iter().find(|script| script.index == index)
    }
}

/// Body submitted to the generation service for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_image: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
    pub batch: BatchMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_deserializes_from_queue_payload() {
        let task: Task = serde_json::from_value(json!({
            "id": "task-1",
            "type": "video",
            "status": "completed",
            "completedAt": "2026-01-01T00:00:00Z",
            "params": {
                "prompt": "a fox",
                "model": "veo",
                "batch": {
                    "batchId": "batch-1",
                    "segmentIndex": 1,
                    "totalSegments": 3,
                    "scripts": [],
                    "needsLastFrame": true
                }
            },
            "result": { "url": "seg1.mp4" }
        }))
        .unwrap();

        assert_eq!(task.kind, TaskKind::Video);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_url(), Some("seg1.mp4"));
        assert_eq!(task.params.extra.get("model"), Some(&json!("veo")));
        let batch = task.params.batch.unwrap();
        assert_eq!(batch.batch_id, "batch-1");
        assert!(batch.needs_last_frame);
    }

    #[test]
    fn test_unknown_task_type_is_other() {
        let task: Task = serde_json::from_value(json!({
            "id": "t",
            "type": "audio",
            "status": "pending"
        }))
        .unwrap();
        assert_eq!(task.kind, TaskKind::Other);
        assert!(task.params.batch.is_none());
        assert!(task.result_url().is_none());
    }

    #[test]
    fn test_empty_result_url_is_absent() {
        let mut task: Task = serde_json::from_value(json!({
            "id": "t", "type": "video", "status": "completed"
        }))
        .unwrap();
        task.result = Some(TaskResult {
            url: Some(String::new()),
        });
        assert!(task.result_url().is_none());
    }

    #[test]
    fn test_request_without_seed_omits_field() {
        let request = GenerationRequest {
            prompt: "p".into(),
            seed_image: None,
            params: Map::new(),
            batch: BatchMetadata::for_segment("b", 2, vec![]),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("seedImage").is_none());
        assert_eq!(value["batch"]["segmentIndex"], json!(2));
    }

    #[test]
    fn test_needs_last_frame_follows_position() {
        let scripts: Vec<SegmentScript> = (1..=3)
            .map(|index| SegmentScript {
                index,
                total: 3,
                prompt: format!("part {}", index),
                params: Map::new(),
                batch_id: "b".into(),
            })
            .collect();
        assert!(BatchMetadata::for_segment("b", 2, scripts.clone()).needs_last_frame);
        let last = BatchMetadata::for_segment("b", 3, scripts);
        assert!(!last.needs_last_frame);
        assert!(last.is_in_range());
        assert!(!BatchMetadata::for_segment("b", 4, vec![]).is_in_range());
        assert!(!BatchMetadata::for_segment("b", 0, vec![]).is_in_range());
        assert_eq!(last.script(2).unwrap().prompt, "part 2");
    }
}
