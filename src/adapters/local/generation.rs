use crate::domain::tasks::GenerationRequest;
use crate::ports::queue::TaskQueuePort;
use async_trait::async_trait;
use serde::Deserialize;
use std::error::Error;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Submitted {
    id: String,
}

/// Submits segments to an external video generation service over HTTP.
#[derive(Clone)]
pub struct HttpGenerationQueue {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpGenerationQueue {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl TaskQueuePort for HttpGenerationQueue {
    async fn submit_task(
        &self,
        request: GenerationRequest,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut call = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("generation service returned {}: {}", status, body).into());
        }

        let submitted: Submitted = response.json().await?;
        debug!(
            task_id = %submitted.id,
            batch_id = %request.batch.batch_id,
            segment_index = request.batch.segment_index,
            "generation task accepted"
        );
        Ok(submitted.id)
    }
}
