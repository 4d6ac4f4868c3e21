use crate::domain::tasks::GenerationRequest;
use async_trait::async_trait;
use std::error::Error;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueuePort: Send + Sync {
    /// Submit a generation task; returns the id the queue assigned to it.
    async fn submit_task(
        &self,
        request: GenerationRequest,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;
}
