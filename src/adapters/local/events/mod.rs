use crate::domain::tasks::Task;
use serde::{Deserialize, Serialize};

pub mod hub;
pub mod listener;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    /// A task changed state on the generation service.
    Updated(Task),
}
