//! Domain layer - Pure business logic.

// Media operations (require ffmpeg-next)
pub mod av;

pub mod batch;
pub mod progress;
pub mod tasks;
