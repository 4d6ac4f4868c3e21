//! Local adapters for monolith deployment.

pub mod document;
pub mod events;
pub mod fetch;
pub mod fs;
pub mod generation;
pub mod http;
pub mod media;

pub use document::FsDocument;
pub use events::hub::EventHub;
pub use fetch::HttpFetcher;
pub use generation::HttpGenerationQueue;
pub use media::FfmpegToolkit;
