//! Reelchain - Long video generation by chaining short segments
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (tasks, batch state, merge progress, av)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations
//! - application/: Generic services
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports for convenience
pub use adapters::local::events;
pub use application::orchestrator::ChainOrchestrator;
pub use config::ChainConfig;
pub use domain::av;
