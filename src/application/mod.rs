//! Application layer - Generic services that use ports.

pub mod frames;
pub mod merge;
pub mod orchestrator;
pub mod segment_factory;
pub mod sink;
