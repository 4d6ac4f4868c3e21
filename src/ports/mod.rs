//! Ports - Trait definitions for every external collaborator.

pub mod control;
pub mod document;
pub mod media;
pub mod pipeline;
pub mod queue;
pub mod storage;
