//! HTTP inbound adapter.
//!
//! Clients start batches and inspect them here; the generation service
//! posts task updates to `/tasks/events`.

mod api;

pub use api::{router, AppState};
