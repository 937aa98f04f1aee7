//! # Integration Tests
//!
//! Cross-crate scenarios: a real `EventBusClient` over the in-memory broker,
//! with handlers observing what the pollers deliver.

pub mod delivery;
pub mod lifecycle;
pub mod pipeline;
