//! # Odds Event Bus Test Suite
//!
//! Unified test crate exercising the bus end to end against the in-memory
//! broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Configs, payload builders, recording handlers
//! └── integration/
//!     ├── delivery.rs   # At-least-once delivery, redelivery, unhandled topics
//!     ├── lifecycle.rs  # Close, unsubscribe, durable resume
//!     └── pipeline.rs   # Pipeline handler, factory views, runtime
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bus-tests
//! cargo test -p bus-tests integration::delivery::
//! ```

pub mod fixtures;
pub mod integration;
