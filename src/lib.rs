// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod store;
pub mod ledger;
pub mod retry;
pub mod gate;
pub mod summary;
pub mod llm;
pub mod summarizer;

// Outer pipeline stages (fetch, render, push, schedule)
pub mod fetch;
pub mod render;
pub mod push;
pub mod scheduler;
pub mod pipeline;
pub mod doctor;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::gate::{Gate, GatePermit};
pub use crate::ledger::{RunLedger, RunStatus};
pub use crate::store::{Paper, Store, StoreError};
pub use crate::summarizer::{RunOutcome, Summarizer};
pub use crate::summary::StructuredSummary;
