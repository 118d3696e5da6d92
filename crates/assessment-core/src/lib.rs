//! ============================================================================
//! ASSESSMENT-CORE: Spiritual Gifts Result Pipeline
//! ============================================================================
//! Everything behind a finished assessment:
//! - Scoring answers into per-gift totals with dominant/secondary picks
//! - Local result store (redb) as the system of record
//! - Best-effort delivery to a spreadsheet hook and EmailJS
//! - Background retry of deliveries that did not land
//! ============================================================================

pub mod catalog;
pub mod channel;
pub mod config;
pub mod pipeline;
pub mod retry;
pub mod scorer;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use types::*;
pub use channel::{Channel, EmailChannel, EmailJsConfig, SheetChannel, SheetMode};
pub use config::AssessmentConfig;
pub use pipeline::{ChannelReport, Pipeline, Submission, SubmissionOrchestrator};
pub use retry::{InFlight, RetryManager, RetryPolicy, SweepOutcome};
pub use scorer::{parse_answers, score, AnswerSheet, Scoring};
pub use store::{ResultStore, StoreError, StoreSnapshot};
