//! quizforge-core — Completion scoring, quiz caching, grading and analytics.
//!
//! This crate defines the data model, the collaborator traits, and the four
//! engines the rest of quizforge builds on: the completion scorer, the quiz
//! cache coordinator, the grading orchestrator and the mastery aggregator.

pub mod analytics;
pub mod cache;
pub mod completion;
pub mod error;
pub mod grading;
pub mod memory;
pub mod model;
pub mod traits;
pub mod variant;

pub use error::{CoreError, ValidationError};
