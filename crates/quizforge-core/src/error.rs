//! Core error types.
//!
//! Validation failures are rejected before any external call is attempted.
//! Infrastructure failures come from the question generation capability and
//! fail a whole `get_or_create_quiz` call. Degraded semantic grading is not an
//! error at all: it is absorbed per question by the grading orchestrator.

use thiserror::Error;

/// Reasons a request is rejected up front.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The referenced chapter does not exist.
    #[error("chapter not found: {0}")]
    UnknownChapter(String),

    /// The referenced quiz variant does not exist.
    #[error("quiz not found: {0}")]
    UnknownQuiz(String),

    /// The quiz variant has no questions to grade.
    #[error("quiz {0} has no questions")]
    EmptyQuestionSet(String),

    /// A quiz request asked for zero questions in total.
    #[error("quiz request must ask for at least one question")]
    NoQuestionsRequested,

    /// A per-kind question count is above the allowed maximum.
    #[error("{kind} count {count} exceeds the maximum of {max}")]
    TooManyQuestions {
        kind: &'static str,
        count: u32,
        max: u32,
    },

    /// Difficulty string is not one of easy, medium, hard.
    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),

    /// A submission contained an answer for a question the quiz does not have.
    #[error("answer submitted for unknown question: {0}")]
    UnknownQuestion(String),

    /// Chapter class level outside 1..=12.
    #[error("class level must be between 1 and 12, got {0}")]
    InvalidClassLevel(u8),

    /// Empty identifier supplied.
    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),
}

/// Errors surfaced by the core engines.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The request was rejected without any external call.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Question generation failed or timed out. Every waiter of the same
    /// variant receives the same message.
    #[error("quiz generation failed: {0}")]
    Infrastructure(String),

    /// The durable store failed.
    #[error("storage failure: {0:#}")]
    Store(anyhow::Error),

    /// The volatile tier failed on an operation that cannot fall back to
    /// the durable store (invalidation).
    #[error("cache failure: {0:#}")]
    Cache(anyhow::Error),
}

impl CoreError {
    /// Returns `true` if the caller sent a request that can never succeed as-is.
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
