//! Quiz variant identity.
//!
//! A variant is identified by a SHA-256 digest of its normalized request
//! parameters, so lookups happen before any generation call is made.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;
use crate::model::Difficulty;
use crate::traits::QuestionCounts;

/// Prefix of every quiz key in the volatile tier.
pub const CACHE_KEY_PREFIX: &str = "quiz:";

pub const MAX_MCQ: u32 = 10;
pub const MAX_SHORT: u32 = 10;
pub const MAX_NUMERICAL: u32 = 10;

/// Parameters of a quiz variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuizRequest {
    pub chapter_id: String,
    pub difficulty: Difficulty,
    pub counts: QuestionCounts,
}

impl QuizRequest {
    pub fn new(
        chapter_id: &str,
        difficulty: Difficulty,
        mcq: u32,
        short: u32,
        numerical: u32,
    ) -> Self {
        Self {
            chapter_id: chapter_id.trim().to_string(),
            difficulty,
            counts: QuestionCounts {
                mcq,
                short,
                numerical,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.chapter_id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier("chapter id"));
        }
        for (kind, count, max) in [
            ("mcq", self.counts.mcq, MAX_MCQ),
            ("short", self.counts.short, MAX_SHORT),
            ("numerical", self.counts.numerical, MAX_NUMERICAL),
        ] {
            if count > max {
                return Err(ValidationError::TooManyQuestions { kind, count, max });
            }
        }
        if self.counts.total() == 0 {
            return Err(ValidationError::NoQuestionsRequested);
        }
        Ok(())
    }

    /// Hex SHA-256 of `chapter|difficulty|mcq|short|numerical`.
    ///
    /// The chapter id is trimmed and the difficulty rendered in lowercase, so
    /// equivalent requests always hash identically.
    pub fn content_hash(&self) -> String {
        let normalized = format!(
            "{}|{}|{}|{}|{}",
            self.chapter_id.trim(),
            self.difficulty,
            self.counts.mcq,
            self.counts.short,
            self.counts.numerical
        );
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    /// Key of this variant in the volatile tier.
    pub fn cache_key(&self) -> String {
        cache_key(&self.content_hash())
    }
}

pub fn cache_key(content_hash: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{content_hash}")
}
