//! Collaborator trait definitions.
//!
//! The core engines depend on four capabilities: a durable store, a volatile
//! cache tier, question generation and semantic grading. Implementations live
//! in `memory` (in-process), `quizforge-store` (files) and
//! `quizforge-providers` (LLM backends).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{
    AttemptRecord, Chapter, ChapterContext, Difficulty, ProgressRecord, QuestionSpec, QuizVariant,
};

// ---------------------------------------------------------------------------
// Storage traits
// ---------------------------------------------------------------------------

/// Durable storage for every record family.
///
/// Implementations must give read-your-writes consistency within a process.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get_chapter(&self, id: &str) -> anyhow::Result<Option<Chapter>>;

    async fn put_chapter(&self, chapter: &Chapter) -> anyhow::Result<()>;

    async fn query_chapters(&self) -> anyhow::Result<Vec<Chapter>>;

    async fn get_progress(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> anyhow::Result<Option<ProgressRecord>>;

    /// Overwrite the progress record for its (user, chapter) key.
    async fn put_progress(&self, record: &ProgressRecord) -> anyhow::Result<()>;

    async fn query_progress(&self, filter: &RecordFilter) -> anyhow::Result<Vec<ProgressRecord>>;

    async fn get_quiz(&self, content_hash: &str) -> anyhow::Result<Option<QuizVariant>>;

    async fn put_quiz(&self, quiz: &QuizVariant) -> anyhow::Result<()>;

    async fn query_quizzes(&self, filter: &RecordFilter) -> anyhow::Result<Vec<QuizVariant>>;

    /// Append an attempt. Attempts are never updated.
    async fn put_attempt(&self, attempt: &AttemptRecord) -> anyhow::Result<()>;

    async fn query_attempts(&self, filter: &RecordFilter) -> anyhow::Result<Vec<AttemptRecord>>;
}

/// Fast, expiring key/value tier in front of the durable store.
#[async_trait]
pub trait VolatileCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> anyhow::Result<usize>;
}

/// Equality filter for `query_*` calls. Unset fields match everything.
///
/// Attempt records carry no chapter id, so `chapter_id` is not applied to
/// attempts; query the chapter's quiz variants and filter by content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub user_id: Option<String>,
    pub chapter_id: Option<String>,
    pub quiz_content_hash: Option<String>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    pub fn for_chapter(chapter_id: &str) -> Self {
        Self {
            chapter_id: Some(chapter_id.to_string()),
            ..Self::default()
        }
    }

    pub fn for_quiz(content_hash: &str) -> Self {
        Self {
            quiz_content_hash: Some(content_hash.to_string()),
            ..Self::default()
        }
    }

    pub fn matches_progress(&self, record: &ProgressRecord) -> bool {
        field_matches(&self.user_id, &record.user_id)
            && field_matches(&self.chapter_id, &record.chapter_id)
    }

    pub fn matches_quiz(&self, quiz: &QuizVariant) -> bool {
        field_matches(&self.chapter_id, &quiz.chapter_id)
            && field_matches(&self.quiz_content_hash, &quiz.content_hash)
    }

    pub fn matches_attempt(&self, attempt: &AttemptRecord) -> bool {
        field_matches(&self.user_id, &attempt.user_id)
            && field_matches(&self.quiz_content_hash, &attempt.quiz_content_hash)
    }
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().map_or(true, |e| e == actual)
}

// ---------------------------------------------------------------------------
// AI capability traits
// ---------------------------------------------------------------------------

/// Expensive, fallible question generation.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate_questions(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<Vec<QuestionSpec>>;
}

/// Fallible semantic grading of free-text and out-of-tolerance answers.
#[async_trait]
pub trait SemanticGrader: Send + Sync {
    async fn grade_text(&self, request: &GradeTextRequest) -> anyhow::Result<TextGrade>;
}

/// How many questions of each kind to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionCounts {
    pub mcq: u32,
    pub short: u32,
    pub numerical: u32,
}

impl QuestionCounts {
    pub fn total(&self) -> u32 {
        self.mcq + self.short + self.numerical
    }
}

/// Request to generate the questions of one quiz variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub chapter: ChapterContext,
    pub difficulty: Difficulty,
    pub counts: QuestionCounts,
}

/// Request to grade one answer semantically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeTextRequest {
    /// The question text.
    pub prompt: String,
    /// Reference answer (text, or the reference value rendered as text).
    pub reference: String,
    /// What the learner submitted.
    pub submitted: String,
    /// "short" or "numerical".
    pub question_kind: String,
    pub topic: String,
    pub context: ChapterContext,
}

/// Result of semantic grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextGrade {
    /// Answer quality in [0, 1].
    pub quality: f64,
    /// Optional explanation from the grader.
    #[serde(default)]
    pub feedback: Option<String>,
}
