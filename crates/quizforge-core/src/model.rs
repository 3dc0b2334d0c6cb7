//! Core data model types for quizforge.
//!
//! Chapters, progress records, quiz variants and attempt records are the
//! shared records through which the engines communicate. None of the engines
//! call each other directly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::completion::CompletionDescriptor;
use crate::error::ValidationError;

/// A unit of study that quizzes are generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Unique identifier for this chapter.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Subject area (e.g. "physics").
    #[serde(default)]
    pub subject: String,
    /// School class level, 1 through 12.
    pub class_level: u8,
    /// Topics covered by the chapter.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Reference to the indexed source document held by the AI capability.
    #[serde(default)]
    pub document_ref: String,
    /// Estimated page count, used as the expected reading length.
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
}

fn default_page_count() -> u32 {
    crate::completion::BASELINE_PAGES
}

impl Chapter {
    /// Check the invariants a chapter must hold before it is stored.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier("chapter id"));
        }
        if !(1..=12).contains(&self.class_level) {
            return Err(ValidationError::InvalidClassLevel(self.class_level));
        }
        Ok(())
    }

    /// Context handed to the AI capabilities for this chapter.
    pub fn context(&self) -> ChapterContext {
        ChapterContext {
            chapter_id: self.id.clone(),
            title: self.title.clone(),
            topics: self.topics.clone(),
            document_ref: self.document_ref.clone(),
        }
    }
}

/// The slice of a chapter the AI capabilities need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterContext {
    pub chapter_id: String,
    pub title: String,
    pub topics: Vec<String>,
    pub document_ref: String,
}

/// Per (user, chapter) engagement state. Last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub chapter_id: String,
    /// Cumulative reading time reported by the client, in seconds.
    pub time_spent_secs: u64,
    /// Furthest scroll position, 0 to 100.
    pub scroll_percent: f64,
    /// Number of text selections made while reading.
    pub selection_count: u64,
    /// Weighted composite of the three sub-scores, 0 to 1.
    pub composite_score: f64,
    /// Sticky: once true it stays true.
    pub is_completed: bool,
    /// Audit descriptor, stored as `multi_factor_v1|time:..|scroll:..|interact:..|composite:..`.
    pub method: CompletionDescriptor,
    pub updated_at: DateTime<Utc>,
}

/// Quiz difficulty levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(ValidationError::UnknownDifficulty(other.to_string())),
        }
    }
}

/// A single generated question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSpec {
    /// Question identifier, unique within its quiz variant.
    #[serde(rename = "q_id")]
    pub id: String,
    /// Topic the question exercises.
    pub topic: String,
    /// Points awarded for a fully correct answer. Always positive.
    pub points: f64,
    /// The question text shown to the learner.
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// The three question kinds and their answer keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Mcq {
        options: Vec<String>,
        correct_option_index: usize,
    },
    ShortAnswer {
        reference_answer: String,
    },
    Numerical {
        reference_value: f64,
    },
}

impl QuestionKind {
    /// Short label used in prompts and logs.
    pub fn label(&self) -> &'static str {
        match self {
            QuestionKind::Mcq { .. } => "mcq",
            QuestionKind::ShortAnswer { .. } => "short",
            QuestionKind::Numerical { .. } => "numerical",
        }
    }
}

/// An immutable, deduplicated quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizVariant {
    /// Digest of the request parameters that produced this variant.
    pub content_hash: String,
    pub chapter_id: String,
    pub difficulty: Difficulty,
    pub questions: Vec<QuestionSpec>,
    pub created_at: DateTime<Utc>,
}

impl QuizVariant {
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn total_points(&self) -> f64 {
        self.questions.iter().map(|q| q.points).sum()
    }

    pub fn question(&self, id: &str) -> Option<&QuestionSpec> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// A raw answer as submitted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    Number(f64),
    Text(String),
}

impl fmt::Display for SubmittedAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmittedAnswer::Number(n) => write!(f, "{n}"),
            SubmittedAnswer::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The graded outcome of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub score: f64,
    pub max_score: f64,
    pub feedback: String,
    pub is_correct: bool,
    pub topic: String,
}

impl QuestionOutcome {
    /// Score as a fraction of the question's points.
    pub fn ratio(&self) -> f64 {
        if self.max_score > 0.0 {
            self.score / self.max_score
        } else {
            0.0
        }
    }
}

/// An append-only graded submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub user_id: String,
    pub quiz_content_hash: String,
    pub answers: BTreeMap<String, SubmittedAnswer>,
    pub results: BTreeMap<String, QuestionOutcome>,
    pub total_score: f64,
    pub max_score: f64,
    pub weak_topics: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// Total score as a percentage of the maximum.
    pub fn percentage(&self) -> f64 {
        if self.max_score > 0.0 {
            100.0 * self.total_score / self.max_score
        } else {
            0.0
        }
    }
}
