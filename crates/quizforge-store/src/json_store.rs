//! Durable store keeping one JSON file per record.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use quizforge_core::model::{AttemptRecord, Chapter, ProgressRecord, QuizVariant};
use quizforge_core::traits::{DurableStore, RecordFilter};

use crate::fs;

const CHAPTERS: &str = "chapters";
const PROGRESS: &str = "progress";
const QUIZZES: &str = "quizzes";
const ATTEMPTS: &str = "attempts";

/// [`DurableStore`] over a directory tree:
///
/// ```text
/// <root>/chapters/<chapter>.json
/// <root>/progress/<user, chapter>.json
/// <root>/quizzes/<content hash>.json
/// <root>/attempts/<attempt id>.json
/// ```
///
/// Writes go through a temp file and a rename, so readers never observe a
/// partially written record.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, family: &str, key: &str) -> PathBuf {
        self.root.join(family).join(fs::file_name(key))
    }

    async fn load_all<T: DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for path in fs::list_files(&self.root.join(family)).await? {
            // Raced with a delete; nothing to return for it.
            if let Some(record) = fs::read_json(&path).await? {
                records.push(record);
            }
        }
        debug!(family, count = records.len(), "loaded records");
        Ok(records)
    }
}

/// Progress is keyed by the (user, chapter) pair.
fn progress_key(user_id: &str, chapter_id: &str) -> String {
    format!("{user_id}\u{1f}{chapter_id}")
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get_chapter(&self, id: &str) -> Result<Option<Chapter>> {
        fs::read_json(&self.record_path(CHAPTERS, id)).await
    }

    #[instrument(skip(self, chapter), fields(chapter_id = %chapter.id))]
    async fn put_chapter(&self, chapter: &Chapter) -> Result<()> {
        fs::write_json(self.record_path(CHAPTERS, &chapter.id), chapter, true).await
    }

    async fn query_chapters(&self) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self.load_all(CHAPTERS).await?;
        chapters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chapters)
    }

    async fn get_progress(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<ProgressRecord>> {
        fs::read_json(&self.record_path(PROGRESS, &progress_key(user_id, chapter_id))).await
    }

    async fn put_progress(&self, record: &ProgressRecord) -> Result<()> {
        let key = progress_key(&record.user_id, &record.chapter_id);
        fs::write_json(self.record_path(PROGRESS, &key), record, true).await
    }

    async fn query_progress(&self, filter: &RecordFilter) -> Result<Vec<ProgressRecord>> {
        let mut records: Vec<ProgressRecord> = self.load_all(PROGRESS).await?;
        records.retain(|r| filter.matches_progress(r));
        records.sort_by(|a, b| (&a.user_id, &a.chapter_id).cmp(&(&b.user_id, &b.chapter_id)));
        Ok(records)
    }

    async fn get_quiz(&self, content_hash: &str) -> Result<Option<QuizVariant>> {
        fs::read_json(&self.record_path(QUIZZES, content_hash)).await
    }

    #[instrument(skip(self, quiz), fields(content_hash = %quiz.content_hash))]
    async fn put_quiz(&self, quiz: &QuizVariant) -> Result<()> {
        fs::write_json(self.record_path(QUIZZES, &quiz.content_hash), quiz, true).await
    }

    async fn query_quizzes(&self, filter: &RecordFilter) -> Result<Vec<QuizVariant>> {
        let mut quizzes: Vec<QuizVariant> = self.load_all(QUIZZES).await?;
        quizzes.retain(|q| filter.matches_quiz(q));
        quizzes.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
        Ok(quizzes)
    }

    #[instrument(skip(self, attempt), fields(attempt_id = %attempt.id))]
    async fn put_attempt(&self, attempt: &AttemptRecord) -> Result<()> {
        let path = self.record_path(ATTEMPTS, &attempt.id.to_string());
        fs::write_json(path, attempt, false).await
    }

    async fn query_attempts(&self, filter: &RecordFilter) -> Result<Vec<AttemptRecord>> {
        let mut attempts: Vec<AttemptRecord> = self.load_all(ATTEMPTS).await?;
        attempts.retain(|a| filter.matches_attempt(a));
        attempts.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(attempts)
    }
}
