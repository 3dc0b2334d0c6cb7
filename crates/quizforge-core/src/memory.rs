//! In-process implementations of the storage traits.
//!
//! `MemoryStore` is a complete durable-store stand-in for tests and
//! single-process embedding; `MemoryCache` is a TTL key/value tier. Both
//! return query results in a stable order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::model::{AttemptRecord, Chapter, ProgressRecord, QuizVariant};
use crate::traits::{DurableStore, RecordFilter, VolatileCache};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Tables {
    chapters: HashMap<String, Chapter>,
    progress: HashMap<(String, String), ProgressRecord>,
    quizzes: HashMap<String, QuizVariant>,
    attempts: Vec<AttemptRecord>,
}

/// HashMap-backed durable store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get_chapter(&self, id: &str) -> anyhow::Result<Option<Chapter>> {
        Ok(lock(&self.tables).chapters.get(id).cloned())
    }

    async fn put_chapter(&self, chapter: &Chapter) -> anyhow::Result<()> {
        lock(&self.tables)
            .chapters
            .insert(chapter.id.clone(), chapter.clone());
        Ok(())
    }

    async fn query_chapters(&self) -> anyhow::Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = lock(&self.tables).chapters.values().cloned().collect();
        chapters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chapters)
    }

    async fn get_progress(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> anyhow::Result<Option<ProgressRecord>> {
        let key = (user_id.to_string(), chapter_id.to_string());
        Ok(lock(&self.tables).progress.get(&key).cloned())
    }

    async fn put_progress(&self, record: &ProgressRecord) -> anyhow::Result<()> {
        let key = (record.user_id.clone(), record.chapter_id.clone());
        lock(&self.tables).progress.insert(key, record.clone());
        Ok(())
    }

    async fn query_progress(&self, filter: &RecordFilter) -> anyhow::Result<Vec<ProgressRecord>> {
        let mut records: Vec<ProgressRecord> = lock(&self.tables)
            .progress
            .values()
            .filter(|r| filter.matches_progress(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            (&a.user_id, &a.chapter_id).cmp(&(&b.user_id, &b.chapter_id))
        });
        Ok(records)
    }

    async fn get_quiz(&self, content_hash: &str) -> anyhow::Result<Option<QuizVariant>> {
        Ok(lock(&self.tables).quizzes.get(content_hash).cloned())
    }

    async fn put_quiz(&self, quiz: &QuizVariant) -> anyhow::Result<()> {
        lock(&self.tables)
            .quizzes
            .insert(quiz.content_hash.clone(), quiz.clone());
        Ok(())
    }

    async fn query_quizzes(&self, filter: &RecordFilter) -> anyhow::Result<Vec<QuizVariant>> {
        let mut quizzes: Vec<QuizVariant> = lock(&self.tables)
            .quizzes
            .values()
            .filter(|q| filter.matches_quiz(q))
            .cloned()
            .collect();
        quizzes.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        Ok(quizzes)
    }

    async fn put_attempt(&self, attempt: &AttemptRecord) -> anyhow::Result<()> {
        let mut tables = lock(&self.tables);
        anyhow::ensure!(
            tables.attempts.iter().all(|a| a.id != attempt.id),
            "attempt {} already recorded",
            attempt.id
        );
        tables.attempts.push(attempt.clone());
        Ok(())
    }

    async fn query_attempts(&self, filter: &RecordFilter) -> anyhow::Result<Vec<AttemptRecord>> {
        let mut attempts: Vec<AttemptRecord> = lock(&self.tables)
            .attempts
            .iter()
            .filter(|a| filter.matches_attempt(a))
            .cloned()
            .collect();
        attempts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(attempts)
    }
}

/// TTL key/value cache held in process memory.
///
/// Uses tokio's clock, so paused-time tests can expire entries.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `key` expires, if it is present.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        lock(&self.entries)
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(_, expires_at)| *expires_at - now)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.entries)
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VolatileCache for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        // expired
        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        lock(&self.entries).insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}
