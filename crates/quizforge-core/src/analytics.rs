//! On-demand mastery analytics.
//!
//! Every view is recomputed from progress and attempt records. Inputs are
//! sorted before folding and every ranking has a total tie-break, so the same
//! store snapshot always produces identical output.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::error::{CoreError, Result, ValidationError};
use crate::model::{AttemptRecord, ProgressRecord, QuizVariant};
use crate::traits::{DurableStore, RecordFilter};

/// Topics with mastery below this are reported as weak areas.
pub const WEAK_AREA_THRESHOLD: f64 = 0.70;
pub const DIFFICULT_QUESTION_LIMIT: usize = 5;
pub const COMMON_WEAK_TOPIC_LIMIT: usize = 5;
/// Question text longer than this is truncated in reports.
pub const QUESTION_TEXT_LIMIT: usize = 100;

const REMEDIATION_HINTS: [&str; 2] = ["Review fundamental concepts", "Practice similar problems"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicMastery {
    pub topic: String,
    /// Average score ratio, 0 to 1.
    pub mastery: f64,
    /// Number of graded (attempt, question) pairs.
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterProgressDetail {
    pub chapter_id: String,
    pub chapter_title: String,
    pub is_completed: bool,
    pub composite_score: f64,
    pub scroll_percent: f64,
    pub time_spent_secs: u64,
    pub quiz_attempts: usize,
    pub average_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPerformance {
    pub user_id: String,
    pub total_chapters: usize,
    pub completed_chapters: usize,
    pub total_quiz_attempts: usize,
    pub average_percentage: f64,
    /// Sorted by mastery, strongest first.
    pub topic_mastery: Vec<TopicMastery>,
    pub chapter_progress: Vec<ChapterProgressDetail>,
    /// Weakest first; ties go to the topic with more attempts.
    pub weak_areas: Vec<TopicMastery>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifficultQuestion {
    pub quiz_content_hash: String,
    pub question_id: String,
    pub question_text: String,
    pub topic: String,
    pub attempts: usize,
    pub average_ratio: f64,
    pub remediation_hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeakTopicCount {
    pub topic: String,
    /// Attempts that listed the topic as weak.
    pub count: usize,
    /// `count` as a percentage of all attempts on the chapter.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterAnalytics {
    pub chapter_id: String,
    pub chapter_title: String,
    pub total_attempts: usize,
    pub unique_users: usize,
    pub average_percentage: f64,
    /// Mean reading time of learners who completed the chapter.
    pub average_completion_secs: f64,
    /// Completed progress records over all progress records, 0 to 1.
    pub completion_rate: f64,
    pub difficult_questions: Vec<DifficultQuestion>,
    pub common_weak_topics: Vec<WeakTopicCount>,
}

/// Derives analytics views from the durable store. Holds no state of its own.
pub struct MasteryAggregator {
    store: Arc<dyn DurableStore>,
    difficult_limit: usize,
}

impl MasteryAggregator {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            difficult_limit: DIFFICULT_QUESTION_LIMIT,
        }
    }

    /// Override how many difficult questions a chapter report lists.
    pub fn with_difficult_limit(mut self, limit: usize) -> Self {
        self.difficult_limit = limit;
        self
    }

    #[instrument(skip(self))]
    pub async fn user_performance(&self, user_id: &str) -> Result<UserPerformance> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier("user id").into());
        }
        let filter = RecordFilter::for_user(user_id);
        let mut progress = self
            .store
            .query_progress(&filter)
            .await
            .map_err(CoreError::Store)?;
        progress.sort_by(|a, b| a.chapter_id.cmp(&b.chapter_id));
        let mut attempts = self
            .store
            .query_attempts(&filter)
            .await
            .map_err(CoreError::Store)?;
        sort_attempts(&mut attempts);
        let quizzes = self
            .store
            .query_quizzes(&RecordFilter::all())
            .await
            .map_err(CoreError::Store)?;
        let chapter_of: HashMap<&str, &str> = quizzes
            .iter()
            .map(|q| (q.content_hash.as_str(), q.chapter_id.as_str()))
            .collect();

        let total_chapters = progress.len();
        let completed_chapters = progress.iter().filter(|p| p.is_completed).count();
        let average_percentage = mean(attempts.iter().map(AttemptRecord::percentage));

        let topic_mastery = topic_mastery(&attempts);
        let mut weak_areas: Vec<TopicMastery> = topic_mastery
            .iter()
            .filter(|t| t.mastery < WEAK_AREA_THRESHOLD)
            .cloned()
            .collect();
        weak_areas.sort_by(|a, b| {
            cmp_f64(a.mastery, b.mastery)
                .then_with(|| b.attempts.cmp(&a.attempts))
                .then_with(|| a.topic.cmp(&b.topic))
        });

        let mut chapter_progress = Vec::with_capacity(progress.len());
        for record in &progress {
            chapter_progress.push(self.chapter_detail(record, &attempts, &chapter_of).await?);
        }

        let recommendations = recommendations(
            completed_chapters,
            total_chapters,
            (!attempts.is_empty()).then_some(average_percentage),
            &weak_areas,
        );

        tracing::info!(
            attempts = attempts.len(),
            topics = topic_mastery.len(),
            weak = weak_areas.len(),
            "user performance computed"
        );

        Ok(UserPerformance {
            user_id: user_id.to_string(),
            total_chapters,
            completed_chapters,
            total_quiz_attempts: attempts.len(),
            average_percentage,
            topic_mastery,
            chapter_progress,
            weak_areas,
            recommendations,
        })
    }

    #[instrument(skip(self))]
    pub async fn chapter_analytics(&self, chapter_id: &str) -> Result<ChapterAnalytics> {
        let chapter = self
            .store
            .get_chapter(chapter_id)
            .await
            .map_err(CoreError::Store)?
            .ok_or_else(|| ValidationError::UnknownChapter(chapter_id.to_string()))?;

        let progress = self
            .store
            .query_progress(&RecordFilter::for_chapter(chapter_id))
            .await
            .map_err(CoreError::Store)?;
        let mut quizzes = self
            .store
            .query_quizzes(&RecordFilter::for_chapter(chapter_id))
            .await
            .map_err(CoreError::Store)?;
        quizzes.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));

        let mut attempts = Vec::new();
        for quiz in &quizzes {
            attempts.extend(
                self.store
                    .query_attempts(&RecordFilter::for_quiz(&quiz.content_hash))
                    .await
                    .map_err(CoreError::Store)?,
            );
        }
        sort_attempts(&mut attempts);

        let unique_users = attempts
            .iter()
            .map(|a| a.user_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let mut completed: Vec<&ProgressRecord> =
            progress.iter().filter(|p| p.is_completed).collect();
        completed.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        let average_completion_secs = mean(completed.iter().map(|p| p.time_spent_secs as f64));
        let completion_rate = if progress.is_empty() {
            0.0
        } else {
            completed.len() as f64 / progress.len() as f64
        };

        let analytics = ChapterAnalytics {
            chapter_id: chapter.id.clone(),
            chapter_title: chapter.title.clone(),
            total_attempts: attempts.len(),
            unique_users,
            average_percentage: mean(attempts.iter().map(AttemptRecord::percentage)),
            average_completion_secs,
            completion_rate,
            difficult_questions: difficult_questions(&attempts, &quizzes, self.difficult_limit),
            common_weak_topics: common_weak_topics(&attempts),
        };
        tracing::info!(
            attempts = analytics.total_attempts,
            users = analytics.unique_users,
            "chapter analytics computed"
        );
        Ok(analytics)
    }

    async fn chapter_detail(
        &self,
        record: &ProgressRecord,
        attempts: &[AttemptRecord],
        chapter_of: &HashMap<&str, &str>,
    ) -> Result<ChapterProgressDetail> {
        let chapter_title = self
            .store
            .get_chapter(&record.chapter_id)
            .await
            .map_err(CoreError::Store)?
            .map(|c| c.title)
            .unwrap_or_default();
        let chapter_attempts: Vec<&AttemptRecord> = attempts
            .iter()
            .filter(|a| {
                chapter_of.get(a.quiz_content_hash.as_str()).copied()
                    == Some(record.chapter_id.as_str())
            })
            .collect();
        Ok(ChapterProgressDetail {
            chapter_id: record.chapter_id.clone(),
            chapter_title,
            is_completed: record.is_completed,
            composite_score: record.composite_score,
            scroll_percent: record.scroll_percent,
            time_spent_secs: record.time_spent_secs,
            quiz_attempts: chapter_attempts.len(),
            average_percentage: mean(chapter_attempts.iter().map(|a| a.percentage())),
        })
    }
}

fn sort_attempts(attempts: &mut [AttemptRecord]) {
    attempts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Average ratio per topic over every graded question of every attempt.
fn topic_mastery(attempts: &[AttemptRecord]) -> Vec<TopicMastery> {
    let mut by_topic: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for attempt in attempts {
        for result in attempt.results.values() {
            let entry = by_topic.entry(result.topic.as_str()).or_default();
            entry.0 += result.ratio();
            entry.1 += 1;
        }
    }
    let mut mastery: Vec<TopicMastery> = by_topic
        .into_iter()
        .map(|(topic, (sum, count))| TopicMastery {
            topic: topic.to_string(),
            mastery: sum / count as f64,
            attempts: count,
        })
        .collect();
    mastery.sort_by(|a, b| cmp_f64(b.mastery, a.mastery).then_with(|| a.topic.cmp(&b.topic)));
    mastery
}

fn recommendations(
    completed: usize,
    total: usize,
    average_percentage: Option<f64>,
    weak_areas: &[TopicMastery],
) -> Vec<String> {
    let mut out = Vec::new();
    if total > 0 && (completed as f64 / total as f64) < 0.5 {
        out.push("Focus on completing more chapters to build a stronger foundation".to_string());
    }
    if let Some(percentage) = average_percentage {
        out.push(
            if percentage < 60.0 {
                "Review fundamental concepts before attempting quizzes"
            } else if percentage < 80.0 {
                "Practice more numerical problems to improve accuracy"
            } else {
                "Excellent performance! Try harder difficulty levels"
            }
            .to_string(),
        );
    }
    if !weak_areas.is_empty() {
        let topics: Vec<&str> = weak_areas.iter().take(3).map(|t| t.topic.as_str()).collect();
        out.push(format!("Strengthen understanding in: {}", topics.join(", ")));
    }
    if out.is_empty() {
        out.push("Keep up the good work! Continue regular practice".to_string());
    }
    out
}

fn truncate_text(text: &str) -> String {
    if text.chars().count() > QUESTION_TEXT_LIMIT {
        let head: String = text.chars().take(QUESTION_TEXT_LIMIT).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Questions ranked hardest first. Question ids are only unique within a
/// variant, so each question is keyed by (content hash, question id).
fn difficult_questions(
    attempts: &[AttemptRecord],
    quizzes: &[QuizVariant],
    limit: usize,
) -> Vec<DifficultQuestion> {
    let mut stats: BTreeMap<(&str, &str), (f64, usize, &str)> = BTreeMap::new();
    for attempt in attempts {
        for (question_id, result) in &attempt.results {
            let entry = stats
                .entry((attempt.quiz_content_hash.as_str(), question_id.as_str()))
                .or_insert((0.0, 0, result.topic.as_str()));
            entry.0 += result.ratio();
            entry.1 += 1;
        }
    }

    let text_of = |hash: &str, id: &str| {
        quizzes
            .iter()
            .find(|q| q.content_hash == hash)
            .and_then(|q| q.question(id))
            .map(|q| truncate_text(&q.prompt))
            .unwrap_or_else(|| "Question details not available".to_string())
    };

    let mut ranked: Vec<DifficultQuestion> = stats
        .into_iter()
        .map(|((hash, id), (sum, count, topic))| DifficultQuestion {
            quiz_content_hash: hash.to_string(),
            question_id: id.to_string(),
            question_text: text_of(hash, id),
            topic: topic.to_string(),
            attempts: count,
            average_ratio: sum / count as f64,
            remediation_hints: REMEDIATION_HINTS.iter().map(|h| h.to_string()).collect(),
        })
        .collect();
    ranked.sort_by(|a, b| {
        cmp_f64(a.average_ratio, b.average_ratio)
            .then_with(|| b.attempts.cmp(&a.attempts))
            .then_with(|| a.quiz_content_hash.cmp(&b.quiz_content_hash))
            .then_with(|| a.question_id.cmp(&b.question_id))
    });
    ranked.truncate(limit);
    ranked
}

fn common_weak_topics(attempts: &[AttemptRecord]) -> Vec<WeakTopicCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for attempt in attempts {
        for topic in &attempt.weak_topics {
            *counts.entry(topic.as_str()).or_default() += 1;
        }
    }
    let total = attempts.len();
    let mut topics: Vec<WeakTopicCount> = counts
        .into_iter()
        .map(|(topic, count)| WeakTopicCount {
            topic: topic.to_string(),
            count,
            percentage: 100.0 * count as f64 / total as f64,
        })
        .collect();
    topics.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.topic.cmp(&b.topic)));
    topics.truncate(COMMON_WEAK_TOPIC_LIMIT);
    topics
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::completion::CompletionDescriptor;
    use crate::memory::MemoryStore;
    use crate::model::{Chapter, Difficulty, QuestionKind, QuestionOutcome, QuestionSpec};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap()
    }

    fn question(id: &str, topic: &str, prompt: &str) -> QuestionSpec {
        QuestionSpec {
            id: id.into(),
            topic: topic.into(),
            points: 1.0,
            prompt: prompt.into(),
            kind: QuestionKind::ShortAnswer {
                reference_answer: "ref".into(),
            },
        }
    }

    fn attempt(
        user: &str,
        hash: &str,
        minute: u32,
        scores: &[(&str, &str, f64)],
    ) -> AttemptRecord {
        let results: BTreeMap<String, QuestionOutcome> = scores
            .iter()
            .map(|(id, topic, score)| {
                (
                    id.to_string(),
                    QuestionOutcome {
                        score: *score,
                        max_score: 1.0,
                        feedback: String::new(),
                        is_correct: *score >= 0.6,
                        topic: topic.to_string(),
                    },
                )
            })
            .collect();
        let weak_topics = crate::grading::weak_topics(&results);
        AttemptRecord {
            id: Uuid::from_u128(minute as u128),
            user_id: user.into(),
            quiz_content_hash: hash.into(),
            answers: BTreeMap::new(),
            total_score: results.values().map(|r| r.score).sum(),
            max_score: results.len() as f64,
            results,
            weak_topics,
            created_at: at(minute),
        }
    }

    fn progress(user: &str, chapter: &str, time: u64, completed: bool) -> ProgressRecord {
        ProgressRecord {
            user_id: user.into(),
            chapter_id: chapter.into(),
            time_spent_secs: time,
            scroll_percent: if completed { 100.0 } else { 40.0 },
            selection_count: 0,
            composite_score: if completed { 0.9 } else { 0.3 },
            is_completed: completed,
            method: CompletionDescriptor::default(),
            updated_at: at(0),
        }
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (id, title) in [("ch1", "Motion"), ("ch2", "Light")] {
            store
                .put_chapter(&Chapter {
                    id: id.into(),
                    title: title.into(),
                    subject: "physics".into(),
                    class_level: 9,
                    topics: vec![],
                    document_ref: String::new(),
                    page_count: 10,
                    created_at: at(0),
                })
                .await
                .unwrap();
        }
        let long_prompt = "x".repeat(150);
        for (hash, chapter, difficulty) in [
            ("h-easy", "ch1", Difficulty::Easy),
            ("h-hard", "ch1", Difficulty::Hard),
            ("h-light", "ch2", Difficulty::Easy),
        ] {
            store
                .put_quiz(&QuizVariant {
                    content_hash: hash.into(),
                    chapter_id: chapter.into(),
                    difficulty,
                    questions: vec![
                        question("q1", "kinematics", "What is velocity?"),
                        question("q2", "forces", &long_prompt),
                    ],
                    created_at: at(0),
                })
                .await
                .unwrap();
        }
        store.put_progress(&progress("u1", "ch1", 900, true)).await.unwrap();
        store.put_progress(&progress("u1", "ch2", 100, false)).await.unwrap();
        store.put_progress(&progress("u2", "ch1", 600, true)).await.unwrap();
        store.put_progress(&progress("u3", "ch1", 50, false)).await.unwrap();

        let history = [
            ("u1", "h-easy", 1, [("q1", "kinematics", 1.0), ("q2", "forces", 0.5)]),
            ("u1", "h-hard", 2, [("q1", "kinematics", 0.5), ("q2", "forces", 0.0)]),
            ("u2", "h-easy", 3, [("q1", "kinematics", 1.0), ("q2", "forces", 1.0)]),
            ("u1", "h-light", 4, [("q1", "optics", 0.0), ("q2", "optics", 1.0)]),
        ];
        for (user, hash, minute, ratios) in history {
            store
                .put_attempt(&attempt(user, hash, minute, &ratios))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn user_performance_aggregates_history() {
        let aggregator = MasteryAggregator::new(seeded().await);
        let perf = aggregator.user_performance("u1").await.unwrap();

        assert_eq!(perf.total_chapters, 2);
        assert_eq!(perf.completed_chapters, 1);
        assert_eq!(perf.total_quiz_attempts, 3);
        // 75%, 25%, 50%
        assert!((perf.average_percentage - 50.0).abs() < 1e-9);

        let mastery: Vec<(&str, f64, usize)> = perf
            .topic_mastery
            .iter()
            .map(|t| (t.topic.as_str(), t.mastery, t.attempts))
            .collect();
        assert_eq!(
            mastery,
            vec![("kinematics", 0.75, 2), ("optics", 0.5, 2), ("forces", 0.25, 2)]
        );

        let weak: Vec<&str> = perf.weak_areas.iter().map(|t| t.topic.as_str()).collect();
        assert_eq!(weak, vec!["forces", "optics"]);

        let ch1 = &perf.chapter_progress[0];
        assert_eq!(ch1.chapter_id, "ch1");
        assert_eq!(ch1.chapter_title, "Motion");
        assert_eq!(ch1.quiz_attempts, 2);
        assert!((ch1.average_percentage - 50.0).abs() < 1e-9);
        assert_eq!(perf.chapter_progress[1].quiz_attempts, 1);

        assert_eq!(
            perf.recommendations,
            vec![
                "Review fundamental concepts before attempting quizzes".to_string(),
                "Strengthen understanding in: forces, optics".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn weak_area_ties_prefer_more_attempts() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_attempt(&attempt(
                "u1",
                "h",
                1,
                &[("q1", "a", 0.5), ("q2", "b", 0.5), ("q3", "b", 0.5)],
            ))
            .await
            .unwrap();
        let perf = MasteryAggregator::new(store).user_performance("u1").await.unwrap();
        let weak: Vec<&str> = perf.weak_areas.iter().map(|t| t.topic.as_str()).collect();
        assert_eq!(weak, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn new_user_gets_the_default_recommendation() {
        let perf = MasteryAggregator::new(seeded().await)
            .user_performance("nobody")
            .await
            .unwrap();
        assert_eq!(perf.total_quiz_attempts, 0);
        assert_eq!(perf.average_percentage, 0.0);
        assert_eq!(
            perf.recommendations,
            vec!["Keep up the good work! Continue regular practice".to_string()]
        );
    }

    #[tokio::test]
    async fn chapter_analytics_spans_all_variants() {
        let aggregator = MasteryAggregator::new(seeded().await);
        let report = aggregator.chapter_analytics("ch1").await.unwrap();

        assert_eq!(report.chapter_title, "Motion");
        assert_eq!(report.total_attempts, 3);
        assert_eq!(report.unique_users, 2);
        // 75%, 25%, 100%
        assert!((report.average_percentage - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.average_completion_secs, 750.0);
        assert!((report.completion_rate - 2.0 / 3.0).abs() < 1e-9);

        let hardest = &report.difficult_questions[0];
        assert_eq!(
            (hardest.quiz_content_hash.as_str(), hardest.question_id.as_str()),
            ("h-hard", "q2")
        );
        assert_eq!(hardest.average_ratio, 0.0);
        assert_eq!(hardest.question_text.chars().count(), QUESTION_TEXT_LIMIT + 3);
        assert!(hardest.question_text.ends_with("..."));
        assert_eq!(hardest.remediation_hints.len(), 2);
        assert_eq!(report.difficult_questions.len(), 4);

        let weak: Vec<(&str, usize)> = report
            .common_weak_topics
            .iter()
            .map(|t| (t.topic.as_str(), t.count))
            .collect();
        assert_eq!(weak, vec![("forces", 2), ("kinematics", 1)]);
        assert!((report.common_weak_topics[0].percentage - 200.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn difficult_question_limit_is_configurable() {
        let report = MasteryAggregator::new(seeded().await)
            .with_difficult_limit(1)
            .chapter_analytics("ch1")
            .await
            .unwrap();
        assert_eq!(report.difficult_questions.len(), 1);
    }

    #[tokio::test]
    async fn unknown_chapter_is_a_validation_error() {
        let err = MasteryAggregator::new(seeded().await)
            .chapter_analytics("ch-missing")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn identical_snapshots_give_identical_output() {
        let store = seeded().await;
        let a = MasteryAggregator::new(store.clone());
        let b = MasteryAggregator::new(store);
        assert_eq!(
            a.user_performance("u1").await.unwrap(),
            b.user_performance("u1").await.unwrap()
        );
        let first = serde_json::to_string(&a.chapter_analytics("ch1").await.unwrap()).unwrap();
        let second = serde_json::to_string(&b.chapter_analytics("ch1").await.unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn text_is_truncated_on_char_boundaries() {
        let text = "é".repeat(120);
        let truncated = truncate_text(&text);
        assert_eq!(truncated.chars().count(), 103);
        assert_eq!(truncate_text("short"), "short");
    }
}
