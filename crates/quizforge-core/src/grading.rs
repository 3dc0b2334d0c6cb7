//! Hybrid grading of quiz submissions.
//!
//! MCQ and in-tolerance numerical answers are graded locally. Short answers
//! and out-of-tolerance numerical answers go to the semantic grader, bounded
//! by a timeout and a concurrency limit. A failed grader call degrades only
//! its own question to half credit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CoreError, Result, ValidationError};
use crate::model::{
    AttemptRecord, ChapterContext, QuestionKind, QuestionOutcome, QuestionSpec, QuizVariant,
    SubmittedAnswer,
};
use crate::traits::{DurableStore, GradeTextRequest, SemanticGrader, TextGrade};

/// Relative tolerance for exact numerical matches.
pub const NUMERICAL_TOLERANCE: f64 = 0.02;
/// Minimum semantic quality counted as correct.
pub const CORRECT_QUALITY: f64 = 0.6;
/// Topics averaging below this ratio are weak.
pub const WEAK_TOPIC_THRESHOLD: f64 = 0.6;
/// Share of points awarded when semantic grading is unavailable.
pub const DEGRADED_CREDIT: f64 = 0.5;

const NO_ANSWER: &str = "No answer provided";

/// Configuration for the grading orchestrator.
#[derive(Debug, Clone)]
pub struct GradingConfig {
    /// Upper bound on one semantic grading call.
    pub grading_timeout: Duration,
    /// Maximum concurrent semantic grading calls per submission.
    pub parallelism: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            grading_timeout: Duration::from_secs(30),
            parallelism: 4,
        }
    }
}

/// A stored attempt plus the values shown to the learner.
#[derive(Debug, Clone, Serialize)]
pub struct GradingReport {
    pub attempt: AttemptRecord,
    pub percentage: f64,
    pub feedback: String,
}

/// How one question will be graded.
enum Plan {
    Graded(QuestionOutcome),
    Semantic {
        points: f64,
        topic: String,
        request: GradeTextRequest,
    },
}

pub struct GradingOrchestrator {
    store: Arc<dyn DurableStore>,
    grader: Arc<dyn SemanticGrader>,
    config: GradingConfig,
}

impl GradingOrchestrator {
    pub fn new(
        store: Arc<dyn DurableStore>,
        grader: Arc<dyn SemanticGrader>,
        config: GradingConfig,
    ) -> Self {
        Self {
            store,
            grader,
            config,
        }
    }

    /// Grade every question of `quiz`, persist the attempt and return it.
    #[instrument(
        skip(self, quiz, answers),
        fields(quiz = %quiz.content_hash, answers = answers.len())
    )]
    pub async fn grade_submission(
        &self,
        quiz: &QuizVariant,
        user_id: &str,
        answers: BTreeMap<String, SubmittedAnswer>,
    ) -> Result<GradingReport> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier("user id").into());
        }
        if quiz.questions.is_empty() {
            return Err(ValidationError::EmptyQuestionSet(quiz.content_hash.clone()).into());
        }
        if let Some(unknown) = answers.keys().find(|id| quiz.question(id).is_none()) {
            return Err(ValidationError::UnknownQuestion(unknown.clone()).into());
        }

        let context = self.chapter_context(&quiz.chapter_id).await?;

        let mut results = BTreeMap::new();
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut pending = FuturesUnordered::new();

        for question in &quiz.questions {
            match plan(question, answers.get(&question.id), &context) {
                Plan::Graded(outcome) => {
                    results.insert(question.id.clone(), outcome);
                }
                Plan::Semantic {
                    points,
                    topic,
                    request,
                } => {
                    let id = question.id.clone();
                    let grader = Arc::clone(&self.grader);
                    let semaphore = Arc::clone(&semaphore);
                    let timeout = self.config.grading_timeout;
                    pending.push(async move {
                        let outcome = match semaphore.acquire_owned().await {
                            Ok(_permit) => {
                                match tokio::time::timeout(timeout, grader.grade_text(&request))
                                    .await
                                {
                                    Ok(Ok(grade)) => semantic_outcome(points, topic, &grade),
                                    Ok(Err(e)) => {
                                        tracing::warn!(
                                            question = %id,
                                            "semantic grading failed: {e:#}"
                                        );
                                        degraded_outcome(points, topic)
                                    }
                                    Err(_) => {
                                        tracing::warn!(
                                            question = %id,
                                            "semantic grading timed out after {}s",
                                            timeout.as_secs_f64()
                                        );
                                        degraded_outcome(points, topic)
                                    }
                                }
                            }
                            Err(_) => degraded_outcome(points, topic),
                        };
                        (id, outcome)
                    });
                }
            }
        }

        let semantic_calls = pending.len();
        while let Some((id, outcome)) = pending.next().await {
            results.insert(id, outcome);
        }

        let total_score: f64 = results.values().map(|r| r.score).sum();
        let max_score = quiz.total_points();
        let weak_topics = weak_topics(&results);
        let attempt = AttemptRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            quiz_content_hash: quiz.content_hash.clone(),
            answers,
            results,
            total_score,
            max_score,
            weak_topics,
            created_at: Utc::now(),
        };
        let percentage = attempt.percentage();
        let feedback = overall_feedback(percentage, &attempt.weak_topics, &attempt.results);

        self.store
            .put_attempt(&attempt)
            .await
            .map_err(CoreError::Store)?;

        tracing::info!(
            attempt = %attempt.id,
            semantic_calls,
            "graded {:.2}/{:.2} ({percentage:.1}%)",
            total_score,
            max_score
        );

        Ok(GradingReport {
            attempt,
            percentage,
            feedback,
        })
    }

    async fn chapter_context(&self, chapter_id: &str) -> Result<ChapterContext> {
        let chapter = self
            .store
            .get_chapter(chapter_id)
            .await
            .map_err(CoreError::Store)?;
        Ok(match chapter {
            Some(chapter) => chapter.context(),
            None => {
                tracing::warn!(chapter = %chapter_id, "grading without chapter context");
                ChapterContext {
                    chapter_id: chapter_id.to_string(),
                    title: String::new(),
                    topics: Vec::new(),
                    document_ref: String::new(),
                }
            }
        })
    }
}

fn plan(
    question: &QuestionSpec,
    answer: Option<&SubmittedAnswer>,
    context: &ChapterContext,
) -> Plan {
    let points = question.points;
    let topic = question.topic.clone();

    let answer = match answer {
        Some(SubmittedAnswer::Text(s)) if s.trim().is_empty() => None,
        other => other,
    };
    let Some(answer) = answer else {
        return Plan::Graded(outcome(0.0, points, NO_ANSWER.to_string(), false, topic));
    };

    match &question.kind {
        QuestionKind::Mcq {
            correct_option_index,
            ..
        } => {
            if parse_option(answer) == Some(*correct_option_index) {
                Plan::Graded(outcome(points, points, "Correct!".to_string(), true, topic))
            } else {
                let feedback = format!("Incorrect, expected option {correct_option_index}");
                Plan::Graded(outcome(0.0, points, feedback, false, topic))
            }
        }
        QuestionKind::Numerical { reference_value } => {
            let Some(value) = parse_number(answer) else {
                return Plan::Graded(outcome(
                    0.0,
                    points,
                    format!("Invalid numerical format. Expected: {reference_value}"),
                    false,
                    topic,
                ));
            };
            if within_tolerance(value, *reference_value) {
                return Plan::Graded(outcome(
                    points,
                    points,
                    format!("Correct! (Answer: {reference_value})"),
                    true,
                    topic,
                ));
            }
            Plan::Semantic {
                points,
                request: GradeTextRequest {
                    prompt: question.prompt.clone(),
                    reference: reference_value.to_string(),
                    submitted: answer.to_string(),
                    question_kind: question.kind.label().to_string(),
                    topic: topic.clone(),
                    context: context.clone(),
                },
                topic,
            }
        }
        QuestionKind::ShortAnswer { reference_answer } => Plan::Semantic {
            points,
            request: GradeTextRequest {
                prompt: question.prompt.clone(),
                reference: reference_answer.clone(),
                submitted: answer.to_string(),
                question_kind: question.kind.label().to_string(),
                topic: topic.clone(),
                context: context.clone(),
            },
            topic,
        },
    }
}

fn outcome(
    score: f64,
    max_score: f64,
    feedback: String,
    is_correct: bool,
    topic: String,
) -> QuestionOutcome {
    QuestionOutcome {
        score,
        max_score,
        feedback,
        is_correct,
        topic,
    }
}

/// MCQ answers are an index (number or numeric string) or a letter.
fn parse_option(answer: &SubmittedAnswer) -> Option<usize> {
    match answer {
        SubmittedAnswer::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => {
            Some(*n as usize)
        }
        SubmittedAnswer::Number(_) => None,
        SubmittedAnswer::Text(s) => {
            let s = s.trim();
            if let Ok(index) = s.parse::<usize>() {
                return Some(index);
            }
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => {
                    Some((c.to_ascii_uppercase() as u8 - b'A') as usize)
                }
                _ => None,
            }
        }
    }
}

fn parse_number(answer: &SubmittedAnswer) -> Option<f64> {
    let value = match answer {
        SubmittedAnswer::Number(n) => *n,
        SubmittedAnswer::Text(s) => s.trim().parse::<f64>().ok()?,
    };
    value.is_finite().then_some(value)
}

fn within_tolerance(value: f64, reference: f64) -> bool {
    (value - reference).abs() <= NUMERICAL_TOLERANCE * reference.abs()
}

fn semantic_outcome(points: f64, topic: String, grade: &TextGrade) -> QuestionOutcome {
    let quality = if grade.quality.is_nan() {
        0.0
    } else {
        grade.quality.clamp(0.0, 1.0)
    };
    let feedback = match &grade.feedback {
        Some(text) if !text.trim().is_empty() => text.clone(),
        _ if quality >= 0.7 => "Good answer covering key points".to_string(),
        _ if quality >= 0.4 => "Partial answer, missing some key concepts".to_string(),
        _ => "Answer missing most key concepts".to_string(),
    };
    outcome(quality * points, points, feedback, quality >= CORRECT_QUALITY, topic)
}

fn degraded_outcome(points: f64, topic: String) -> QuestionOutcome {
    outcome(
        DEGRADED_CREDIT * points,
        points,
        "Automatic grading was unavailable; half credit awarded pending review".to_string(),
        false,
        topic,
    )
}

/// Topics whose average score ratio is below the weak threshold.
pub fn weak_topics(results: &BTreeMap<String, QuestionOutcome>) -> BTreeSet<String> {
    let mut by_topic: BTreeMap<&str, (f64, u32)> = BTreeMap::new();
    for result in results.values() {
        let entry = by_topic.entry(result.topic.as_str()).or_default();
        entry.0 += result.ratio();
        entry.1 += 1;
    }
    by_topic
        .into_iter()
        .filter(|(_, (sum, count))| sum / f64::from(*count) < WEAK_TOPIC_THRESHOLD)
        .map(|(topic, _)| topic.to_string())
        .collect()
}

/// Templated summary of an attempt.
pub fn overall_feedback(
    percentage: f64,
    weak_topics: &BTreeSet<String>,
    results: &BTreeMap<String, QuestionOutcome>,
) -> String {
    let mut parts = vec![if percentage >= 90.0 {
        "Excellent work! Strong understanding across all topics."
    } else if percentage >= 75.0 {
        "Good performance! You have a solid grasp of the material."
    } else if percentage >= 60.0 {
        "Fair performance. Review the weak areas for improvement."
    } else {
        "Needs improvement. Focus on understanding core concepts."
    }
    .to_string()];

    if !weak_topics.is_empty() {
        let topics: Vec<&str> = weak_topics.iter().map(String::as_str).collect();
        parts.push(format!("Focus on: {}.", topics.join(", ")));
    }

    let review: BTreeSet<&str> = results
        .values()
        .filter(|r| !r.is_correct)
        .map(|r| r.topic.as_str())
        .collect();
    if !review.is_empty() {
        let topics: Vec<&str> = review.into_iter().collect();
        parts.push(format!("Review topics: {}.", topics.join(", ")));
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::Difficulty;
    use crate::traits::RecordFilter;

    enum Behavior {
        Quality(f64),
        Fail,
        Hang,
    }

    struct FakeGrader {
        calls: AtomicU32,
        behavior: Behavior,
    }

    impl FakeGrader {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                behavior,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SemanticGrader for FakeGrader {
        async fn grade_text(&self, _request: &GradeTextRequest) -> anyhow::Result<TextGrade> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Quality(quality) => Ok(TextGrade {
                    quality,
                    feedback: None,
                }),
                Behavior::Fail => anyhow::bail!("grader unavailable"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    anyhow::bail!("unreachable")
                }
            }
        }
    }

    fn mcq(id: &str, topic: &str, correct: usize) -> QuestionSpec {
        QuestionSpec {
            id: id.into(),
            topic: topic.into(),
            points: 1.0,
            prompt: "Pick one".into(),
            kind: QuestionKind::Mcq {
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_option_index: correct,
            },
        }
    }

    fn numerical(id: &str, topic: &str, reference_value: f64) -> QuestionSpec {
        QuestionSpec {
            id: id.into(),
            topic: topic.into(),
            points: 2.0,
            prompt: "Compute".into(),
            kind: QuestionKind::Numerical { reference_value },
        }
    }

    fn short(id: &str, topic: &str) -> QuestionSpec {
        QuestionSpec {
            id: id.into(),
            topic: topic.into(),
            points: 2.0,
            prompt: "Explain".into(),
            kind: QuestionKind::ShortAnswer {
                reference_answer: "because".into(),
            },
        }
    }

    fn quiz(questions: Vec<QuestionSpec>) -> QuizVariant {
        QuizVariant {
            content_hash: "hash-1".into(),
            chapter_id: "ch1".into(),
            difficulty: Difficulty::Medium,
            questions,
            created_at: Utc::now(),
        }
    }

    fn answers(pairs: &[(&str, SubmittedAnswer)]) -> BTreeMap<String, SubmittedAnswer> {
        pairs
            .iter()
            .map(|(id, answer)| (id.to_string(), answer.clone()))
            .collect()
    }

    fn text(s: &str) -> SubmittedAnswer {
        SubmittedAnswer::Text(s.into())
    }

    fn orchestrator(grader: Arc<FakeGrader>) -> (Arc<MemoryStore>, GradingOrchestrator) {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = GradingOrchestrator::new(
            store.clone(),
            grader,
            GradingConfig {
                grading_timeout: Duration::from_secs(5),
                parallelism: 2,
            },
        );
        (store, orchestrator)
    }

    #[tokio::test]
    async fn correct_mcq_scores_full_points_without_calls() {
        let grader = FakeGrader::new(Behavior::Fail);
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![mcq("q1", "kinematics", 0)]),
                "u1",
                answers(&[("q1", SubmittedAnswer::Number(0.0))]),
            )
            .await
            .unwrap();

        let result = &report.attempt.results["q1"];
        assert_eq!(result.score, 1.0);
        assert!(result.is_correct);
        assert_eq!(result.feedback, "Correct!");
        assert_eq!(grader.calls(), 0);
        assert_eq!(report.percentage, 100.0);
    }

    #[tokio::test]
    async fn numerical_within_tolerance_scores_full_points_without_calls() {
        let grader = FakeGrader::new(Behavior::Fail);
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![numerical("q1", "forces", 5.0)]),
                "u1",
                answers(&[("q1", text("5.05"))]),
            )
            .await
            .unwrap();

        let result = &report.attempt.results["q1"];
        assert_eq!(result.score, 2.0);
        assert!(result.is_correct);
        assert_eq!(grader.calls(), 0);
    }

    #[tokio::test]
    async fn mcq_accepts_letters_and_numeric_strings() {
        let grader = FakeGrader::new(Behavior::Fail);
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![mcq("q1", "t", 2), mcq("q2", "t", 1), mcq("q3", "t", 3)]),
                "u1",
                answers(&[("q1", text("c")), ("q2", text(" 1 ")), ("q3", text("A"))]),
            )
            .await
            .unwrap();

        assert!(report.attempt.results["q1"].is_correct);
        assert!(report.attempt.results["q2"].is_correct);
        let wrong = &report.attempt.results["q3"];
        assert!(!wrong.is_correct);
        assert_eq!(wrong.feedback, "Incorrect, expected option 3");
        assert_eq!(grader.calls(), 0);
    }

    #[tokio::test]
    async fn short_answers_use_semantic_quality() {
        let grader = FakeGrader::new(Behavior::Quality(0.8));
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![short("q1", "energy")]),
                "u1",
                answers(&[("q1", text("because of energy"))]),
            )
            .await
            .unwrap();

        let result = &report.attempt.results["q1"];
        assert!((result.score - 1.6).abs() < 1e-9);
        assert!(result.is_correct);
        assert_eq!(grader.calls(), 1);
    }

    #[tokio::test]
    async fn numerical_outside_tolerance_falls_back_to_grader() {
        let grader = FakeGrader::new(Behavior::Quality(0.5));
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![numerical("q1", "forces", 5.0)]),
                "u1",
                answers(&[("q1", SubmittedAnswer::Number(7.0))]),
            )
            .await
            .unwrap();

        let result = &report.attempt.results["q1"];
        assert_eq!(result.score, 1.0);
        assert!(!result.is_correct);
        assert_eq!(grader.calls(), 1);
    }

    #[tokio::test]
    async fn unparsable_numerical_answer_scores_zero_without_calls() {
        let grader = FakeGrader::new(Behavior::Quality(1.0));
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![numerical("q1", "forces", 5.0)]),
                "u1",
                answers(&[("q1", text("five-ish"))]),
            )
            .await
            .unwrap();

        let result = &report.attempt.results["q1"];
        assert_eq!(result.score, 0.0);
        assert!(!result.is_correct);
        assert!(result.feedback.starts_with("Invalid numerical format"));
        assert_eq!(grader.calls(), 0);
    }

    #[tokio::test]
    async fn blank_and_missing_answers_score_zero_without_calls() {
        let grader = FakeGrader::new(Behavior::Quality(1.0));
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![short("q1", "energy"), numerical("q2", "forces", 1.0)]),
                "u1",
                answers(&[("q1", text("   "))]),
            )
            .await
            .unwrap();

        for id in ["q1", "q2"] {
            assert_eq!(report.attempt.results[id].score, 0.0);
            assert_eq!(report.attempt.results[id].feedback, NO_ANSWER);
        }
        assert_eq!(grader.calls(), 0);
        assert_eq!(report.attempt.results.len(), 2);
    }

    #[tokio::test]
    async fn grader_failure_degrades_only_that_question() {
        let grader = FakeGrader::new(Behavior::Fail);
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![mcq("q1", "kinematics", 1), short("q2", "energy")]),
                "u1",
                answers(&[("q1", SubmittedAnswer::Number(1.0)), ("q2", text("heat"))]),
            )
            .await
            .unwrap();

        assert_eq!(report.attempt.results["q1"].score, 1.0);
        let degraded = &report.attempt.results["q2"];
        assert_eq!(degraded.score, 1.0);
        assert!(!degraded.is_correct);
        assert!(degraded.feedback.contains("unavailable"));
        assert_eq!(report.attempt.total_score, 2.0);
        assert_eq!(report.attempt.max_score, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn grader_timeout_degrades_the_question() {
        let grader = FakeGrader::new(Behavior::Hang);
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![short("q1", "energy"), short("q2", "energy"), short("q3", "waves")]),
                "u1",
                answers(&[("q1", text("a")), ("q2", text("b")), ("q3", text("c"))]),
            )
            .await
            .unwrap();

        assert_eq!(grader.calls(), 3);
        assert!(report.attempt.results.values().all(|r| r.score == 1.0));
        assert_eq!(report.percentage, 50.0);
    }

    #[tokio::test]
    async fn weak_topics_are_exactly_those_below_threshold() {
        let grader = FakeGrader::new(Behavior::Fail);
        let (_, orchestrator) = orchestrator(grader.clone());
        let report = orchestrator
            .grade_submission(
                &quiz(vec![
                    mcq("q1", "optics", 0),
                    mcq("q2", "optics", 0),
                    mcq("q3", "waves", 0),
                    mcq("q4", "waves", 0),
                    mcq("q5", "heat", 0),
                ]),
                "u1",
                answers(&[
                    ("q1", SubmittedAnswer::Number(0.0)),
                    ("q2", SubmittedAnswer::Number(1.0)),
                    ("q3", SubmittedAnswer::Number(0.0)),
                    ("q4", SubmittedAnswer::Number(0.0)),
                ]),
            )
            .await
            .unwrap();

        let expected: BTreeSet<String> = ["heat", "optics"].iter().map(|s| s.to_string()).collect();
        assert_eq!(report.attempt.weak_topics, expected);
        assert_eq!(report.percentage, 60.0);
        assert_eq!(
            report.feedback,
            "Fair performance. Review the weak areas for improvement. \
             Focus on: heat, optics. Review topics: heat, optics."
        );
    }

    #[tokio::test]
    async fn unknown_question_ids_are_rejected_before_grading() {
        let grader = FakeGrader::new(Behavior::Quality(1.0));
        let (store, orchestrator) = orchestrator(grader.clone());
        let err = orchestrator
            .grade_submission(
                &quiz(vec![short("q1", "energy")]),
                "u1",
                answers(&[("q1", text("x")), ("q9", text("y"))]),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::UnknownQuestion(ref id)) if id == "q9"
        ));
        assert_eq!(grader.calls(), 0);
        assert!(store
            .query_attempts(&RecordFilter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn empty_quiz_is_rejected() {
        let (_, orchestrator) = orchestrator(FakeGrader::new(Behavior::Fail));
        let err = orchestrator
            .grade_submission(&quiz(vec![]), "u1", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::EmptyQuestionSet(_))
        ));
    }

    #[tokio::test]
    async fn attempt_is_persisted_with_submitted_answers() {
        let (store, orchestrator) = orchestrator(FakeGrader::new(Behavior::Quality(0.9)));
        let submitted = answers(&[("q1", SubmittedAnswer::Number(0.0)), ("q2", text("why"))]);
        let report = orchestrator
            .grade_submission(
                &quiz(vec![mcq("q1", "t", 0), short("q2", "t")]),
                "u7",
                submitted.clone(),
            )
            .await
            .unwrap();

        let stored = store
            .query_attempts(&RecordFilter::for_user("u7"))
            .await
            .unwrap();
        assert_eq!(stored, vec![report.attempt.clone()]);
        assert_eq!(stored[0].answers, submitted);
        assert_eq!(stored[0].quiz_content_hash, "hash-1");
    }

    #[test]
    fn semantic_quality_is_clamped() {
        let high = semantic_outcome(
            2.0,
            "t".into(),
            &TextGrade {
                quality: 1.7,
                feedback: Some("great".into()),
            },
        );
        assert_eq!(high.score, 2.0);
        assert_eq!(high.feedback, "great");

        let nan = semantic_outcome(
            2.0,
            "t".into(),
            &TextGrade {
                quality: f64::NAN,
                feedback: None,
            },
        );
        assert_eq!(nan.score, 0.0);
        assert!(!nan.is_correct);
    }

    #[test]
    fn tolerance_is_relative_to_the_reference() {
        assert!(within_tolerance(5.1, 5.0));
        assert!(!within_tolerance(5.11, 5.0));
        assert!(within_tolerance(-99.0, -100.0));
        assert!(within_tolerance(0.0, 0.0));
        assert!(!within_tolerance(0.001, 0.0));
    }
}
