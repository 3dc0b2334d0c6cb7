//! Adapter from a raw LLM provider to the core's AI capabilities.
//!
//! `LlmTutor` owns the prompts, parses the model's JSON and validates it into
//! core types. Anything it cannot turn into a well-formed result is returned
//! as an error, which the core treats as a failed call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use quizforge_core::model::{QuestionKind, QuestionSpec};
use quizforge_core::traits::{
    GenerationRequest, GradeTextRequest, QuestionCounts, QuestionGenerator, SemanticGrader,
    TextGrade,
};

use crate::error::ProviderError;
use crate::provider::{extract_json_from_markdown, GenerateRequest, LlmProvider};

/// Marker lines shared with the offline mock provider.
pub(crate) const COUNTS_MARKER: &str = "Question counts:";
pub(crate) const TOPICS_MARKER: &str = "Topics:";
pub(crate) const EXPECTED_MARKER: &str = "Expected answer:";
pub(crate) const STUDENT_MARKER: &str = "Student answer:";
pub(crate) const KIND_MARKER: &str = "Question type:";

const GENERATION_SYSTEM_PROMPT: &str = r#"You are an expert educator writing quiz questions
from a textbook chapter.
Questions must come from the chapter content and test real understanding.
MCQ questions have exactly 4 options, one correct answer and realistic distractors.
Short answer questions need a 2-3 sentence explanation; list the expected key points in the answer.
Numerical problems require a calculation and have a single numeric answer.

Return ONLY a JSON array, no preamble, in this format:
[
  {"type": "mcq", "question": "...", "options": ["A", "B", "C", "D"], "correct_answer": 0,
   "topic": "...", "points": 1.0},
  {"type": "short", "question": "...", "correct_answer": "Expected answer with key points",
   "topic": "...", "points": 2.0},
  {"type": "numerical", "question": "...", "correct_answer": 42.5, "topic": "...",
   "points": 3.0}
]"#;

const GRADING_SYSTEM_PROMPT: &str = r#"You grade a student's answer to a question
from a textbook chapter.
Score from 0.0 to 1.0 on correctness of key concepts, completeness and understanding
demonstrated.
For numerical answers, accept alternative valid methods and allow 2% tolerance for rounding.

Return ONLY JSON, no markdown:
{"score": 0.85, "feedback": "One or two sentences for the student."}"#;

/// Generation and grading settings for one tutor.
#[derive(Debug, Clone)]
pub struct TutorSettings {
    pub model: String,
    pub temperature: f64,
    pub generation_max_tokens: u32,
    pub grading_max_tokens: u32,
}

impl TutorSettings {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: 0.2,
            generation_max_tokens: 4096,
            grading_max_tokens: 512,
        }
    }
}

/// Question generator and semantic grader backed by an LLM provider.
pub struct LlmTutor {
    provider: Arc<dyn LlmProvider>,
    settings: TutorSettings,
}

impl LlmTutor {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: TutorSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    async fn complete(
        &self,
        system: &str,
        prompt: String,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        let response = self
            .provider
            .generate(&GenerateRequest {
                model: self.settings.model.clone(),
                prompt,
                system_prompt: Some(system.to_string()),
                max_tokens,
                temperature: self.settings.temperature,
            })
            .await?;
        tracing::debug!(
            tokens = response.token_usage.total_tokens,
            latency_ms = response.latency_ms,
            "completion received"
        );
        Ok(response.content)
    }
}

#[async_trait]
impl QuestionGenerator for LlmTutor {
    #[instrument(
        skip(self, request),
        fields(provider = self.provider.name(), chapter = %request.chapter.chapter_id)
    )]
    async fn generate_questions(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<Vec<QuestionSpec>> {
        let content = self
            .complete(
                GENERATION_SYSTEM_PROMPT,
                generation_prompt(request),
                self.settings.generation_max_tokens,
            )
            .await?;
        let questions = parse_questions(&content)?;
        if questions.len() as u32 != request.counts.total() {
            tracing::warn!(
                expected = request.counts.total(),
                received = questions.len(),
                "model returned a different number of questions"
            );
        }
        Ok(questions)
    }
}

#[async_trait]
impl SemanticGrader for LlmTutor {
    #[instrument(
        skip(self, request),
        fields(provider = self.provider.name(), kind = %request.question_kind)
    )]
    async fn grade_text(&self, request: &GradeTextRequest) -> anyhow::Result<TextGrade> {
        let content = self
            .complete(
                GRADING_SYSTEM_PROMPT,
                grading_prompt(request),
                self.settings.grading_max_tokens,
            )
            .await?;
        parse_grade(&content)
    }
}

fn generation_prompt(request: &GenerationRequest) -> String {
    let chapter = &request.chapter;
    let QuestionCounts {
        mcq,
        short,
        numerical,
    } = request.counts;
    let topics = if chapter.topics.is_empty() {
        "general".to_string()
    } else {
        chapter.topics.join(", ")
    };
    format!(
        "Chapter: {title}\n\
         Source document: {document}\n\
         Difficulty: {difficulty}\n\
         {TOPICS_MARKER} {topics}\n\
         {COUNTS_MARKER} mcq={mcq}, short={short}, numerical={numerical}\n\n\
         Generate EXACTLY {total} questions: {mcq} MCQ, then {short} short answer, \
         then {numerical} numerical.",
        title = chapter.title,
        document = chapter.document_ref,
        difficulty = request.difficulty,
        total = request.counts.total(),
    )
}

fn grading_prompt(request: &GradeTextRequest) -> String {
    format!(
        "Chapter: {title}\n\
         Question: {prompt}\n\
         {KIND_MARKER} {kind}\n\
         Topic: {topic}\n\
         {EXPECTED_MARKER} {expected}\n\
         {STUDENT_MARKER} {submitted}",
        title = request.context.title,
        prompt = request.prompt,
        kind = request.question_kind,
        topic = request.topic,
        expected = request.reference,
        submitted = request.submitted,
    )
}

#[derive(Deserialize)]
struct RawQuestion {
    #[serde(rename = "type")]
    kind: String,
    #[serde(alias = "prompt")]
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: Value,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    points: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuestionSet {
    List(Vec<RawQuestion>),
    Wrapped { questions: Vec<RawQuestion> },
}

fn malformed(message: String) -> anyhow::Error {
    ProviderError::MalformedResponse(message).into()
}

/// Parse and validate generated questions, assigning ids `q1..qN`.
pub fn parse_questions(content: &str) -> anyhow::Result<Vec<QuestionSpec>> {
    let json = extract_json_from_markdown(content);
    let raw = match serde_json::from_str::<RawQuestionSet>(&json) {
        Ok(RawQuestionSet::List(list)) | Ok(RawQuestionSet::Wrapped { questions: list }) => list,
        Err(e) => return Err(malformed(format!("questions are not valid JSON: {e}"))),
    };

    raw.into_iter()
        .enumerate()
        .map(|(i, q)| convert_question(i + 1, q))
        .collect()
}

fn convert_question(number: usize, raw: RawQuestion) -> anyhow::Result<QuestionSpec> {
    let id = format!("q{number}");
    let (kind, default_points) = match raw.kind.trim().to_lowercase().as_str() {
        "mcq" | "multiple_choice" => {
            if raw.options.len() < 2 {
                return Err(malformed(format!("{id}: MCQ needs at least two options")));
            }
            let index = answer_index(&raw.correct_answer)
                .filter(|i| *i < raw.options.len())
                .ok_or_else(|| {
                    malformed(format!(
                        "{id}: correct answer {} is not one of {} options",
                        raw.correct_answer,
                        raw.options.len()
                    ))
                })?;
            (
                QuestionKind::Mcq {
                    options: raw.options,
                    correct_option_index: index,
                },
                1.0,
            )
        }
        "short" | "short_answer" => {
            let reference_answer = match &raw.correct_answer {
                Value::String(s) if !s.trim().is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(malformed(format!("{id}: short answer has no reference answer"))),
            };
            (QuestionKind::ShortAnswer { reference_answer }, 2.0)
        }
        "numerical" | "numeric" => {
            let reference_value = match &raw.correct_answer {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                malformed(format!(
                    "{id}: numerical answer {} is not a number",
                    raw.correct_answer
                ))
            })?;
            (QuestionKind::Numerical { reference_value }, 3.0)
        }
        other => return Err(malformed(format!("{id}: unknown question type `{other}`"))),
    };

    let points = raw.points.unwrap_or(default_points);
    if !(points.is_finite() && points > 0.0) {
        return Err(malformed(format!("{id}: points must be positive, got {points}")));
    }
    if raw.question.trim().is_empty() {
        return Err(malformed(format!("{id}: question text is empty")));
    }

    Ok(QuestionSpec {
        id,
        topic: raw
            .topic
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "general".to_string()),
        points,
        prompt: raw.question,
        kind,
    })
}

fn answer_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|i| i as usize),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<usize>() {
                return Some(i);
            }
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => {
                    Some((c.to_ascii_uppercase() as u8 - b'A') as usize)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[derive(Deserialize)]
struct RawGrade {
    #[serde(alias = "quality")]
    score: f64,
    #[serde(default)]
    feedback: Option<String>,
}

/// Parse a grading response, clamping the score into [0, 1].
pub fn parse_grade(content: &str) -> anyhow::Result<TextGrade> {
    let json = extract_json_from_markdown(content);
    let raw: RawGrade = serde_json::from_str(&json)
        .map_err(|e| malformed(format!("grade is not valid JSON: {e}")))?;
    if !raw.score.is_finite() {
        return Err(malformed(format!("grade score {} is not finite", raw.score)));
    }
    Ok(TextGrade {
        quality: raw.score.clamp(0.0, 1.0),
        feedback: raw.feedback.filter(|f| !f.trim().is_empty()),
    })
}
