//! Mock provider for tests and offline use.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProviderError;
use crate::provider::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo, TokenUsage};
use crate::tutor::{COUNTS_MARKER, EXPECTED_MARKER, KIND_MARKER, STUDENT_MARKER, TOPICS_MARKER};

enum Behavior {
    /// Prompt substring → response, checked in order, then a default.
    Scripted {
        responses: Vec<(String, String)>,
        default_response: String,
    },
    /// Answer tutor prompts with synthetic quizzes and keyword-overlap grades.
    Simulated,
    Failing(String),
}

/// A mock LLM provider that never touches the network.
pub struct MockProvider {
    behavior: Behavior,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockProvider {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock with prompt→response mappings, checked in order.
    pub fn new(responses: Vec<(String, String)>) -> Self {
        Self::with_behavior(Behavior::Scripted {
            responses,
            default_response: "{}".to_string(),
        })
    }

    /// Create a mock that always returns the same response.
    pub fn with_fixed_response(response: &str) -> Self {
        Self::with_behavior(Behavior::Scripted {
            responses: Vec::new(),
            default_response: response.to_string(),
        })
    }

    /// Create a mock that understands the tutor's prompts.
    pub fn simulated() -> Self {
        Self::with_behavior(Behavior::Simulated)
    }

    /// Create a mock whose every call fails.
    pub fn failing(message: &str) -> Self {
        Self::with_behavior(Behavior::Failing(message.to_string()))
    }

    /// Get the number of calls made to this provider.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the last request made to this provider.
    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request.clone());

        let content = match &self.behavior {
            Behavior::Scripted {
                responses,
                default_response,
            } => responses
                .iter()
                .find(|(key, _)| request.prompt.contains(key.as_str()))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| default_response.clone()),
            Behavior::Simulated => simulate(&request.prompt)?,
            Behavior::Failing(message) => {
                return Err(ProviderError::NetworkError(message.clone()).into())
            }
        };

        // Rough estimate
        let prompt_tokens = (request.prompt.len() / 4) as u32;
        let completion_tokens = (content.len() / 4) as u32;

        Ok(GenerateResponse {
            content,
            model: request.model.clone(),
            token_usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            latency_ms: 1,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            name: "Mock Model".into(),
            provider: "mock".into(),
            max_context: 100_000,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
        }]
    }
}

/// Text after `marker` on its line.
fn field<'a>(prompt: &'a str, marker: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(marker))
        .map(str::trim)
}

fn simulate(prompt: &str) -> anyhow::Result<String> {
    if let Some(counts) = field(prompt, COUNTS_MARKER) {
        let topics: Vec<&str> = field(prompt, TOPICS_MARKER)
            .map(|t| t.split(',').map(str::trim).filter(|t| !t.is_empty()).collect())
            .unwrap_or_default();
        return Ok(synthetic_quiz(counts, &topics)?.to_string());
    }
    if prompt.contains(STUDENT_MARKER) {
        let expected = field(prompt, EXPECTED_MARKER).unwrap_or_default();
        let submitted = field(prompt, STUDENT_MARKER).unwrap_or_default();
        let kind = field(prompt, KIND_MARKER).unwrap_or("short");
        let (score, feedback) = synthetic_grade(kind, expected, submitted);
        return Ok(json!({ "score": score, "feedback": feedback }).to_string());
    }
    Err(ProviderError::MalformedResponse("mock cannot answer this prompt".into()).into())
}

/// Parse `mcq=2, short=1, numerical=0`.
fn parse_counts(counts: &str) -> anyhow::Result<[u32; 3]> {
    let mut parsed = [0u32; 3];
    for part in counts.split(',') {
        let (name, value) = part
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("malformed question counts: {counts}"))?;
        let slot = match name.trim() {
            "mcq" => 0,
            "short" => 1,
            "numerical" => 2,
            other => anyhow::bail!("unknown question kind in counts: {other}"),
        };
        parsed[slot] = value.trim().parse()?;
    }
    Ok(parsed)
}

fn synthetic_quiz(counts: &str, topics: &[&str]) -> anyhow::Result<serde_json::Value> {
    let [mcq, short, numerical] = parse_counts(counts)?;
    let topic = |i: u32| {
        if topics.is_empty() {
            "general".to_string()
        } else {
            topics[i as usize % topics.len()].to_string()
        }
    };

    let mut questions = Vec::new();
    for i in 0..mcq {
        let t = topic(i);
        questions.push(json!({
            "type": "mcq",
            "question": format!("Which statement about {t} is correct? ({})", i + 1),
            "options": [
                format!("{t} statement A"),
                format!("{t} statement B"),
                format!("{t} statement C"),
                format!("{t} statement D"),
            ],
            "correct_answer": i % 4,
            "topic": t,
            "points": 1.0,
        }));
    }
    for i in 0..short {
        let t = topic(mcq + i);
        questions.push(json!({
            "type": "short",
            "question": format!("Explain the role of {t} in this chapter. ({})", i + 1),
            "correct_answer": format!("Key points about {t}: definition, example, application"),
            "topic": t,
            "points": 2.0,
        }));
    }
    for i in 0..numerical {
        let t = topic(mcq + short + i);
        questions.push(json!({
            "type": "numerical",
            "question": format!("Compute the {t} quantity for case {}.", i + 1),
            "correct_answer": 10.0 * f64::from(i + 1),
            "topic": t,
            "points": 3.0,
        }));
    }
    Ok(serde_json::Value::Array(questions))
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

/// Share of the reference's keywords present in the submitted answer.
fn synthetic_grade(kind: &str, expected: &str, submitted: &str) -> (f64, &'static str) {
    if kind == "numerical" {
        return match (expected.parse::<f64>(), submitted.parse::<f64>()) {
            (Ok(_), Ok(_)) => (0.0, "The value is outside the accepted range"),
            _ => (0.5, "Unable to grade automatically"),
        };
    }

    let wanted = keywords(expected);
    if wanted.is_empty() {
        return (0.5, "Unable to grade automatically");
    }
    let given = keywords(submitted);
    let score = wanted.intersection(&given).count() as f64 / wanted.len() as f64;
    let feedback = if score >= 0.7 {
        "Good answer covering key points"
    } else if score >= 0.4 {
        "Partial answer, missing some key concepts"
    } else {
        "Answer missing most key concepts"
    };
    (score, feedback)
}
