//! quizforge-providers — LLM provider integrations.
//!
//! Implements the `LlmProvider` trait for Anthropic, OpenAI and an offline
//! mock, and adapts any provider to the core's question generation and
//! semantic grading capabilities through `LlmTutor`.

pub mod anthropic;
pub mod config;
pub mod error;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod tutor;

pub use config::{create_provider, load_config, ProviderConfig, QuizforgeConfig};
pub use error::ProviderError;
pub use mock::MockProvider;
pub use provider::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};
pub use tutor::{LlmTutor, TutorSettings};
