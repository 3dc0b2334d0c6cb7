//! Subcommand implementations.

pub mod chapter;
pub mod init;
pub mod invalidate;
pub mod list_models;
pub mod progress;
pub mod quiz;
pub mod report;
pub mod submit;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use quizforge_core::cache::QuizCacheCoordinator;
use quizforge_core::grading::GradingOrchestrator;
use quizforge_core::traits::{DurableStore, VolatileCache};
use quizforge_providers::config::load_config_from;
use quizforge_providers::{create_provider, LlmTutor, QuizforgeConfig, TutorSettings};

/// Loaded config plus the two storage tiers under its data directory.
pub(crate) struct Workspace {
    pub config: QuizforgeConfig,
    pub store: Arc<dyn DurableStore>,
    pub cache: Arc<dyn VolatileCache>,
}

impl Workspace {
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config_from(config_path)?;
        let (store, cache) = quizforge_store::open(&config.data_dir);
        Ok(Self {
            config,
            store: Arc::new(store),
            cache: Arc::new(cache),
        })
    }

    /// Build the AI tutor for `provider` (or the configured default).
    pub fn tutor(&self, provider: Option<&str>, model: Option<&str>) -> Result<Arc<LlmTutor>> {
        let (name, provider_config) = self.config.provider(provider)?;
        let provider = create_provider(name, provider_config)?;
        let mut settings = TutorSettings::new(model.unwrap_or(&self.config.default_model));
        settings.temperature = self.config.default_temperature;
        Ok(Arc::new(LlmTutor::new(provider, settings)))
    }

    pub fn coordinator(&self, tutor: Arc<LlmTutor>) -> QuizCacheCoordinator {
        QuizCacheCoordinator::new(
            self.store.clone(),
            self.cache.clone(),
            tutor,
            self.config.coordinator_config(),
        )
    }

    pub fn grader(&self, tutor: Arc<LlmTutor>) -> GradingOrchestrator {
        GradingOrchestrator::new(self.store.clone(), tutor, self.config.grading_config())
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
