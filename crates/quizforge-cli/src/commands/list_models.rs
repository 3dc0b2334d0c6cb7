//! The `quizforge list-models` command.

use std::path::Path;

use anyhow::Result;

use quizforge_providers::config::load_config_from;
use quizforge_providers::create_provider;

pub fn execute(provider_filter: Option<String>, config_path: Option<&Path>) -> Result<()> {
    let config = load_config_from(config_path)?;

    let mut found_any = false;

    for name in config.provider_names() {
        if provider_filter.as_deref().is_some_and(|filter| filter != name) {
            continue;
        }
        let (name, provider_config) = config.provider(Some(name))?;

        let provider = match create_provider(name, provider_config) {
            Ok(provider) => provider,
            Err(e) => {
                println!("Provider: {name} (unavailable: {e})\n");
                continue;
            }
        };
        let models = provider.available_models();

        if !models.is_empty() {
            found_any = true;
            println!("Provider: {name}");
            for model in &models {
                println!(
                    "  {} - {} ({}K context, ${:.4}/{:.4} per 1K tokens)",
                    model.id,
                    model.name,
                    model.max_context / 1000,
                    model.cost_per_1k_input,
                    model.cost_per_1k_output,
                );
            }
            println!();
        }
    }

    if !found_any {
        println!("No providers configured. Run `quizforge init` to create a config file.");
    }

    Ok(())
}
