//! The `quizforge init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("quizforge.toml").exists() {
        println!("quizforge.toml already exists, skipping.");
    } else {
        std::fs::write("quizforge.toml", SAMPLE_CONFIG)?;
        println!("Created quizforge.toml");
    }

    let data_dir = Path::new("quizforge-data");
    if data_dir.exists() {
        println!("quizforge-data/ already exists, skipping.");
    } else {
        std::fs::create_dir_all(data_dir)?;
        println!("Created quizforge-data/");
    }

    println!("\nNext steps:");
    println!("  1. Edit quizforge.toml with your API keys (or set default_provider = \"mock\")");
    println!(
        "  2. Run: quizforge chapter add --id ch1 --title \"Motion\" --class-level 9 \
         --topics velocity,acceleration --document motion.pdf"
    );
    println!("  3. Run: quizforge quiz --chapter ch1 --difficulty easy");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# quizforge configuration

default_provider = "anthropic"
default_model = "claude-sonnet-4-20250514"
default_temperature = 0.2
generation_timeout_secs = 120
grading_timeout_secs = 30
grading_parallelism = 4
cache_ttl_secs = 3600
data_dir = "./quizforge-data"

[providers.anthropic]
type = "anthropic"
api_key = "${ANTHROPIC_API_KEY}"

[providers.openai]
type = "openai"
api_key = "${OPENAI_API_KEY}"

# Offline provider: synthetic quizzes and keyword-overlap grading.
[providers.mock]
type = "mock"
"#;
