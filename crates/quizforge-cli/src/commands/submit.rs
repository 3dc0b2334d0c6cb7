//! The `quizforge submit` command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use quizforge_core::grading::GradingReport;
use quizforge_core::model::SubmittedAnswer;

use super::{print_json, Workspace};

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    config_path: Option<&Path>,
    user_id: &str,
    content_hash: &str,
    answers_file: Option<PathBuf>,
    inline: Vec<String>,
    provider: Option<&str>,
    model: Option<&str>,
    json: bool,
) -> Result<()> {
    let answers = collect_answers(answers_file.as_deref(), &inline)?;

    let workspace = Workspace::open(config_path)?;
    let tutor = workspace.tutor(provider, model)?;
    let quiz = workspace
        .coordinator(tutor.clone())
        .find_quiz(content_hash)
        .await?;
    let report = workspace
        .grader(tutor)
        .grade_submission(&quiz, user_id, answers)
        .await?;

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

/// Merge the answers file with inline `id=value` answers; inline wins.
fn collect_answers(
    file: Option<&Path>,
    inline: &[String],
) -> Result<BTreeMap<String, SubmittedAnswer>> {
    let mut answers: BTreeMap<String, SubmittedAnswer> = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read answers: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse answers: {}", path.display()))?
        }
        None => BTreeMap::new(),
    };

    for pair in inline {
        let (id, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid answer '{pair}', expected ID=VALUE"))?;
        answers.insert(id.trim().to_string(), parse_answer(value));
    }
    Ok(answers)
}

fn parse_answer(value: &str) -> SubmittedAnswer {
    match value.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => SubmittedAnswer::Number(number),
        _ => SubmittedAnswer::Text(value.to_string()),
    }
}

fn print_report(report: &GradingReport) {
    let attempt = &report.attempt;

    let mut table = Table::new();
    table.set_header(vec!["Question", "Topic", "Score", "Correct", "Feedback"]);
    for (id, outcome) in &attempt.results {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(&outcome.topic),
            Cell::new(format!("{:.2}/{:.2}", outcome.score, outcome.max_score)),
            Cell::new(if outcome.is_correct { "yes" } else { "no" }),
            Cell::new(&outcome.feedback),
        ]);
    }
    println!("{table}");

    println!(
        "\nScore: {:.2}/{:.2} ({:.1}%)",
        attempt.total_score, attempt.max_score, report.percentage
    );
    if !attempt.weak_topics.is_empty() {
        let weak: Vec<&str> = attempt.weak_topics.iter().map(String::as_str).collect();
        println!("Weak topics: {}", weak.join(", "));
    }
    println!("{}", report.feedback);
    println!("Attempt: {}", attempt.id);
}
