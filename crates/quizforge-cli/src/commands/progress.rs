//! The `quizforge progress` and `quizforge status` commands.

use std::path::Path;

use anyhow::Result;

use quizforge_core::completion::{CompletionScore, EngagementSignals, ProgressTracker};
use quizforge_core::ValidationError;

use super::{print_json, Workspace};

pub async fn record(
    config_path: Option<&Path>,
    user_id: &str,
    chapter_id: &str,
    time_spent_secs: i64,
    scroll_percent: f64,
    selection_count: i64,
) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let chapter = workspace
        .store
        .get_chapter(chapter_id)
        .await?
        .ok_or_else(|| ValidationError::UnknownChapter(chapter_id.to_string()))?;

    let signals = EngagementSignals::new(time_spent_secs, scroll_percent, selection_count)
        .with_page_count(chapter.page_count);
    let score = CompletionScore::compute(&signals);

    let tracker = ProgressTracker::new(workspace.store.clone());
    let record = tracker.update_progress(user_id, chapter_id, &signals).await?;

    println!(
        "Signals: time {:.2}, scroll {:.2}, interaction {:.2} -> composite {:.2}",
        score.time_score, score.scroll_score, score.interaction_score, score.composite
    );
    println!(
        "Chapter {}: {:.1}% ({})",
        chapter.title,
        record.composite_score * 100.0,
        if record.is_completed {
            "completed"
        } else {
            "in progress"
        }
    );
    Ok(())
}

pub async fn status(
    config_path: Option<&Path>,
    user_id: &str,
    chapter_id: &str,
    json: bool,
) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let tracker = ProgressTracker::new(workspace.store.clone());
    let status = tracker.chapter_status(user_id, chapter_id).await?;

    if json {
        return print_json(&status);
    }

    println!("User:       {user_id}");
    println!("Chapter:    {chapter_id}");
    println!("Completion: {:.2}%", status.completion_pct);
    println!("Completed:  {}", if status.is_completed { "yes" } else { "no" });
    println!("Time spent: {}s", status.time_spent_secs);
    println!("Scroll:     {:.1}%", status.scroll_percent);
    println!("Method:     {}", status.method_used);
    Ok(())
}
