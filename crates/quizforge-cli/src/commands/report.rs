//! The `quizforge report` commands.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Table};

use quizforge_core::analytics::{ChapterAnalytics, MasteryAggregator, UserPerformance};

use super::{print_json, Workspace};

pub async fn user(config_path: Option<&Path>, user_id: &str, json: bool) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let performance = MasteryAggregator::new(workspace.store.clone())
        .user_performance(user_id)
        .await?;

    if json {
        return print_json(&performance);
    }
    print_user(&performance);
    Ok(())
}

pub async fn chapter(
    config_path: Option<&Path>,
    chapter_id: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let analytics = MasteryAggregator::new(workspace.store.clone())
        .with_difficult_limit(limit)
        .chapter_analytics(chapter_id)
        .await?;

    if json {
        return print_json(&analytics);
    }
    print_chapter(&analytics);
    Ok(())
}

fn print_user(performance: &UserPerformance) {
    println!("User {}", performance.user_id);
    println!(
        "Chapters completed: {}/{}, quiz attempts: {}, average: {:.1}%",
        performance.completed_chapters,
        performance.total_chapters,
        performance.total_quiz_attempts,
        performance.average_percentage
    );

    if !performance.chapter_progress.is_empty() {
        let mut table = Table::new();
        table.set_header(vec![
            "Chapter",
            "Completed",
            "Composite",
            "Scroll",
            "Time",
            "Attempts",
            "Average",
        ]);
        for chapter in &performance.chapter_progress {
            table.add_row(vec![
                Cell::new(&chapter.chapter_title),
                Cell::new(if chapter.is_completed { "yes" } else { "no" }),
                Cell::new(format!("{:.2}", chapter.composite_score)),
                Cell::new(format!("{:.0}%", chapter.scroll_percent)),
                Cell::new(format!("{}s", chapter.time_spent_secs)),
                Cell::new(chapter.quiz_attempts),
                Cell::new(format!("{:.1}%", chapter.average_percentage)),
            ]);
        }
        println!("\n{table}");
    }

    if !performance.topic_mastery.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Topic", "Mastery", "Graded"]);
        for topic in &performance.topic_mastery {
            table.add_row(vec![
                Cell::new(&topic.topic),
                Cell::new(format!("{:.0}%", topic.mastery * 100.0)),
                Cell::new(topic.attempts),
            ]);
        }
        println!("\n{table}");
    }

    if !performance.weak_areas.is_empty() {
        let weak: Vec<&str> = performance.weak_areas.iter().map(|t| t.topic.as_str()).collect();
        println!("\nWeak areas: {}", weak.join(", "));
    }

    println!("\nRecommendations:");
    for recommendation in &performance.recommendations {
        println!("  - {recommendation}");
    }
}

fn print_chapter(analytics: &ChapterAnalytics) {
    println!("Chapter {} ({})", analytics.chapter_title, analytics.chapter_id);
    println!(
        "Attempts: {} by {} users, average {:.1}%",
        analytics.total_attempts, analytics.unique_users, analytics.average_percentage
    );
    println!(
        "Completion rate: {:.1}%, average completion time: {:.0}s",
        analytics.completion_rate * 100.0,
        analytics.average_completion_secs
    );

    if !analytics.difficult_questions.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Question", "Topic", "Attempts", "Average", "Text"]);
        for question in &analytics.difficult_questions {
            table.add_row(vec![
                Cell::new(&question.question_id),
                Cell::new(&question.topic),
                Cell::new(question.attempts),
                Cell::new(format!("{:.0}%", question.average_ratio * 100.0)),
                Cell::new(&question.question_text),
            ]);
        }
        println!("\nDifficult questions:\n{table}");
    }

    if !analytics.common_weak_topics.is_empty() {
        println!("\nCommon weak topics:");
        for topic in &analytics.common_weak_topics {
            println!("  {} ({} attempts, {:.1}%)", topic.topic, topic.count, topic.percentage);
        }
    }
}
