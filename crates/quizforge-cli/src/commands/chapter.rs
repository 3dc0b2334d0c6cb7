//! The `quizforge chapter` commands.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Cell, Table};
use tracing::warn;

use quizforge_core::completion::{estimate_page_count, BASELINE_PAGES};
use quizforge_core::model::Chapter;

use super::Workspace;

/// Arguments of `chapter add`.
pub struct NewChapter {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub class_level: u8,
    pub topics: Vec<String>,
    pub document: String,
    pub pages: Option<u32>,
}

pub async fn add(config_path: Option<&Path>, new: NewChapter) -> Result<()> {
    let workspace = Workspace::open(config_path)?;

    let page_count = match new.pages {
        Some(pages) => pages,
        None => page_count_for(&new.document),
    };
    let topics = new
        .topics
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let chapter = Chapter {
        id: new.id.trim().to_string(),
        title: new.title,
        subject: new.subject,
        class_level: new.class_level,
        topics,
        document_ref: new.document,
        page_count,
        created_at: Utc::now(),
    };
    chapter.validate()?;

    workspace
        .store
        .put_chapter(&chapter)
        .await
        .context("failed to store chapter")?;

    println!(
        "Added chapter {} ({} pages, {} topics)",
        chapter.id,
        chapter.page_count,
        chapter.topics.len()
    );
    Ok(())
}

fn page_count_for(document: &str) -> u32 {
    match std::fs::metadata(document) {
        Ok(meta) => estimate_page_count(meta.len()),
        Err(e) => {
            warn!("cannot size {document} ({e}), assuming {BASELINE_PAGES} pages");
            BASELINE_PAGES
        }
    }
}

pub async fn list(config_path: Option<&Path>) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let chapters = workspace.store.query_chapters().await?;

    if chapters.is_empty() {
        println!("No chapters registered. Add one with `quizforge chapter add`.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Id", "Title", "Subject", "Class", "Pages", "Topics"]);
    for chapter in &chapters {
        table.add_row(vec![
            Cell::new(&chapter.id),
            Cell::new(&chapter.title),
            Cell::new(&chapter.subject),
            Cell::new(chapter.class_level),
            Cell::new(chapter.page_count),
            Cell::new(chapter.topics.join(", ")),
        ]);
    }
    println!("{table}");
    Ok(())
}
