//! The `quizforge invalidate` command.

use std::path::Path;

use anyhow::Result;

use quizforge_core::cache::invalidate_chapter;

use super::Workspace;

pub async fn execute(config_path: Option<&Path>, chapter_id: &str) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    let removed =
        invalidate_chapter(workspace.store.as_ref(), workspace.cache.as_ref(), chapter_id).await?;
    println!("Invalidated {removed} cached quiz variant(s) for chapter {chapter_id}");
    Ok(())
}
