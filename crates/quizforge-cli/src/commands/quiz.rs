//! The `quizforge quiz` command.

use std::path::Path;

use anyhow::Result;

use quizforge_core::model::{Difficulty, QuestionKind, QuizVariant};
use quizforge_core::traits::QuestionCounts;
use quizforge_core::variant::QuizRequest;

use super::{print_json, Workspace};

pub async fn execute(
    config_path: Option<&Path>,
    chapter_id: &str,
    difficulty: &str,
    counts: QuestionCounts,
    provider: Option<&str>,
    model: Option<&str>,
    json: bool,
) -> Result<()> {
    let difficulty: Difficulty = difficulty.parse()?;
    let request = QuizRequest::new(
        chapter_id,
        difficulty,
        counts.mcq,
        counts.short,
        counts.numerical,
    );

    let workspace = Workspace::open(config_path)?;
    let tutor = workspace.tutor(provider, model)?;
    let coordinator = workspace.coordinator(tutor);
    let quiz = coordinator.get_or_create_quiz(&request).await?;

    if json {
        return print_json(&quiz);
    }
    print_quiz(&quiz);
    Ok(())
}

fn print_quiz(quiz: &QuizVariant) {
    println!("Quiz {}", quiz.content_hash);
    println!(
        "Chapter {} ({}), {} questions, {} points",
        quiz.chapter_id,
        quiz.difficulty,
        quiz.total_questions(),
        quiz.total_points()
    );

    for question in &quiz.questions {
        println!(
            "\n{} [{}, {}, {} pts] {}",
            question.id,
            question.kind.label(),
            question.topic,
            question.points,
            question.prompt
        );
        if let QuestionKind::Mcq { options, .. } = &question.kind {
            for (letter, option) in ('A'..='Z').zip(options) {
                println!("   {letter}) {option}");
            }
        }
    }
}
