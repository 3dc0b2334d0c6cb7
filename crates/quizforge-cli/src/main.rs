//! quizforge CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use quizforge_core::traits::QuestionCounts;
use tracing_subscriber::filter::{Directive, LevelFilter};

mod commands;

#[derive(Parser)]
#[command(
    name = "quizforge",
    version,
    about = "Chapter progress tracking, cached AI quizzes, grading and mastery reports"
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config and data directory
    Init,

    /// Manage chapters
    #[command(subcommand)]
    Chapter(ChapterCommand),

    /// Record engagement signals for a user's chapter reading
    Progress {
        #[arg(long)]
        user: String,

        #[arg(long)]
        chapter: String,

        /// Seconds spent on the chapter
        #[arg(long, allow_negative_numbers = true)]
        time_spent: i64,

        /// Furthest scroll position, 0-100
        #[arg(long, allow_negative_numbers = true)]
        scroll: f64,

        /// Text selections made while reading
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        selections: i64,
    },

    /// Show a user's completion status for a chapter
    Status {
        #[arg(long)]
        user: String,

        #[arg(long)]
        chapter: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Get (or generate) the quiz variant for a chapter
    Quiz {
        #[arg(long)]
        chapter: String,

        /// easy, medium or hard
        #[arg(long, default_value = "medium")]
        difficulty: String,

        #[arg(long, default_value = "5")]
        mcq: u32,

        #[arg(long, default_value = "3")]
        short: u32,

        #[arg(long, default_value = "2")]
        numerical: u32,

        /// Provider name from the config (defaults to `default_provider`)
        #[arg(long)]
        provider: Option<String>,

        /// Model to use (defaults to `default_model`)
        #[arg(long)]
        model: Option<String>,

        /// Print the full variant as JSON
        #[arg(long)]
        json: bool,
    },

    /// Grade a submission against a stored quiz variant
    Submit {
        #[arg(long)]
        user: String,

        /// Content hash of the quiz variant
        #[arg(long)]
        quiz: String,

        /// JSON file mapping question ids to answers
        #[arg(long)]
        answers: Option<PathBuf>,

        /// Inline answer, e.g. `--answer q1=B` (repeatable)
        #[arg(long = "answer", value_name = "ID=VALUE")]
        inline: Vec<String>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Drop every cached quiz variant of a chapter
    Invalidate {
        #[arg(long)]
        chapter: String,
    },

    /// Performance and analytics reports
    #[command(subcommand)]
    Report(ReportCommand),

    /// List available models
    ListModels {
        /// Filter to specific provider
        #[arg(long)]
        provider: Option<String>,
    },
}

#[derive(Subcommand)]
enum ChapterCommand {
    /// Register a chapter
    Add {
        #[arg(long)]
        id: String,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        subject: String,

        /// School class level, 1-12
        #[arg(long)]
        class_level: u8,

        /// Comma-separated topic list
        #[arg(long, value_delimiter = ',')]
        topics: Vec<String>,

        /// Path or reference of the chapter document
        #[arg(long)]
        document: String,

        /// Page count (estimated from the document size when omitted)
        #[arg(long)]
        pages: Option<u32>,
    },

    /// List registered chapters
    List,
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Per-user performance across chapters and topics
    User {
        #[arg(long)]
        user: String,

        #[arg(long)]
        json: bool,
    },

    /// Per-chapter analytics across users
    Chapter {
        #[arg(long)]
        chapter: String,

        /// How many difficult questions to list
        #[arg(long, default_value = "5")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let default_directive: Directive = "quizforge=info"
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_directive),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Init => commands::init::execute(),
        Commands::Chapter(ChapterCommand::Add {
            id,
            title,
            subject,
            class_level,
            topics,
            document,
            pages,
        }) => {
            let chapter = commands::chapter::NewChapter {
                id,
                title,
                subject,
                class_level,
                topics,
                document,
                pages,
            };
            commands::chapter::add(config, chapter).await
        }
        Commands::Chapter(ChapterCommand::List) => commands::chapter::list(config).await,
        Commands::Progress {
            user,
            chapter,
            time_spent,
            scroll,
            selections,
        } => {
            commands::progress::record(config, &user, &chapter, time_spent, scroll, selections)
                .await
        }
        Commands::Status {
            user,
            chapter,
            json,
        } => commands::progress::status(config, &user, &chapter, json).await,
        Commands::Quiz {
            chapter,
            difficulty,
            mcq,
            short,
            numerical,
            provider,
            model,
            json,
        } => {
            let counts = QuestionCounts {
                mcq,
                short,
                numerical,
            };
            commands::quiz::execute(
                config,
                &chapter,
                &difficulty,
                counts,
                provider.as_deref(),
                model.as_deref(),
                json,
            )
            .await
        }
        Commands::Submit {
            user,
            quiz,
            answers,
            inline,
            provider,
            model,
            json,
        } => {
            commands::submit::execute(
                config,
                &user,
                &quiz,
                answers,
                inline,
                provider.as_deref(),
                model.as_deref(),
                json,
            )
            .await
        }
        Commands::Invalidate { chapter } => commands::invalidate::execute(config, &chapter).await,
        Commands::Report(ReportCommand::User { user, json }) => {
            commands::report::user(config, &user, json).await
        }
        Commands::Report(ReportCommand::Chapter {
            chapter,
            limit,
            json,
        }) => commands::report::chapter(config, &chapter, limit, json).await,
        Commands::ListModels { provider } => commands::list_models::execute(provider, config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
