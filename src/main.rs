//! `docquery` command line entry point.
//!
//! Wires `AppState` once and exposes the study operations for manual use.
//! Every command prints its result as JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use docquery::agent::AnswerMode;
use docquery::core::config::AppPaths;
use docquery::core::logging;
use docquery::service::AnswerInput;
use docquery::state::AppState;

#[derive(Parser)]
#[command(name = "docquery", version, about = "Ask grounded questions about your documents")]
struct Cli {
    /// User the command acts for.
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a new session.
    NewSession {
        #[arg(long)]
        persona: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },

    /// Index a local file into a session.
    Index {
        session: String,
        file: PathBuf,
        /// Explicit document id; derived from the file otherwise.
        #[arg(long)]
        document_id: Option<String>,
    },

    /// Index a remote file into a session.
    IndexUrl {
        session: String,
        url: String,
        #[arg(long, default_value = "file")]
        name: String,
    },

    /// Show the passages retrieved for a question.
    Query {
        session: String,
        question: String,
        #[arg(short = 'n', long)]
        n_results: Option<usize>,
    },

    /// Ask a question within a session.
    Ask {
        session: String,
        question: String,
        #[arg(long)]
        deep_think: bool,
        /// Stop calling tools after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Ask a question about files without keeping them indexed.
    AskOnce {
        question: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        deep_think: bool,
        #[arg(long)]
        persona: Option<String>,
    },

    /// Rate an assistant message (`up` or `down`).
    Feedback { message_id: i64, feedback: String },

    /// Remove one indexed document from a session.
    DeleteDocument { session: String, document_id: String },

    /// Delete a session with its indexed documents.
    DeleteSession { session: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let state = AppState::initialize_with(paths)
        .await
        .context("Failed to initialize application state")?;

    let service = state.service.clone();
    let user = cli.user;

    match cli.command {
        Commands::NewSession { persona, title } => {
            let session_id = service
                .create_session(&user, persona.as_deref(), title)
                .await?;
            print_json(&serde_json::json!({ "session_id": session_id }))?;
        }
        Commands::Index {
            session,
            file,
            document_id,
        } => {
            let indexed = service
                .index(&file, document_id, &session, &user)
                .await
                .with_context(|| format!("Failed to index {}", file.display()))?;
            print_json(&indexed)?;
        }
        Commands::IndexUrl { session, url, name } => {
            let indexed = service
                .index_url(&url, &name, &session, &user)
                .await
                .with_context(|| format!("Failed to index {}", url))?;
            print_json(&indexed)?;
        }
        Commands::Query {
            session,
            question,
            n_results,
        } => {
            let result = service.query(&question, &session, &user, n_results).await;
            print_json(&result)?;
        }
        Commands::Ask {
            session,
            question,
            deep_think,
            timeout_secs,
        } => {
            let mut input = AnswerInput::new(question, session, user);
            input.mode = AnswerMode::from_flag(deep_think);
            input.deadline = timeout_secs
                .map(|secs| tokio::time::Instant::now() + std::time::Duration::from_secs(secs));
            let answered = service.answer(input).await?;
            print_json(&answered)?;
        }
        Commands::AskOnce {
            question,
            files,
            deep_think,
            persona,
        } => {
            let answered = service
                .ask_once(
                    &files,
                    &question,
                    &user,
                    Vec::new(),
                    AnswerMode::from_flag(deep_think),
                    persona.as_deref(),
                )
                .await?;
            print_json(&answered)?;
        }
        Commands::Feedback {
            message_id,
            feedback,
        } => {
            service.rate_message(&user, message_id, &feedback).await?;
            print_json(&serde_json::json!({ "message": "Feedback recorded" }))?;
        }
        Commands::DeleteDocument {
            session,
            document_id,
        } => {
            let deleted = service.delete_document(&session, &user, &document_id).await?;
            print_json(&serde_json::json!({ "document_id": document_id, "chunks_deleted": deleted }))?;
        }
        Commands::DeleteSession { session } => {
            service.delete_session(&session, &user).await?;
            print_json(&serde_json::json!({ "message": "Session deleted" }))?;
        }
    }

    Ok(())
}
