//! arXiv daily digest — binary entrypoint.
//! Fetches recent papers, summarizes them through an LLM endpoint, renders
//! a digest, and delivers it via the configured channels.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use arxiv_digest::store::today_utc;
use arxiv_digest::{config::Settings, doctor, pipeline, scheduler};

#[derive(Parser)]
#[command(
    name = "arxiv-digest",
    about = "Daily arXiv paper digest with LLM summarization"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full pipeline: fetch, summarize, render, push
    Run {
        /// Run date (YYYY-MM-DD), defaults to today in UTC
        #[arg(long)]
        date: Option<String>,
    },
    /// Fetch papers from arXiv into the store
    Fetch,
    /// Summarize unsummarized papers
    Summarize,
    /// Render and send the digest for a date
    Send {
        /// Run date (YYYY-MM-DD), defaults to today in UTC
        #[arg(long)]
        date: Option<String>,
    },
    /// Check configuration and connectivity
    Doctor,
    /// Start the daily scheduler
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arxiv_digest=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = Settings::load()?;

    match cli.command {
        Command::Run { date } => pipeline::run(&cfg, &date.unwrap_or_else(today_utc)).await,
        Command::Fetch => pipeline::fetch_only(&cfg).await,
        Command::Summarize => pipeline::summarize_only(&cfg).await,
        Command::Send { date } => pipeline::send(&cfg, &date.unwrap_or_else(today_utc)).await,
        Command::Doctor => doctor::run(&cfg).await,
        Command::Schedule => scheduler::run_daily(&cfg).await,
    }
}
