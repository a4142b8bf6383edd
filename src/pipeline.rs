// src/pipeline.rs
// Full daily pipeline (fetch -> summarize -> render -> push) plus the
// standalone stage entrypoints behind the CLI subcommands. The run ledger
// makes repeated invocations for the same date safe: a completed run with
// all channels delivered is skipped outright, and each stage is
// independently idempotent.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::fetch;
use crate::ledger::{RunLedger, RunStatus};
use crate::push;
use crate::render::{render_markdown, render_plaintext};
use crate::store::Store;
use crate::summarizer::Summarizer;

/// Full pipeline for `run_date` (YYYY-MM-DD).
pub async fn run(cfg: &Settings, run_date: &str) -> Result<()> {
    let store = Arc::new(Store::open(cfg.db_full_path())?);
    let ledger = RunLedger::new(Arc::clone(&store));

    if ledger.already_delivered(run_date, &cfg.channels())? {
        info!(date = run_date, "run already completed and delivered, skipping");
        return Ok(());
    }
    ledger.mark_started(run_date)?;

    match run_stages(cfg, &store, &ledger, run_date).await {
        Ok(()) => {
            ledger.mark_completed(run_date, RunStatus::Completed)?;
            Ok(())
        }
        Err(e) => {
            ledger.mark_completed(run_date, RunStatus::Failed)?;
            Err(e)
        }
    }
}

async fn run_stages(
    cfg: &Settings,
    store: &Arc<Store>,
    ledger: &RunLedger,
    run_date: &str,
) -> Result<()> {
    // 1. Fetch
    let papers = fetch::fetch_papers(cfg).await?;
    if papers.is_empty() {
        warn!("no papers fetched, nothing to do");
        return Ok(());
    }
    let inserted = store.insert_papers(&papers)?;
    info!(inserted, fetched = papers.len(), "stored new papers");

    // 2. Summarize
    let summarizer = Summarizer::from_settings(cfg, Arc::clone(store))?;
    let outcome = summarizer.summarize_pending(run_date).await?;
    if outcome.failed > 0 {
        warn!(failed_ids = ?outcome.failed_ids, "some papers failed, they stay pending");
    }

    // 3. Render and save next to the database
    let rows = store.papers_for_date(run_date)?;
    let md = render_markdown(&rows, run_date);
    let txt = render_plaintext(&rows, run_date);
    save_digest(cfg, &md, &txt, run_date)?;

    // 4. Push. All channels failing errors out here so the run is recorded
    // as failed, not completed.
    let sent = push::push_digest(cfg, ledger, &md, &txt, run_date).await?;
    if !sent.is_empty() {
        info!(channels = ?sent, "digest pushed");
    } else if !cfg.channels().is_empty() {
        info!("all configured channels already sent for this date");
    } else {
        info!("no push channels configured, digest rendered only");
    }
    Ok(())
}

/// Fetch papers and store them, nothing else.
pub async fn fetch_only(cfg: &Settings) -> Result<()> {
    let store = Store::open(cfg.db_full_path())?;
    let papers = fetch::fetch_papers(cfg).await?;
    let inserted = store.insert_papers(&papers)?;
    info!(fetched = papers.len(), inserted, "fetch complete");
    Ok(())
}

/// Summarize every unsummarized paper in the store.
pub async fn summarize_only(cfg: &Settings) -> Result<()> {
    let store = Arc::new(Store::open(cfg.db_full_path())?);
    let summarizer = Summarizer::from_settings(cfg, Arc::clone(&store))?;
    let outcome = summarizer.summarize_all_pending().await?;
    info!(
        succeeded = outcome.succeeded,
        fallback = outcome.fallback,
        failed = outcome.failed,
        "summarize complete"
    );
    Ok(())
}

/// Render and push the digest for `run_date` without fetching or
/// summarizing.
pub async fn send(cfg: &Settings, run_date: &str) -> Result<()> {
    let store = Arc::new(Store::open(cfg.db_full_path())?);
    let ledger = RunLedger::new(Arc::clone(&store));

    let rows = store.papers_for_date(run_date)?;
    if rows.is_empty() {
        warn!(date = run_date, "no papers stored for this date");
        return Ok(());
    }

    let md = render_markdown(&rows, run_date);
    let txt = render_plaintext(&rows, run_date);
    save_digest(cfg, &md, &txt, run_date)?;

    let sent = push::push_digest(cfg, &ledger, &md, &txt, run_date).await?;
    if sent.is_empty() {
        info!("nothing newly sent, all channels already delivered");
    }
    Ok(())
}

fn save_digest(cfg: &Settings, md: &str, txt: &str, run_date: &str) -> Result<()> {
    let db_path = cfg.db_full_path();
    let out_dir = match db_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let md_path = out_dir.join(format!("digest-{run_date}.md"));
    let txt_path = out_dir.join(format!("digest-{run_date}.txt"));
    std::fs::write(&md_path, md).with_context(|| format!("writing {}", md_path.display()))?;
    std::fs::write(&txt_path, txt).with_context(|| format!("writing {}", txt_path.display()))?;
    info!(md = %md_path.display(), txt = %txt_path.display(), "digest saved");
    Ok(())
}
