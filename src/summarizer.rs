// src/summarizer.rs
// Summarization orchestrator: selects papers without a summary, dispatches
// them concurrently through the gate and client, and persists each result.
// A paper summarized once (for real or via the sentinel fallback) is never
// submitted to the LLM again; pending simply means "no summary row yet".

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::gate::Gate;
use crate::llm::{HttpSummaryClient, SummaryClient};
use crate::store::{Paper, Store, StoreError};

/// Aggregate outcome of one `summarize_pending` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub succeeded: usize,
    pub fallback: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
}

impl RunOutcome {
    pub fn total(&self) -> usize {
        self.succeeded + self.fallback + self.failed
    }
}

enum PaperResult {
    Succeeded,
    Fallback,
    Failed(String),
}

pub struct Summarizer {
    store: Arc<Store>,
    client: Arc<dyn SummaryClient>,
    gate: Arc<Gate>,
}

impl Summarizer {
    pub fn new(store: Arc<Store>, client: Arc<dyn SummaryClient>, gate: Arc<Gate>) -> Self {
        Self {
            store,
            client,
            gate,
        }
    }

    /// Build the production summarizer. Fails if the LLM endpoint is not
    /// configured (a configuration error is fatal to the run).
    pub fn from_settings(cfg: &Settings, store: Arc<Store>) -> anyhow::Result<Self> {
        let client = Arc::new(HttpSummaryClient::from_settings(cfg)?);
        let gate = Arc::new(Gate::new(cfg.llm_max_concurrency, cfg.llm_rate_limit_rpm));
        Ok(Self::new(store, client, gate))
    }

    /// Summarize every paper fetched on `date` that has no summary row.
    pub async fn summarize_pending(&self, date: &str) -> anyhow::Result<RunOutcome> {
        let pending = self.store.pending_papers_for_date(date)?;
        self.summarize_batch(pending).await
    }

    /// Summarize every unsummarized paper regardless of fetch date.
    pub async fn summarize_all_pending(&self) -> anyhow::Result<RunOutcome> {
        let pending = self.store.pending_papers()?;
        self.summarize_batch(pending).await
    }

    async fn summarize_batch(&self, pending: Vec<Paper>) -> anyhow::Result<RunOutcome> {
        if pending.is_empty() {
            info!("no pending papers to summarize");
            return Ok(RunOutcome::default());
        }
        info!(count = pending.len(), "summarizing pending papers");

        // JoinSet so that dropping this future (batch cancelled) aborts the
        // in-flight per-paper tasks instead of leaving them running detached.
        let mut tasks = JoinSet::new();
        for paper in pending {
            let store = Arc::clone(&self.store);
            let client = Arc::clone(&self.client);
            let gate = Arc::clone(&self.gate);
            tasks.spawn(async move {
                let _permit = gate.acquire().await;
                summarize_one(store.as_ref(), client.as_ref(), &paper).await
            });
        }

        let mut outcome = RunOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(PaperResult::Succeeded) => outcome.succeeded += 1,
                Ok(PaperResult::Fallback) => outcome.fallback += 1,
                Ok(PaperResult::Failed(id)) => {
                    outcome.failed += 1;
                    outcome.failed_ids.push(id);
                }
                Err(join_err) => {
                    // A panicking task loses its paper for this run; the
                    // paper stays pending and is retried on the next run.
                    error!(error = %join_err, "summarization task panicked");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            succeeded = outcome.succeeded,
            fallback = outcome.fallback,
            failed = outcome.failed,
            "summarization finished"
        );
        Ok(outcome)
    }
}

/// Summarize and persist a single paper. Per-paper failures are isolated
/// here; nothing escapes to abort the batch.
async fn summarize_one(
    store: &Store,
    client: &dyn SummaryClient,
    paper: &Paper,
) -> PaperResult {
    let summary = match client.summarize(paper).await {
        Ok(summary) => summary,
        Err(err) => {
            warn!(paper = %paper.arxiv_id, error = %err, "summarization failed, will retry next run");
            return PaperResult::Failed(paper.arxiv_id.clone());
        }
    };

    let is_fallback = summary.is_fallback();
    match store.insert_summary(&paper.arxiv_id, &summary) {
        Ok(()) => {
            info!(paper = %paper.arxiv_id, fallback = is_fallback, "summary stored");
            if is_fallback {
                PaperResult::Fallback
            } else {
                PaperResult::Succeeded
            }
        }
        // Another task (or an earlier run) already wrote this summary.
        Err(StoreError::DuplicateSummary(_)) => PaperResult::Succeeded,
        Err(err) => {
            error!(paper = %paper.arxiv_id, error = %err, "failed to persist summary");
            PaperResult::Failed(paper.arxiv_id.clone())
        }
    }
}
