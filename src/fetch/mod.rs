// src/fetch/mod.rs
// arXiv fetch stage: paged Atom API queries over the configured categories,
// then time-window and keyword filtering and the per-day cap. The arXiv API
// asks for >= 3 seconds between requests, so pages are spaced out.

pub mod atom;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Settings;
use crate::retry::RetryPolicy;
use crate::store::Paper;

pub const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";
const PAGE_SIZE: usize = 100;
const PAGE_DELAY: Duration = Duration::from_secs(4);

fn build_query(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| format!("cat:{c}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Fetch recent papers for the configured categories, filtered and capped.
pub async fn fetch_papers(cfg: &Settings) -> Result<Vec<Paper>> {
    let categories = cfg.categories();
    if categories.is_empty() {
        warn!("no arXiv categories configured");
        return Ok(Vec::new());
    }

    let query = build_query(&categories);
    // Fetch more than the cap so filtering still leaves enough.
    let fetch_limit = (cfg.max_papers_per_day * 3).min(300);
    let retry = RetryPolicy::new(5, 5.0);

    let client = reqwest::Client::builder()
        .user_agent("arxiv-digest/0.1 (+https://github.com)")
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut all = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut start = 0usize;
    while start < fetch_limit {
        if start > 0 {
            tokio::time::sleep(PAGE_DELAY).await;
        }
        let batch_size = PAGE_SIZE.min(fetch_limit - start);
        let batch = match fetch_page(&client, &query, start, batch_size, &retry).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(start, error = %e, "arXiv page fetch failed, stopping pagination");
                break;
            }
        };
        if batch.is_empty() {
            break;
        }
        let got = batch.len();
        for p in batch {
            if seen.insert(p.arxiv_id.clone()) {
                all.push(p);
            }
        }
        if got < batch_size {
            break;
        }
        start += batch_size;
    }
    info!(count = all.len(), "fetched raw papers from arXiv");

    let papers = apply_time_filter(all, cfg.time_window_hours, Utc::now());
    info!(count = papers.len(), window_hours = cfg.time_window_hours, "within time window");

    let papers = apply_keyword_filter(papers, &cfg.include_keywords(), &cfg.exclude_keywords());
    info!(count = papers.len(), "after keyword filter");

    let mut papers = papers;
    papers.truncate(cfg.max_papers_per_day);
    Ok(papers)
}

async fn fetch_page(
    client: &reqwest::Client,
    query: &str,
    start: usize,
    max_results: usize,
    retry: &RetryPolicy,
) -> Result<Vec<Paper>> {
    let mut attempt = 1u32;
    loop {
        match fetch_page_once(client, query, start, max_results).await {
            Ok(batch) => return Ok(batch),
            Err(e) => {
                if !retry.should_retry(attempt) {
                    return Err(e);
                }
                let delay = retry.delay_for(attempt);
                warn!(start, attempt, error = %e, "arXiv request failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn fetch_page_once(
    client: &reqwest::Client,
    query: &str,
    start: usize,
    max_results: usize,
) -> Result<Vec<Paper>> {
    let resp = client
        .get(ARXIV_API_URL)
        .query(&[
            ("search_query", query),
            ("start", &start.to_string()),
            ("max_results", &max_results.to_string()),
            ("sortBy", "submittedDate"),
            ("sortOrder", "descending"),
        ])
        .send()
        .await
        .context("arXiv API request")?
        .error_for_status()
        .context("arXiv API status")?;
    let body = resp.text().await.context("arXiv API body")?;
    atom::parse_feed(&body)
}

/// Keep papers published within the trailing window; unparseable timestamps
/// are kept rather than silently dropped.
pub fn apply_time_filter(papers: Vec<Paper>, hours: i64, now: DateTime<Utc>) -> Vec<Paper> {
    let cutoff = now - ChronoDuration::hours(hours);
    papers
        .into_iter()
        .filter(|p| match DateTime::parse_from_rfc3339(&p.published_at) {
            Ok(ts) => ts.with_timezone(&Utc) >= cutoff,
            Err(_) => true,
        })
        .collect()
}

/// Case-insensitive substring matching over title + abstract. Exclusions win
/// over inclusions; an empty include list keeps everything.
pub fn apply_keyword_filter(
    papers: Vec<Paper>,
    include: &[String],
    exclude: &[String],
) -> Vec<Paper> {
    papers
        .into_iter()
        .filter(|p| {
            let text = format!("{} {}", p.title, p.abstract_text).to_lowercase();
            if exclude.iter().any(|kw| text.contains(&kw.to_lowercase())) {
                return false;
            }
            include.is_empty() || include.iter().any(|kw| text.contains(&kw.to_lowercase()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str, title: &str, abstract_text: &str, published_at: &str) -> Paper {
        Paper {
            arxiv_id: id.to_string(),
            title: title.to_string(),
            authors: String::new(),
            category: "cs.CL".to_string(),
            published_at: published_at.to_string(),
            updated_at: String::new(),
            abs_url: String::new(),
            pdf_url: String::new(),
            abstract_text: abstract_text.to_string(),
            fetched_at: String::new(),
        }
    }

    #[test]
    fn query_joins_categories() {
        let q = build_query(&["cs.CL".to_string(), "cs.AI".to_string()]);
        assert_eq!(q, "cat:cs.CL OR cat:cs.AI");
    }

    #[test]
    fn time_filter_keeps_recent_and_unparseable() {
        let now = "2024-01-10T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let papers = vec![
            paper("1", "a", "", "2024-01-09T12:00:00Z"),
            paper("2", "b", "", "2024-01-01T00:00:00Z"),
            paper("3", "c", "", "not-a-date"),
        ];
        let kept = apply_time_filter(papers, 72, now);
        let ids: Vec<&str> = kept.iter().map(|p| p.arxiv_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn keyword_filter_applies_exclude_then_include() {
        let papers = vec![
            paper("1", "Attention is enough", "transformer models", ""),
            paper("2", "A survey of LLM agents", "agents everywhere", ""),
            paper("3", "Protein folding", "biology", ""),
        ];
        let include = vec!["transformer".to_string(), "agents".to_string()];
        let exclude = vec!["survey".to_string()];
        let kept = apply_keyword_filter(papers, &include, &exclude);
        let ids: Vec<&str> = kept.iter().map(|p| p.arxiv_id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn empty_include_keeps_all_non_excluded() {
        let papers = vec![
            paper("1", "anything", "", ""),
            paper("2", "a survey", "", ""),
        ];
        let kept = apply_keyword_filter(papers, &[], &["survey".to_string()]);
        assert_eq!(kept.len(), 1);
    }
}
