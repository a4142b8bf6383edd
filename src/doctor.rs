// src/doctor.rs
// Configuration echo and connectivity probes for operators. Each probe is
// independent; the command exits non-zero if any fails.

use anyhow::Result;
use std::time::Duration;

use crate::config::Settings;
use crate::fetch::ARXIV_API_URL;
use crate::llm;
use crate::push::{email, qq, telegram};
use crate::store::Store;

pub async fn run(cfg: &Settings) -> Result<()> {
    let mut ok = true;

    println!("=== Configuration ===");
    println!("  Categories: {:?}", cfg.categories());
    println!("  Max papers/day: {}", cfg.max_papers_per_day);
    println!("  Time window: {}h", cfg.time_window_hours);
    println!("  LLM URL: {}", cfg.llm_url);
    println!("  LLM model: {}", cfg.llm_model);
    println!("  DB path: {}", cfg.db_full_path().display());
    println!("  Push channels: {:?}", cfg.channels());
    println!("  Schedule: {}", cfg.schedule_time);
    println!();

    println!("=== Connectivity ===");
    match probe_arxiv().await {
        Ok(()) => println!("  [OK] arXiv API reachable"),
        Err(e) => {
            println!("  [FAIL] arXiv API: {e:#}");
            ok = false;
        }
    }

    if cfg.llm_url.is_empty() {
        println!("  [SKIP] LLM endpoint not configured");
    } else {
        match llm::check_health(cfg).await {
            Ok(()) => println!("  [OK] LLM endpoint reachable"),
            Err(e) => {
                println!("  [FAIL] LLM endpoint: {e:#}");
                ok = false;
            }
        }
    }

    match Store::open(cfg.db_full_path()) {
        Ok(_) => println!("  [OK] database writable at {}", cfg.db_full_path().display()),
        Err(e) => {
            println!("  [FAIL] database: {e}");
            ok = false;
        }
    }

    if cfg.email_configured() {
        match email::check_smtp(cfg).await {
            Ok(()) => println!("  [OK] SMTP reachable"),
            Err(e) => {
                println!("  [FAIL] SMTP: {e:#}");
                ok = false;
            }
        }
    } else {
        println!("  [SKIP] email not configured");
    }

    if cfg.telegram_configured() {
        match telegram::check_bot(cfg).await {
            Ok(()) => println!("  [OK] Telegram bot reachable"),
            Err(e) => {
                println!("  [FAIL] Telegram: {e:#}");
                ok = false;
            }
        }
    } else {
        println!("  [SKIP] Telegram not configured");
    }

    if cfg.qq_configured() {
        match qq::check_bot(cfg).await {
            Ok(()) => println!("  [OK] QQ bot (OneBot) reachable"),
            Err(e) => {
                println!("  [FAIL] QQ bot: {e:#}");
                ok = false;
            }
        }
    } else {
        println!("  [SKIP] QQ not configured");
    }

    println!();
    anyhow::ensure!(ok, "some checks failed");
    println!("All checks passed.");
    Ok(())
}

async fn probe_arxiv() -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    client
        .get(ARXIV_API_URL)
        .query(&[("search_query", "cat:cs.AI"), ("max_results", "1")])
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
