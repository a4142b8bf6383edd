// src/push/telegram.rs
// Telegram bot delivery. Messages above the API limit are split on section
// separators so each chunk stays renderable Markdown.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::config::Settings;
use crate::retry::RetryPolicy;

const TELEGRAM_API: &str = "https://api.telegram.org";
pub const MAX_MESSAGE_LENGTH: usize = 4096;
const SECTION_SEPARATOR: &str = "\n---\n";

pub async fn send_telegram(cfg: &Settings, markdown: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let retry = RetryPolicy::new(3, 2.0);

    for chunk in chunk_markdown(markdown, MAX_MESSAGE_LENGTH) {
        send_message_with_retry(&client, cfg, &chunk, &retry).await?;
    }
    Ok(())
}

async fn send_message_with_retry(
    client: &reqwest::Client,
    cfg: &Settings,
    text: &str,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 1u32;
    loop {
        match send_message(client, cfg, text).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if !retry.should_retry(attempt) {
                    return Err(e);
                }
                warn!(attempt, error = %e, "telegram send failed, backing off");
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

async fn send_message(client: &reqwest::Client, cfg: &Settings, text: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct ApiResp {
        ok: bool,
        #[serde(default)]
        description: Option<String>,
    }

    let url = format!(
        "{TELEGRAM_API}/bot{}/sendMessage",
        cfg.telegram_bot_token
    );
    let resp = client
        .post(&url)
        .json(&json!({
            "chat_id": cfg.telegram_chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        }))
        .send()
        .await
        .context("telegram request")?
        .error_for_status()
        .context("telegram status")?;

    let body: ApiResp = resp.json().await.context("telegram response body")?;
    if !body.ok {
        bail!(
            "telegram API error: {}",
            body.description.unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(())
}

/// Bot API probe used by `doctor`.
pub async fn check_bot(cfg: &Settings) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let url = format!("{TELEGRAM_API}/bot{}/getMe", cfg.telegram_bot_token);
    client
        .get(&url)
        .send()
        .await
        .context("telegram getMe")?
        .error_for_status()
        .context("telegram getMe status")?;
    Ok(())
}

/// Split a digest into chunks of at most `max_len` characters, preferring to
/// break on section separators. A single oversized section is split hard.
pub fn chunk_markdown(markdown: &str, max_len: usize) -> Vec<String> {
    if markdown.chars().count() <= max_len {
        return vec![markdown.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for section in markdown.split(SECTION_SEPARATOR) {
        let candidate_len = if current.is_empty() {
            section.chars().count()
        } else {
            current.chars().count() + SECTION_SEPARATOR.len() + section.chars().count()
        };

        if candidate_len > max_len {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if section.chars().count() > max_len {
                let mut rest: Vec<char> = section.chars().collect();
                while rest.len() > max_len {
                    chunks.push(rest.drain(..max_len).collect());
                }
                current = rest.into_iter().collect();
            } else {
                current = section.to_string();
            }
        } else {
            if !current.is_empty() {
                current.push_str(SECTION_SEPARATOR);
            }
            current.push_str(section);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
