// src/push/qq.rs
// QQ group delivery through a OneBot v11 HTTP endpoint. The digest goes out
// as plaintext; long digests are split on paper boundaries so each message
// stays under the QQ length limit.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Settings;
use crate::retry::RetryPolicy;

pub const MAX_MESSAGE_LENGTH: usize = 3000;
// Minimum chunk size before a paper boundary is taken as a split point.
const MIN_SPLIT_LENGTH: usize = 500;
const FLOOD_DELAY: Duration = Duration::from_secs(1);

pub async fn send_qq(cfg: &Settings, plaintext: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let retry = RetryPolicy::new(3, 2.0);

    let chunks = split_digest(plaintext, MAX_MESSAGE_LENGTH);
    info!(segments = chunks.len(), "sending digest to QQ group");
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(FLOOD_DELAY).await;
        }
        send_group_msg_with_retry(&client, cfg, chunk, &retry).await?;
    }
    Ok(())
}

async fn send_group_msg_with_retry(
    client: &reqwest::Client,
    cfg: &Settings,
    text: &str,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 1u32;
    loop {
        match send_group_msg(client, cfg, text).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if !retry.should_retry(attempt) {
                    return Err(e);
                }
                warn!(attempt, error = %e, "QQ send failed, backing off");
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

async fn send_group_msg(client: &reqwest::Client, cfg: &Settings, text: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct ApiResp {
        retcode: i64,
        #[serde(default)]
        msg: Option<String>,
    }

    let group_id: i64 = cfg
        .qq_group_id
        .trim()
        .parse()
        .context("QQ_GROUP_ID is not numeric")?;
    let url = format!("{}/send_group_msg", cfg.qq_bot_api.trim_end_matches('/'));

    let mut req = client.post(&url).json(&json!({
        "group_id": group_id,
        "message": text,
    }));
    if !cfg.qq_bot_token.is_empty() {
        req = req.bearer_auth(&cfg.qq_bot_token);
    }

    let resp = req
        .send()
        .await
        .context("OneBot request")?
        .error_for_status()
        .context("OneBot status")?;

    let body: ApiResp = resp.json().await.context("OneBot response body")?;
    if body.retcode != 0 {
        bail!(
            "OneBot API error (retcode {}): {}",
            body.retcode,
            body.msg.unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(())
}

/// Endpoint probe used by `doctor`.
pub async fn check_bot(cfg: &Settings) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let url = format!("{}/get_status", cfg.qq_bot_api.trim_end_matches('/'));
    let mut req = client.post(&url).json(&json!({}));
    if !cfg.qq_bot_token.is_empty() {
        req = req.bearer_auth(&cfg.qq_bot_token);
    }
    req.send()
        .await
        .context("OneBot get_status")?
        .error_for_status()
        .context("OneBot get_status status")?;
    Ok(())
}

/// Split the plaintext digest into chunks of at most `max_len` characters.
/// Once a chunk has grown past the minimum split size, a line opening a new
/// paper entry ("N. Title") starts the next chunk; otherwise the split
/// happens wherever the length limit forces it.
pub fn split_digest(plaintext: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut chunk = String::new();

    for line in plaintext.split('\n') {
        let line_len = line.chars().count();
        let chunk_len = chunk.chars().count();
        if is_paper_boundary(line) && chunk_len > MIN_SPLIT_LENGTH {
            chunks.push(std::mem::take(&mut chunk).trim().to_string());
            chunk.push_str(line);
            chunk.push('\n');
        } else if chunk_len + line_len + 1 > max_len {
            if !chunk.is_empty() {
                chunks.push(std::mem::take(&mut chunk).trim().to_string());
            }
            chunk.push_str(line);
            chunk.push('\n');
        } else {
            chunk.push_str(line);
            chunk.push('\n');
        }
    }
    if !chunk.trim().is_empty() {
        chunks.push(chunk.trim().to_string());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

fn is_paper_boundary(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
        && trimmed.contains(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_digest_is_one_chunk() {
        let text = "arXiv Daily\n1. Paper One\n   摘要: short";
        let chunks = split_digest(text, MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Paper One"));
    }

    #[test]
    fn long_digest_splits_and_preserves_content() {
        let mut papers = Vec::new();
        for i in 1..20 {
            papers.push(format!(
                "{i}. Paper Title {i}\n   arXiv: 2401.{i:05}\n   摘要: {}\n",
                "x".repeat(200)
            ));
        }
        let text = format!("arXiv Daily\n=====\n\n{}", papers.join("\n"));
        let chunks = split_digest(&text, MAX_MESSAGE_LENGTH);
        assert!(chunks.len() > 1);
        let combined = chunks.join("\n");
        assert!(combined.contains("Paper Title 1"));
        assert!(combined.contains("Paper Title 19"));
    }

    #[test]
    fn chunks_respect_max_length() {
        let mut papers = Vec::new();
        for i in 1..30 {
            papers.push(format!("{i}. Paper {i}\n   {}\n", "content ".repeat(50)));
        }
        let chunks = split_digest(&papers.join("\n"), MAX_MESSAGE_LENGTH);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= MAX_MESSAGE_LENGTH);
        }
    }

    #[test]
    fn splits_prefer_paper_boundaries() {
        let first = format!("1. First paper\n   {}\n", "a".repeat(600));
        let text = format!("{first}2. Second paper\n   details");
        let chunks = split_digest(&text, MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("2. Second paper"));
    }
}
