// src/push/mod.rs
// Digest delivery. Each configured channel is checked against the run
// ledger before sending and recorded after a successful send, so reruns
// never deliver the same digest twice on the same channel. A channel
// failure never blocks the remaining channels, but a push where every
// attempted channel failed (and none was delivered earlier) is an error so
// the run is not recorded as completed.

pub mod email;
pub mod qq;
pub mod telegram;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::config::Settings;
use crate::ledger::RunLedger;
use crate::render::markdown_to_simple_html;

/// Per-channel bookkeeping of one push pass.
#[derive(Debug, Default, PartialEq, Eq)]
struct PushTally {
    sent: Vec<String>,
    already_sent: usize,
    failed: usize,
}

impl PushTally {
    /// The digest counts as delivered if any channel got it, now or in an
    /// earlier run. Nothing delivered and at least one failure is an error.
    fn into_result(self) -> Result<Vec<String>> {
        if self.sent.is_empty() && self.already_sent == 0 && self.failed > 0 {
            bail!("all push channels failed ({})", self.failed);
        }
        Ok(self.sent)
    }
}

/// Push the rendered digest through all configured channels that have not
/// been notified yet for `run_date`. Returns the channels newly sent.
pub async fn push_digest(
    cfg: &Settings,
    ledger: &RunLedger,
    markdown: &str,
    plaintext: &str,
    run_date: &str,
) -> Result<Vec<String>> {
    let channels = cfg.channels();
    if channels.is_empty() {
        info!("no push channels configured, skipping push");
        return Ok(Vec::new());
    }

    let mut tally = PushTally::default();
    for channel in channels {
        if ledger.was_sent(run_date, &channel)? {
            info!(channel, "already sent for this date, skipping");
            tally.already_sent += 1;
            continue;
        }

        let outcome = match channel.as_str() {
            "email" => {
                if !cfg.email_configured() {
                    warn!("email channel requested but not configured");
                    continue;
                }
                let subject = format!("arXiv Digest {run_date}");
                let html = markdown_to_simple_html(markdown);
                email::send_email(cfg, &subject, &html, plaintext).await
            }
            "telegram" => {
                if !cfg.telegram_configured() {
                    warn!("telegram channel requested but not configured");
                    continue;
                }
                telegram::send_telegram(cfg, markdown).await
            }
            "qq" => {
                if !cfg.qq_configured() {
                    warn!("qq channel requested but not configured");
                    continue;
                }
                qq::send_qq(cfg, plaintext).await
            }
            other => {
                warn!(channel = other, "unknown push channel");
                continue;
            }
        };

        match outcome {
            Ok(()) => {
                ledger.mark_sent(run_date, &[&channel])?;
                info!(channel, "digest sent");
                tally.sent.push(channel);
            }
            Err(e) => {
                // One channel failing must not block the others.
                warn!(channel, error = %e, "push failed");
                tally.failed += 1;
            }
        }
    }
    tally.into_result()
}
