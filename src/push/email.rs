// src/push/email.rs
// SMTP delivery of the digest, multipart plain + HTML.

use anyhow::{Context, Result};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Settings;

fn build_mailer(cfg: &Settings) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    // Port 465 means implicit TLS; anything else goes through STARTTLS.
    let builder = if cfg.smtp_port == 465 {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
    }
    .context("invalid SMTP host")?
    .port(cfg.smtp_port);

    let builder = if !cfg.smtp_user.is_empty() {
        builder.credentials(Credentials::new(cfg.smtp_user.clone(), cfg.smtp_pass.clone()))
    } else {
        builder
    };
    Ok(builder.build())
}

pub async fn send_email(
    cfg: &Settings,
    subject: &str,
    body_html: &str,
    body_text: &str,
) -> Result<()> {
    let from: Mailbox = cfg.email_from.parse().context("invalid EMAIL_FROM")?;
    let mut builder = Message::builder().from(from).subject(subject);
    for addr in cfg.email_to.split(',') {
        let addr = addr.trim();
        if addr.is_empty() {
            continue;
        }
        let to: Mailbox = addr.parse().with_context(|| format!("invalid recipient {addr}"))?;
        builder = builder.to(to);
    }

    let msg = builder
        .multipart(MultiPart::alternative_plain_html(
            body_text.to_string(),
            body_html.to_string(),
        ))
        .context("build email")?;

    let mailer = build_mailer(cfg)?;
    mailer.send(msg).await.context("send email")?;
    Ok(())
}

/// Connectivity probe used by `doctor`.
pub async fn check_smtp(cfg: &Settings) -> Result<()> {
    let mailer = build_mailer(cfg)?;
    let ok = mailer.test_connection().await.context("SMTP connection")?;
    anyhow::ensure!(ok, "SMTP server rejected the connection");
    Ok(())
}
