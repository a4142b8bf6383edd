// src/config.rs
// Immutable application settings, built once at startup and threaded into
// each component's constructor. Sources, highest precedence first:
//   1) process environment (after dotenvy loaded `.env`)
//   2) optional TOML file ($DIGEST_CONFIG or config/digest.toml)
//   3) built-in defaults

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    // arXiv fetch
    pub arxiv_categories: String,
    pub arxiv_include_keywords: String,
    pub arxiv_exclude_keywords: String,
    pub max_papers_per_day: usize,
    pub time_window_hours: i64,

    // LLM endpoint (chat completions style)
    pub llm_url: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub llm_max_concurrency: usize,
    pub llm_rate_limit_rpm: usize,
    pub llm_timeout_secs: u64,
    pub llm_max_attempts: u32,
    pub llm_backoff_base_secs: f64,

    // Database
    pub db_path: String,

    // Email (SMTP)
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub email_from: String,
    pub email_to: String,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,

    // QQ group (OneBot v11 HTTP API)
    pub qq_bot_api: String,
    pub qq_group_id: String,
    pub qq_bot_token: String,

    // Push
    pub push_channels: String,

    // Scheduler, local time "HH:MM"
    pub schedule_time: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            arxiv_categories: "cs.CL,cs.AI".to_string(),
            arxiv_include_keywords: String::new(),
            arxiv_exclude_keywords: String::new(),
            max_papers_per_day: 50,
            time_window_hours: 72,

            llm_url: String::new(),
            llm_model: String::new(),
            llm_api_key: String::new(),
            llm_max_concurrency: 4,
            llm_rate_limit_rpm: 30,
            llm_timeout_secs: 120,
            llm_max_attempts: 3,
            llm_backoff_base_secs: 2.0,

            db_path: "data/digest.db".to_string(),

            smtp_host: String::new(),
            smtp_port: 587,
            smtp_user: String::new(),
            smtp_pass: String::new(),
            email_from: String::new(),
            email_to: String::new(),

            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),

            qq_bot_api: String::new(),
            qq_group_id: String::new(),
            qq_bot_token: String::new(),

            push_channels: String::new(),

            schedule_time: "08:30".to_string(),
        }
    }
}

impl Settings {
    /// Load settings using file + env fallbacks:
    /// 1) $DIGEST_CONFIG
    /// 2) config/digest.toml
    /// 3) defaults
    /// then apply environment overrides and sanitize ranges.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            Self::from_toml_file(Path::new(&p))?
        } else {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Self::from_toml_file(&default)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: Settings =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        env_str("ARXIV_CATEGORIES", &mut self.arxiv_categories);
        env_str("ARXIV_INCLUDE_KEYWORDS", &mut self.arxiv_include_keywords);
        env_str("ARXIV_EXCLUDE_KEYWORDS", &mut self.arxiv_exclude_keywords);
        env_parse("MAX_PAPERS_PER_DAY", &mut self.max_papers_per_day);
        env_parse("TIME_WINDOW_HOURS", &mut self.time_window_hours);

        env_str("LLM_URL", &mut self.llm_url);
        env_str("LLM_MODEL", &mut self.llm_model);
        env_str("LLM_API_KEY", &mut self.llm_api_key);
        env_parse("LLM_MAX_CONCURRENCY", &mut self.llm_max_concurrency);
        env_parse("LLM_RATE_LIMIT_RPM", &mut self.llm_rate_limit_rpm);
        env_parse("LLM_TIMEOUT_SECS", &mut self.llm_timeout_secs);
        env_parse("LLM_MAX_ATTEMPTS", &mut self.llm_max_attempts);
        env_parse("LLM_BACKOFF_BASE_SECS", &mut self.llm_backoff_base_secs);

        env_str("DIGEST_DB_PATH", &mut self.db_path);

        env_str("SMTP_HOST", &mut self.smtp_host);
        env_parse("SMTP_PORT", &mut self.smtp_port);
        env_str("SMTP_USER", &mut self.smtp_user);
        env_str("SMTP_PASS", &mut self.smtp_pass);
        env_str("EMAIL_FROM", &mut self.email_from);
        env_str("EMAIL_TO", &mut self.email_to);

        env_str("TELEGRAM_BOT_TOKEN", &mut self.telegram_bot_token);
        env_str("TELEGRAM_CHAT_ID", &mut self.telegram_chat_id);

        env_str("QQ_BOT_API", &mut self.qq_bot_api);
        env_str("QQ_GROUP_ID", &mut self.qq_group_id);
        env_str("QQ_BOT_TOKEN", &mut self.qq_bot_token);

        env_str("PUSH_CHANNELS", &mut self.push_channels);
        env_str("SCHEDULE_TIME", &mut self.schedule_time);
    }

    /// Clamp numeric knobs to sane intervals (invalid input falls back, it
    /// never aborts startup).
    fn sanitize(&mut self) {
        self.max_papers_per_day = self.max_papers_per_day.clamp(1, 500);
        self.time_window_hours = self.time_window_hours.clamp(1, 168);
        self.llm_max_concurrency = self.llm_max_concurrency.clamp(1, 32);
        self.llm_rate_limit_rpm = self.llm_rate_limit_rpm.clamp(1, 600);
        self.llm_max_attempts = self.llm_max_attempts.clamp(1, 10);
        if !(0.1..=60.0).contains(&self.llm_backoff_base_secs) {
            self.llm_backoff_base_secs = 2.0;
        }
    }

    // -- derived views --

    pub fn categories(&self) -> Vec<String> {
        split_list(&self.arxiv_categories)
    }

    pub fn include_keywords(&self) -> Vec<String> {
        split_list(&self.arxiv_include_keywords)
    }

    pub fn exclude_keywords(&self) -> Vec<String> {
        split_list(&self.arxiv_exclude_keywords)
    }

    pub fn channels(&self) -> Vec<String> {
        split_list(&self.push_channels)
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }

    pub fn db_full_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    pub fn email_configured(&self) -> bool {
        !self.smtp_host.is_empty() && !self.email_from.is_empty() && !self.email_to.is_empty()
    }

    pub fn telegram_configured(&self) -> bool {
        !self.telegram_bot_token.is_empty() && !self.telegram_chat_id.is_empty()
    }

    pub fn qq_configured(&self) -> bool {
        !self.qq_bot_api.is_empty() && !self.qq_group_id.is_empty()
    }

    /// Parse `schedule_time` ("HH:MM") into (hour, minute).
    pub fn schedule_hm(&self) -> Result<(u32, u32)> {
        let (h, m) = self
            .schedule_time
            .split_once(':')
            .with_context(|| format!("invalid schedule_time: {}", self.schedule_time))?;
        let hour: u32 = h.trim().parse().context("schedule hour")?;
        let minute: u32 = m.trim().parse().context("schedule minute")?;
        anyhow::ensure!(
            hour < 24 && minute < 60,
            "schedule_time out of range: {}",
            self.schedule_time
        );
        Ok((hour, minute))
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn env_str(key: &str, target: &mut String) {
    if let Ok(v) = std::env::var(key) {
        *target = v;
    }
}

fn env_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.trim().parse::<T>() {
            *target = parsed;
        }
    }
}
