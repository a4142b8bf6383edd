// src/llm.rs
// Summarization client for an OpenAI-compatible chat completions endpoint.
// Transport (one HTTP POST per attempt) is split from the retry + parse
// logic so the retry loop and the repair chain can be exercised with a
// scripted transport in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::retry::RetryPolicy;
use crate::store::Paper;
use crate::summary::{parse_summary, StructuredSummary, REQUIRED_FIELDS, UNKNOWN};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("llm response had no choices")]
    NoChoices,
    #[error("llm output not parseable as a structured summary: {0}")]
    Malformed(String),
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One chat completion round-trip; returns the assistant message content.
/// Implemented over HTTP in production, scripted in tests.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// The seam the orchestrator depends on: one structured summary per paper.
/// Errs only for exhausted-retry transport failures; content-quality
/// problems come back as the sentinel fallback summary.
#[async_trait]
pub trait SummaryClient: Send + Sync {
    async fn summarize(&self, paper: &Paper) -> Result<StructuredSummary, LlmError>;
}

// ------------------------------------------------------------
// HTTP transport
// ------------------------------------------------------------

pub struct HttpChatTransport {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpChatTransport {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!url.is_empty(), "LLM endpoint URL is not configured");
        let http = reqwest::Client::builder()
            .user_agent("arxiv-digest/0.1 (+https://github.com)")
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let mut req = self.http.post(&self.url).json(request);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(LlmError::Status(resp.status()));
        }
        let body: Resp = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::NoChoices)
    }
}

// ------------------------------------------------------------
// Prompt
// ------------------------------------------------------------

const SUMMARIZE_PROMPT: &str = "\
You are an expert AI research assistant. Given the following arXiv paper \
metadata, produce a structured summary in Simplified Chinese.

**Paper:**
- Title: {title}
- Authors: {authors}
- Category: {category}
- Abstract: {abstract}

**Instructions:**
1. Output ONLY a valid JSON object with exactly these string fields \
(no extra text before or after): {fields}.
2. \"summary\": one-paragraph summary; \"contributions\": the key \
contributions; \"novelty\": how novel the work is; \"audience\": who should \
read this paper. All values in Simplified Chinese.
3. If any information is not available from the abstract, use \"unknown\" \
for that field.
4. Do NOT hallucinate details not present in the abstract.

Output the JSON now:";

pub fn build_prompt(paper: &Paper) -> String {
    let fields = REQUIRED_FIELDS
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(", ");
    SUMMARIZE_PROMPT
        .replace("{title}", &paper.title)
        .replace("{authors}", &paper.authors)
        .replace("{category}", &paper.category)
        .replace("{abstract}", &paper.abstract_text)
        .replace("{fields}", &fields)
}

// ------------------------------------------------------------
// Retrying client
// ------------------------------------------------------------

/// Wraps a transport with the bounded retry loop and the parse chain.
/// Each attempt moves through {Attempting(n), Succeeded, FailedExhausted};
/// the backoff between attempts is `RetryPolicy::delay_for`, a pure function
/// of the attempt number.
pub struct LlmSummaryClient<T: ChatTransport> {
    transport: T,
    model: String,
    retry: RetryPolicy,
}

pub type HttpSummaryClient = LlmSummaryClient<HttpChatTransport>;

impl HttpSummaryClient {
    pub fn from_settings(cfg: &Settings) -> anyhow::Result<Self> {
        let transport = HttpChatTransport::new(
            &cfg.llm_url,
            &cfg.llm_api_key,
            Duration::from_secs(cfg.llm_timeout_secs),
        )?;
        Ok(Self::new(
            transport,
            &cfg.llm_model,
            RetryPolicy::new(cfg.llm_max_attempts, cfg.llm_backoff_base_secs),
        ))
    }
}

impl<T: ChatTransport> LlmSummaryClient<T> {
    pub fn new(transport: T, model: &str, retry: RetryPolicy) -> Self {
        Self {
            transport,
            model: model.to_string(),
            retry,
        }
    }

    /// Access to the underlying transport, useful for instrumented fakes.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn attempt(&self, request: &ChatRequest) -> Result<StructuredSummary, LlmError> {
        let content = self.transport.complete(request).await?;
        parse_summary(&content).ok_or_else(|| {
            let snippet: String = content.chars().take(200).collect();
            LlmError::Malformed(snippet)
        })
    }
}

#[async_trait]
impl<T: ChatTransport> SummaryClient for LlmSummaryClient<T> {
    async fn summarize(&self, paper: &Paper) -> Result<StructuredSummary, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: build_prompt(paper),
            }],
            temperature: 0.1,
            max_tokens: 4096,
        };

        let mut attempt = 1u32;
        loop {
            match self.attempt(&request).await {
                Ok(summary) => return Ok(summary),
                Err(err) => {
                    if self.retry.should_retry(attempt) {
                        let delay = self.retry.delay_for(attempt);
                        debug!(
                            paper = %paper.arxiv_id,
                            attempt,
                            delay_secs = delay.as_secs_f64(),
                            error = %err,
                            "summarize attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    // Budget exhausted. Content-quality failures degrade to
                    // the sentinel summary so the caller never sees them as
                    // errors; transport failures propagate.
                    return match err {
                        LlmError::Malformed(_) => {
                            warn!(
                                paper = %paper.arxiv_id,
                                attempts = attempt,
                                "unparseable output on every attempt, storing {UNKNOWN} sentinel"
                            );
                            Ok(StructuredSummary::fallback())
                        }
                        other => Err(LlmError::Exhausted {
                            attempts: attempt,
                            last: other.to_string(),
                        }),
                    };
                }
            }
        }
    }
}

/// Quick endpoint probe used by `doctor`.
pub async fn check_health(cfg: &Settings) -> anyhow::Result<()> {
    let transport = HttpChatTransport::new(
        &cfg.llm_url,
        &cfg.llm_api_key,
        Duration::from_secs(15),
    )?;
    let request = ChatRequest {
        model: cfg.llm_model.clone(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: "Reply with exactly: ok".to_string(),
        }],
        temperature: 0.0,
        max_tokens: 10,
    };
    let reply = transport.complete(&request).await?;
    anyhow::ensure!(!reply.trim().is_empty(), "LLM returned an empty reply");
    Ok(())
}
