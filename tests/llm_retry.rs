// tests/llm_retry.rs
// Retry + parse behavior of the summarization client, driven by a scripted
// transport. Paused tokio time makes the backoff sleeps instantaneous.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use arxiv_digest::llm::{ChatRequest, ChatTransport, LlmError, LlmSummaryClient, SummaryClient};
use arxiv_digest::retry::RetryPolicy;
use arxiv_digest::store::Paper;

const VALID_JSON: &str =
    r#"{"summary":"总结","contributions":"贡献","novelty":"新","audience":"读者"}"#;

fn paper() -> Paper {
    Paper {
        arxiv_id: "2401.00001".to_string(),
        title: "A Paper".to_string(),
        authors: "A. Author".to_string(),
        category: "cs.CL".to_string(),
        published_at: "2024-01-01T00:00:00Z".to_string(),
        updated_at: String::new(),
        abs_url: String::new(),
        pdf_url: String::new(),
        abstract_text: "An abstract.".to_string(),
        fetched_at: String::new(),
    }
}

#[derive(Clone)]
enum Step {
    Content(&'static str),
    Http500,
}

struct ScriptedTransport {
    steps: Mutex<Vec<Step>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    /// Steps are consumed in order; the last one repeats forever.
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        let steps = self.steps.lock().unwrap();
        let step = steps[i.min(steps.len() - 1)].clone();
        match step {
            Step::Content(s) => Ok(s.to_string()),
            Step::Http500 => Err(LlmError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR)),
        }
    }
}

fn client(steps: Vec<Step>) -> LlmSummaryClient<ScriptedTransport> {
    LlmSummaryClient::new(ScriptedTransport::new(steps), "test-model", RetryPolicy::new(3, 2.0))
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover_on_third_attempt() {
    let client = client(vec![Step::Http500, Step::Http500, Step::Content(VALID_JSON)]);
    let summary = client.summarize(&paper()).await.expect("succeeds");
    assert_eq!(summary.get("summary"), "总结");
    assert!(!summary.is_fallback());
    assert_eq!(client.transport().calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_output_on_every_attempt_degrades_to_sentinel() {
    let client = client(vec![Step::Content("not json at all")]);
    let summary = client.summarize(&paper()).await.expect("never errs on content");
    assert!(summary.is_fallback());
    // one call per attempt, no more
    assert_eq!(client.transport().calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn fenced_output_is_repaired_without_retrying() {
    const FENCED: &str = "```json\n{\"summary\":\"总结\",\"contributions\":\"贡献\",\
                          \"novelty\":\"新\",\"audience\":\"读者\"}\n```";
    let client = client(vec![Step::Content(FENCED)]);
    let summary = client.summarize(&paper()).await.unwrap();
    assert_eq!(summary.get("audience"), "读者");
    assert_eq!(client.transport().calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_exhaustion_propagates_as_error() {
    let client = client(vec![Step::Http500]);
    let err = client.summarize(&paper()).await.unwrap_err();
    match err {
        LlmError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected Exhausted, got {other}"),
    }
    assert_eq!(client.transport().calls(), 3);
}
