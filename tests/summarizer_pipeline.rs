// tests/summarizer_pipeline.rs
// Orchestrator behavior against a scripted client: caching idempotence,
// fallback persistence, and per-paper failure isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use arxiv_digest::llm::{LlmError, SummaryClient};
use arxiv_digest::store::{now_iso, Paper};
use arxiv_digest::summary::{parse_summary, StructuredSummary};
use arxiv_digest::{Gate, Store, Summarizer};

const VALID_JSON: &str =
    r#"{"summary":"总结","contributions":"贡献","novelty":"新","audience":"读者"}"#;

fn paper(id: &str) -> Paper {
    Paper {
        arxiv_id: id.to_string(),
        title: format!("Paper {id}"),
        authors: "A. Author".to_string(),
        category: "cs.CL".to_string(),
        published_at: "2024-01-01T00:00:00Z".to_string(),
        updated_at: String::new(),
        abs_url: format!("https://arxiv.org/abs/{id}"),
        pdf_url: format!("https://arxiv.org/pdf/{id}"),
        abstract_text: "An abstract.".to_string(),
        fetched_at: now_iso(),
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

#[derive(Clone, Copy)]
enum Behavior {
    Valid,
    Fallback,
    Fail,
}

struct FakeClient {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl FakeClient {
    fn new(behavior: Behavior) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                behavior,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

#[async_trait]
impl SummaryClient for FakeClient {
    async fn summarize(&self, _paper: &Paper) -> Result<StructuredSummary, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Valid => Ok(parse_summary(VALID_JSON).unwrap()),
            Behavior::Fallback => Ok(StructuredSummary::fallback()),
            Behavior::Fail => Err(LlmError::Exhausted {
                attempts: 3,
                last: "connection refused".to_string(),
            }),
        }
    }
}

fn summarizer(store: Arc<Store>, client: Arc<FakeClient>) -> Summarizer {
    Summarizer::new(store, client, Arc::new(Gate::new(2, 600)))
}

#[tokio::test]
async fn valid_response_is_persisted_with_field_values() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.insert_paper(&paper("2401.00001")).unwrap();
    let (client, _calls) = FakeClient::new(Behavior::Valid);

    let outcome = summarizer(Arc::clone(&store), client)
        .summarize_pending(&today())
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.fallback, 0);
    assert_eq!(outcome.failed, 0);

    let stored = store.get_summary("2401.00001").unwrap().unwrap();
    assert_eq!(stored.get("summary"), "总结");
    assert_eq!(stored.get("contributions"), "贡献");
    assert_eq!(stored.get("novelty"), "新");
    assert_eq!(stored.get("audience"), "读者");
}

#[tokio::test]
async fn second_run_never_invokes_the_client() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    for i in 1..=3 {
        store.insert_paper(&paper(&format!("2401.0000{i}"))).unwrap();
    }

    let (client, calls) = FakeClient::new(Behavior::Valid);
    let outcome = summarizer(Arc::clone(&store), client)
        .summarize_pending(&today())
        .await
        .unwrap();
    assert_eq!(outcome.succeeded, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // All papers now have summaries; a rerun must not touch the client.
    let (client2, calls2) = FakeClient::new(Behavior::Fail);
    let outcome2 = summarizer(Arc::clone(&store), client2)
        .summarize_pending(&today())
        .await
        .unwrap();
    assert_eq!(outcome2.total(), 0);
    assert_eq!(calls2.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fallback_summary_is_persisted_and_counted() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.insert_paper(&paper("2401.00001")).unwrap();
    let (client, _) = FakeClient::new(Behavior::Fallback);

    let outcome = summarizer(Arc::clone(&store), client)
        .summarize_pending(&today())
        .await
        .unwrap();

    assert_eq!(outcome.fallback, 1);
    assert_eq!(outcome.succeeded, 0);
    let stored = store.get_summary("2401.00001").unwrap().unwrap();
    assert!(stored.is_fallback());

    // A fallback row still counts as summarized: no client calls on rerun.
    let (client2, calls2) = FakeClient::new(Behavior::Valid);
    summarizer(Arc::clone(&store), client2)
        .summarize_pending(&today())
        .await
        .unwrap();
    assert_eq!(calls2.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transport_failure_is_isolated_and_paper_stays_pending() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.insert_paper(&paper("2401.00001")).unwrap();
    let (client, _) = FakeClient::new(Behavior::Fail);

    let outcome = summarizer(Arc::clone(&store), client)
        .summarize_pending(&today())
        .await
        .unwrap();

    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.failed_ids, vec!["2401.00001".to_string()]);
    assert!(store.get_summary("2401.00001").unwrap().is_none());

    // The paper is pending again on the next run and can succeed.
    let (client2, calls2) = FakeClient::new(Behavior::Valid);
    let outcome2 = summarizer(Arc::clone(&store), client2)
        .summarize_pending(&today())
        .await
        .unwrap();
    assert_eq!(calls2.load(Ordering::SeqCst), 1);
    assert_eq!(outcome2.succeeded, 1);
    assert!(store.has_summary("2401.00001").unwrap());
}

/// Cancelling the batch future must also cancel the in-flight client calls,
/// not leave them running detached.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_the_batch_aborts_in_flight_calls() {
    struct ActiveGuard(Arc<AtomicUsize>);
    impl Drop for ActiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct HangingClient {
        active: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SummaryClient for HangingClient {
        async fn summarize(&self, _paper: &Paper) -> Result<StructuredSummary, LlmError> {
            self.active.fetch_add(1, Ordering::SeqCst);
            let _guard = ActiveGuard(Arc::clone(&self.active));
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    let store = Arc::new(Store::open_in_memory().unwrap());
    for i in 1..=3 {
        store.insert_paper(&paper(&format!("2401.0000{i}"))).unwrap();
    }
    let active = Arc::new(AtomicUsize::new(0));
    let client = Arc::new(HangingClient {
        active: Arc::clone(&active),
    });
    let summarizer = Arc::new(Summarizer::new(
        Arc::clone(&store),
        client,
        Arc::new(Gate::new(2, 600)),
    ));

    let batch = tokio::spawn({
        let summarizer = Arc::clone(&summarizer);
        async move { summarizer.summarize_all_pending().await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(active.load(Ordering::SeqCst) >= 1, "no call got in flight");

    batch.abort();
    let _ = batch.await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(active.load(Ordering::SeqCst), 0, "calls kept running after cancel");
    assert_eq!(store.pending_papers().unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_completes_under_concurrency_limits() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    for i in 0..10 {
        store.insert_paper(&paper(&format!("2401.000{i:02}"))).unwrap();
    }
    let (client, calls) = FakeClient::new(Behavior::Valid);

    let outcome = summarizer(Arc::clone(&store), client)
        .summarize_all_pending()
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert!(store.pending_papers().unwrap().is_empty());
}
