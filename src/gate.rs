// src/gate.rs
// Admission control for LLM calls: a bounded concurrency limiter and a
// sliding-window rate limiter, kept as independent primitives and composed
// by `Gate` via scoped acquisition. The concurrency slot is released on
// drop of the permit, on every exit path; window admissions decay naturally
// after 60 seconds and are never released early.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Caps the number of tasks simultaneously holding a slot.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    sem: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquisition only fails on a bug.
        self.sem
            .clone()
            .acquire_owned()
            .await
            .expect("concurrency semaphore closed")
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

/// Sliding 60-second window over admission instants. `admit` blocks until
/// fewer than `rpm` admissions fall inside the trailing window, then records
/// the new admission.
pub struct RateWindow {
    rpm: usize,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateWindow {
    pub fn new(rpm: usize) -> Self {
        Self {
            rpm: rpm.max(1),
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn admit(&self) {
        // The lock is held across the wait so queued callers are admitted in
        // order as the window frees up.
        let mut q = self.admitted.lock().await;
        loop {
            let now = Instant::now();
            while q.front().is_some_and(|&t| now.duration_since(t) >= WINDOW) {
                q.pop_front();
            }
            if q.len() < self.rpm {
                q.push_back(now);
                return;
            }
            let oldest = *q.front().expect("window non-empty");
            let wait = (oldest + WINDOW).saturating_duration_since(now);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Combined gate guarding LLM calls: at most N in-flight holders and at most
/// R admissions per trailing minute.
pub struct Gate {
    limiter: ConcurrencyLimiter,
    window: RateWindow,
}

/// Held for the duration of one guarded call. Dropping it frees the
/// concurrency slot; the window admission decays on its own.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl Gate {
    pub fn new(max_concurrency: usize, rpm: usize) -> Self {
        Self {
            limiter: ConcurrencyLimiter::new(max_concurrency),
            window: RateWindow::new(rpm),
        }
    }

    /// Blocks until both a concurrency slot and a window admission are
    /// granted. The slot is taken first so a task waiting on the window does
    /// not consume admissions it cannot use yet.
    pub async fn acquire(&self) -> GatePermit {
        let permit = self.limiter.acquire().await;
        self.window.admit().await;
        GatePermit { _permit: permit }
    }
}
