// src/pipeline/loops.rs

//! Long-running worker loops.
//!
//! A loop repeatedly runs one crawler cycle, sleeping between cycles for
//! the larger of its own base delay and the delay the cycle requested.
//! Setting the delay to the stop sentinel (−1) terminates the loop on its
//! next natural wakeup; sleeping loops are not forcibly woken. Cycle
//! panics are logged and the loop continues.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info};

use crate::pipeline::Crawler;

/// Delay value that requests loop termination.
pub const STOP_SENTINEL: i64 = -1;

/// Backoff after a panicking cycle, so a hot failure cannot spin.
const PANIC_BACKOFF: Duration = Duration::from_millis(1_000);

/// One worker loop's control block, shared with its supervisor.
pub struct CrawlLoop {
    name: String,
    delay_ms: AtomicI64,
    stopped: watch::Sender<bool>,
}

impl CrawlLoop {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            name: name.into(),
            delay_ms: AtomicI64::new(delay.as_millis() as i64),
            stopped,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request termination. Idempotent.
    pub fn stop(&self) {
        self.delay_ms.store(STOP_SENTINEL, Ordering::SeqCst);
    }

    /// Whether the loop has fully stopped and fired its done notification.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Done notification channel; observes exactly one `true`.
    pub fn stopped_signal(&self) -> watch::Receiver<bool> {
        self.stopped.subscribe()
    }

    /// Run until the stop sentinel is observed.
    pub async fn run(self: Arc<Self>, crawler: Arc<Crawler>) {
        info!(worker = %self.name, "loop starting");
        loop {
            if self.delay_ms.load(Ordering::SeqCst) == STOP_SENTINEL {
                break;
            }

            let cycle = AssertUnwindSafe(crawler.process_one(&self.name))
                .catch_unwind()
                .await;
            let requested = match cycle {
                Ok(delay) => delay,
                Err(_) => {
                    error!(worker = %self.name, "PANIC in crawl cycle; loop continues");
                    PANIC_BACKOFF
                }
            };

            let base = self.delay_ms.load(Ordering::SeqCst);
            if base == STOP_SENTINEL {
                break;
            }
            let sleep_for = requested.max(Duration::from_millis(base.max(0) as u64));
            if !sleep_for.is_zero() {
                tokio::time::sleep(sleep_for).await;
            }
        }

        self.stopped.send_replace(true);
        info!(worker = %self.name, "loop stopped");
    }
}
