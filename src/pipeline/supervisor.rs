// src/pipeline/supervisor.rs

//! Worker loop supervision.
//!
//! Reconciles the set of live loops toward a target count: terminated
//! loops are pruned, a deficit spawns new loops, a surplus stops loops
//! from the tail. Stopping loops count as running until their done
//! notification fires. Reconciliation never blocks on loop shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::DynamicSettings;
use crate::pipeline::{CrawlLoop, Crawler};

struct ManagedLoop {
    control: Arc<CrawlLoop>,
    handle: JoinHandle<()>,
}

/// Spawns and stops worker loops to match the configured count.
pub struct LoopSupervisor {
    crawler: Arc<Crawler>,
    loop_delay: Duration,
    loops: Mutex<Vec<ManagedLoop>>,
    spawned: AtomicUsize,
}

impl LoopSupervisor {
    pub fn new(crawler: Arc<Crawler>, loop_delay: Duration) -> Self {
        Self {
            crawler,
            loop_delay,
            loops: Mutex::new(Vec::new()),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Reconcile toward the target loop count.
    pub async fn run(&self, target: usize) {
        self.reconcile(target).await;
    }

    /// Reconcile toward zero. Loops stop asynchronously.
    pub async fn stop(&self) {
        self.reconcile(0).await;
    }

    /// Number of live loops; stopping loops count until they finish.
    pub async fn status(&self) -> usize {
        let mut loops = self.loops.lock().await;
        loops.retain(|managed| !managed.handle.is_finished());
        loops.len()
    }

    async fn reconcile(&self, target: usize) {
        let mut loops = self.loops.lock().await;
        loops.retain(|managed| !managed.handle.is_finished());
        let running = loops.len();

        if running < target {
            for _ in 0..(target - running) {
                let ordinal = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
                let control = Arc::new(CrawlLoop::new(
                    format!("loop-{}", ordinal),
                    self.loop_delay,
                ));
                let handle =
                    tokio::spawn(Arc::clone(&control).run(Arc::clone(&self.crawler)));
                loops.push(ManagedLoop { control, handle });
            }
            info!(running, target, "spawned worker loops");
        } else if running > target {
            for managed in loops.iter().skip(target) {
                managed.control.stop();
            }
            info!(running, target, "stopping worker loops from the tail");
        }
    }

    /// React to dynamic settings changes. Only the loop count is observed.
    pub fn watch(self: Arc<Self>, mut settings: watch::Receiver<DynamicSettings>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while settings.changed().await.is_ok() {
                let count = settings.borrow().count;
                info!(count, "loop count changed; reconciling");
                self.reconcile(count).await;
            }
        })
    }
}
