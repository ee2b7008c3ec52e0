// src/queue/memory.rs

//! In-memory queue binding.
//!
//! The in-process reference broker: a FIFO with in-flight tracking so
//! abandoned deliveries are redelivered. Suitable for single-process
//! deployments and tests; distributed deployments select an external
//! broker binding instead.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Queuable;
use crate::queue::WorkQueue;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<(u64, Queuable)>,
    in_flight: HashMap<u64, Queuable>,
}

/// A single in-memory FIFO queue.
pub struct MemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    receipts: AtomicU64,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            receipts: AtomicU64::new(1),
        }
    }

    /// Number of entries waiting for delivery.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, entries: Vec<Queuable>) -> Result<()> {
        let mut state = self.state.lock().await;
        for entry in entries {
            let receipt = self.receipts.fetch_add(1, Ordering::Relaxed);
            state.pending.push_back((receipt, entry));
        }
        Ok(())
    }

    async fn pop(&self) -> Result<Option<(u64, Queuable)>> {
        let mut state = self.state.lock().await;
        match state.pending.pop_front() {
            Some((receipt, entry)) => {
                state.in_flight.insert(receipt, entry.clone());
                Ok(Some((receipt, entry)))
            }
            None => Ok(None),
        }
    }

    async fn done(&self, receipt: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&receipt)
            .map(|_| ())
            .ok_or_else(|| AppError::queue(format!("{}: unknown receipt {}", self.name, receipt)))
    }

    async fn abandon(&self, receipt: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.in_flight.remove(&receipt) {
            Some(entry) => {
                state.pending.push_front((receipt, entry));
                Ok(())
            }
            None => Err(AppError::queue(format!(
                "{}: unknown receipt {}",
                self.name, receipt
            ))),
        }
    }
}
