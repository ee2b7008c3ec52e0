// src/queue/mod.rs

//! Work queue abstractions.
//!
//! A [`QueueSet`] spans the four named queues of one crawler deployment:
//! `priority`, `soon` (freshly discovered pagination, drained eagerly),
//! `normal`, and `dead` (terminal). Messages are the JSON serialization of
//! the queuable projection.

mod memory;

pub use memory::MemoryQueue;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Queuable;

/// Named queue within a queue set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Priority,
    Soon,
    Normal,
    Dead,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Priority => "priority",
            QueueName::Soon => "soon",
            QueueName::Normal => "normal",
            QueueName::Dead => "dead",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broker receipt for one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTag {
    pub queue: QueueName,
    pub receipt: u64,
}

/// One message popped from a queue, with its redelivery receipt.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: QueueName,
    pub receipt: u64,
    pub entry: Queuable,
}

impl Delivery {
    pub fn tag(&self) -> DeliveryTag {
        DeliveryTag {
            queue: self.queue,
            receipt: self.receipt,
        }
    }
}

/// A single named broker queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Queue name, for diagnostics.
    fn name(&self) -> &str;

    /// Append entries to the queue.
    async fn push(&self, entries: Vec<Queuable>) -> Result<()>;

    /// Pop one entry, or `None` when the queue is empty. The entry stays
    /// in flight until `done` or `abandon`.
    async fn pop(&self) -> Result<Option<(u64, Queuable)>>;

    /// Acknowledge a delivered entry.
    async fn done(&self, receipt: u64) -> Result<()>;

    /// Return a delivered entry to the queue for redelivery.
    async fn abandon(&self, receipt: u64) -> Result<()>;
}

/// The four named queues of one crawler deployment.
pub struct QueueSet {
    priority: Arc<dyn WorkQueue>,
    soon: Arc<dyn WorkQueue>,
    normal: Arc<dyn WorkQueue>,
    dead: Arc<dyn WorkQueue>,
}

impl QueueSet {
    pub fn new(
        priority: Arc<dyn WorkQueue>,
        soon: Arc<dyn WorkQueue>,
        normal: Arc<dyn WorkQueue>,
        dead: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            priority,
            soon,
            normal,
            dead,
        }
    }

    /// In-process reference binding with `{prefix}-{queue}` names.
    pub fn memory(prefix: &str) -> Self {
        let named = |queue: QueueName| -> Arc<dyn WorkQueue> {
            Arc::new(MemoryQueue::new(format!("{}-{}", prefix, queue)))
        };
        Self::new(
            named(QueueName::Priority),
            named(QueueName::Soon),
            named(QueueName::Normal),
            named(QueueName::Dead),
        )
    }

    fn of(&self, name: QueueName) -> &Arc<dyn WorkQueue> {
        match name {
            QueueName::Priority => &self.priority,
            QueueName::Soon => &self.soon,
            QueueName::Normal => &self.normal,
            QueueName::Dead => &self.dead,
        }
    }

    /// Pop the next entry, honoring priority order. The `soon` queue
    /// drains before `normal` so pagination is consumed while the remote
    /// view is still coherent. The dead queue is never popped.
    pub async fn pop(&self) -> Result<Option<Delivery>> {
        for name in [QueueName::Priority, QueueName::Soon, QueueName::Normal] {
            if let Some((receipt, entry)) = self.of(name).pop().await? {
                return Ok(Some(Delivery {
                    queue: name,
                    receipt,
                    entry,
                }));
            }
        }
        Ok(None)
    }

    /// Push entries onto the named queue.
    pub async fn push(&self, entries: Vec<Queuable>, queue: QueueName) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.of(queue).push(entries).await
    }

    /// Push a requeued projection back onto its origin queue.
    pub async fn repush(&self, origin: DeliveryTag, queuable: Queuable) -> Result<()> {
        self.of(origin.queue).push(vec![queuable]).await
    }

    /// Acknowledge the original delivery.
    pub async fn done(&self, tag: DeliveryTag) -> Result<()> {
        self.of(tag.queue).done(tag.receipt).await
    }

    /// Leave the original delivery in the broker for redelivery.
    pub async fn abandon(&self, tag: DeliveryTag) -> Result<()> {
        self.of(tag.queue).abandon(tag.receipt).await
    }

    /// Dead-letter a projection that exhausted its retry budget.
    pub async fn push_dead(&self, queuable: Queuable) -> Result<()> {
        self.dead.push(vec![queuable]).await
    }

    /// Queue names, for the operator surface.
    pub fn names(&self) -> Vec<String> {
        [&self.priority, &self.soon, &self.normal, &self.dead]
            .iter()
            .map(|queue| queue.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TraversalPolicy;

    fn entry(url: &str) -> Queuable {
        Queuable::root("repo", url, TraversalPolicy::default())
    }

    #[tokio::test]
    async fn test_pop_honors_priority_order() {
        let queues = QueueSet::memory("test");
        queues
            .push(vec![entry("https://a/normal")], QueueName::Normal)
            .await
            .unwrap();
        queues
            .push(vec![entry("https://a/soon")], QueueName::Soon)
            .await
            .unwrap();
        queues
            .push(vec![entry("https://a/priority")], QueueName::Priority)
            .await
            .unwrap();

        let order: Vec<String> = {
            let mut popped = Vec::new();
            while let Some(delivery) = queues.pop().await.unwrap() {
                popped.push(delivery.entry.url.clone());
                queues.done(delivery.tag()).await.unwrap();
            }
            popped
        };
        assert_eq!(order, vec!["https://a/priority", "https://a/soon", "https://a/normal"]);
    }

    #[tokio::test]
    async fn test_pop_empty_returns_none() {
        let queues = QueueSet::memory("test");
        assert!(queues.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repush_targets_origin_queue() {
        let queues = QueueSet::memory("test");
        queues
            .push(vec![entry("https://a/x")], QueueName::Soon)
            .await
            .unwrap();
        let delivery = queues.pop().await.unwrap().unwrap();
        assert_eq!(delivery.queue, QueueName::Soon);

        let mut requeued = delivery.entry.clone();
        requeued.attempt_count += 1;
        queues.repush(delivery.tag(), requeued).await.unwrap();
        queues.done(delivery.tag()).await.unwrap();

        let redelivered = queues.pop().await.unwrap().unwrap();
        assert_eq!(redelivered.queue, QueueName::Soon);
        assert_eq!(redelivered.entry.attempt_count, 1);
    }

    #[test]
    fn test_names_carry_prefix() {
        let queues = QueueSet::memory("east");
        assert_eq!(
            queues.names(),
            vec!["east-priority", "east-soon", "east-normal", "east-dead"]
        );
    }
}
