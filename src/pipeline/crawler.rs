// src/pipeline/crawler.rs

//! Per-request pipeline orchestration.
//!
//! One cycle pops a request, locks its URL, fetches, converts, processes,
//! stores, and completes it. Every stage is total: errors are folded into
//! the request and the cycle always reaches the completion protocol, which
//! releases the lock before acknowledging the broker on both paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::{AppError, Result};
use crate::models::{
    wrap_elements, CrawlerSettings, HeaderSummary, Outcome, Request,
};
use crate::queue::QueueSet;
use crate::services::{Fetcher, Processor, UrlLocker};
use crate::storage::{DocumentStore, UpsertOutcome};
use crate::utils::org_from_url;

/// Shared, per-request-stateless pipeline executor. All mutation happens
/// on the request owned by the calling loop.
pub struct Crawler {
    queues: Arc<QueueSet>,
    locker: Option<Arc<dyn UrlLocker>>,
    fetcher: Arc<Fetcher>,
    store: Arc<dyn DocumentStore>,
    processor: Arc<Processor>,
    settings: CrawlerSettings,
}

impl Crawler {
    pub fn new(
        queues: Arc<QueueSet>,
        locker: Option<Arc<dyn UrlLocker>>,
        fetcher: Arc<Fetcher>,
        store: Arc<dyn DocumentStore>,
        processor: Arc<Processor>,
        settings: CrawlerSettings,
    ) -> Self {
        Self {
            queues,
            locker,
            fetcher,
            store,
            processor,
            settings,
        }
    }

    pub fn queues(&self) -> &Arc<QueueSet> {
        &self.queues
    }

    pub fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    /// Run one cycle and return the delay before the owning loop's next
    /// cycle.
    pub async fn process_one(&self, loop_name: &str) -> Duration {
        let request = self.run_cycle(loop_name).await;
        self.log_outcome(&request);
        self.delay_for(&request)
    }

    pub(crate) async fn run_cycle(&self, loop_name: &str) -> Request {
        let mut request = match self.get_request(loop_name).await {
            Ok(request) => request,
            Err(e) => {
                error!(worker = loop_name, error = %e, "could not obtain a request");
                return Request::error_trap(e.to_string(), self.settings.polling_delay());
            }
        };

        if let Err(e) = self.run_stages(&mut request).await {
            request.mark_requeue(Outcome::Error, e.to_string());
        }
        if !request.should_skip() && request.outcome.is_none() {
            request.outcome = Some(Outcome::Processed);
        }

        self.complete_request(&mut request).await;
        request
    }

    async fn run_stages(&self, request: &mut Request) -> Result<()> {
        self.filter(request).await?;
        self.fetch(request).await?;
        self.convert_to_document(request)?;
        self.process_document(request)?;
        self.store_document(request).await?;
        Ok(())
    }

    // ===== Stage 1: pop + lock =====

    async fn get_request(&self, loop_name: &str) -> Result<Request> {
        let mut request = match self.queues.pop().await? {
            Some(delivery) => {
                let tag = delivery.tag();
                Request::from_queuable(delivery.entry, tag)
            }
            None => Request::blank(self.settings.polling_delay()),
        };
        request.started_at = Some(Utc::now());
        request.loop_name = loop_name.to_string();
        self.acquire_lock(&mut request).await;
        Ok(request)
    }

    /// Lease the request's URL for the processing TTL. Contention marks a
    /// requeue; the pipeline continues regardless and later stages observe
    /// the skip.
    async fn acquire_lock(&self, request: &mut Request) {
        if request.should_skip() {
            return;
        }
        let (Some(locker), Some(url)) = (self.locker.as_ref(), request.url().map(str::to_string))
        else {
            return;
        };

        match locker.lock(&url, self.settings.processing_ttl()).await {
            Ok(lease) => request.lease = Some(lease),
            Err(AppError::LockContended { .. }) => {
                request.mark_requeue(Outcome::Requeued, "Could not lock");
            }
            Err(e) => request.mark_requeue(Outcome::Error, e.to_string()),
        }
    }

    // ===== Stage 2: filter =====

    async fn filter(&self, request: &mut Request) -> Result<()> {
        if request.should_skip() {
            return Ok(());
        }
        let (Some(resource_type), Some(url)) = (
            request.resource_type().map(str::to_string),
            request.url().map(str::to_string),
        ) else {
            return Ok(());
        };

        if resource_type.is_empty() || url.is_empty() {
            if let Ok(queuable) = request.queuable() {
                if let Err(e) = self.queues.push_dead(queuable).await {
                    warn!(error = %e, "could not dead-letter malformed request");
                }
            }
            request.mark_skip(Outcome::Error, "Malformed request: missing type or url");
            return Ok(());
        }

        if !self.settings.org_allowlist.is_empty()
            && matches!(resource_type.as_str(), "repo" | "repos" | "org")
        {
            let allowed = org_from_url(&url)
                .map(|org| {
                    self.settings
                        .org_allowlist
                        .iter()
                        .any(|entry| entry.eq_ignore_ascii_case(&org))
                })
                .unwrap_or(false);
            if !allowed {
                request.mark_skip(Outcome::Skipped, "Filtered");
            }
        }
        Ok(())
    }

    // ===== Stage 3: fetch =====

    async fn fetch(&self, request: &mut Request) -> Result<()> {
        if request.should_skip() || request.url().is_none() {
            return Ok(());
        }
        self.fetcher.fetch(request).await
    }

    // ===== Stage 4: convert =====

    /// Attach the metadata envelope. When the fetcher rehydrated a stored
    /// document, its metadata (links, version) is the template and only
    /// the freshness fields are overwritten.
    fn convert_to_document(&self, request: &mut Request) -> Result<()> {
        if request.should_skip() {
            return Ok(());
        }
        let Some(url) = request.url().map(str::to_string) else {
            return Ok(());
        };
        let storage_type = request.storage_type().to_string();
        let etag = request.response.as_ref().and_then(|r| r.etag.clone());
        let link_header = request.response.as_ref().and_then(|r| r.link_header.clone());
        let Some(document) = request.document.as_mut() else {
            return Ok(());
        };

        document.payload = wrap_elements(std::mem::take(&mut document.payload));
        let metadata = &mut document.metadata;
        metadata.resource_type = storage_type;
        metadata.url = url;
        metadata.fetched_at = Utc::now();
        if etag.is_some() {
            metadata.etag = etag;
        }
        if let Some(link) = link_header {
            metadata.headers = Some(HeaderSummary { link: Some(link) });
        }
        Ok(())
    }

    // ===== Stage 5: process =====

    /// Run the processor and turn its discoveries into queue pushes,
    /// tracked on the request so they settle before ack.
    fn process_document(&self, request: &mut Request) -> Result<()> {
        if request.should_skip() || request.document.is_none() {
            return Ok(());
        }

        let discoveries = self.processor.process(request);
        if discoveries.is_empty() {
            return Ok(());
        }
        request.meta.insert("queued", discoveries.len() as u64);

        for (queue, batch) in discoveries.into_batches() {
            let queues = Arc::clone(&self.queues);
            let handle = tokio::spawn(async move { queues.push(batch, queue).await });
            request.track_promise(handle);
        }
        Ok(())
    }

    // ===== Stage 6: store =====

    async fn store_document(&self, request: &mut Request) -> Result<()> {
        if request.should_skip() || !request.policy.should_save() {
            return Ok(());
        }
        let Some(document) = request.document.as_ref() else {
            return Ok(());
        };

        let started = Instant::now();
        let outcome = self.store.upsert(document).await?;
        request
            .meta
            .insert("store", started.elapsed().as_millis() as u64);
        request.meta.insert(
            "upsert",
            match outcome {
                UpsertOutcome::Created => "created",
                UpsertOutcome::Updated => "updated",
            },
        );
        Ok(())
    }

    // ===== Completion protocol =====

    /// Settle side effects, then ack or requeue. The lock is always
    /// released before the broker sees done/abandon; a failed release
    /// downgrades ack to abandon so the message is redelivered after the
    /// lease expires.
    async fn complete_request(&self, request: &mut Request) {
        if self.settle_promises(request).await {
            request.mark_requeue(Outcome::Error, "Failed to queue discovered work");
        }

        let Some(tag) = request.delivery else {
            // Blank and trap requests were never delivered.
            self.release_lock(request).await;
            return;
        };

        if request.should_requeue() {
            match self.requeue(request).await {
                Ok(()) => {
                    if self.release_lock(request).await {
                        if let Err(e) = self.queues.done(tag).await {
                            warn!(error = %e, "ack failed after requeue");
                        }
                    } else if let Err(e) = self.queues.abandon(tag).await {
                        warn!(error = %e, "abandon failed after requeue");
                    }
                }
                Err(e) => {
                    // Leave the message in the broker for redelivery.
                    error!(error = %e, request = %request.describe(), "requeue failed");
                    self.release_lock(request).await;
                    if let Err(e) = self.queues.abandon(tag).await {
                        warn!(error = %e, "abandon failed");
                    }
                }
            }
        } else if self.release_lock(request).await {
            if let Err(e) = self.queues.done(tag).await {
                warn!(error = %e, "ack failed");
            }
        } else if let Err(e) = self.queues.abandon(tag).await {
            warn!(error = %e, "abandon failed");
        }
    }

    /// Wait for all tracked side effects. Returns true when any failed and
    /// the request must be requeued.
    async fn settle_promises(&self, request: &mut Request) -> bool {
        let handles = std::mem::take(&mut request.promises);
        if handles.is_empty() {
            return false;
        }
        let mut failed = false;
        for settled in join_all(handles).await {
            match settled {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "side effect failed");
                    failed = true;
                }
                Err(e) => {
                    warn!(error = %e, "side effect task panicked");
                    failed = true;
                }
            }
        }
        failed
    }

    /// Release any held lease. Returns false when the release failed and
    /// the delivery should be abandoned instead of acked; the lease then
    /// expires at its TTL.
    async fn release_lock(&self, request: &mut Request) -> bool {
        let Some(lease) = request.lease.take() else {
            return true;
        };
        let Some(locker) = self.locker.as_ref() else {
            return true;
        };
        match locker.unlock(&lease).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %lease.url, error = %e, "failed to release lock");
                false
            }
        }
    }

    /// Push the queuable projection back onto its origin queue with a
    /// bumped attempt count, or dead-letter it once the budget is spent.
    async fn requeue(&self, request: &mut Request) -> Result<()> {
        let mut queuable = request.queuable()?;
        queuable.attempt_count += 1;
        request.meta.insert("attempt", queuable.attempt_count);

        if queuable.attempt_count > self.settings.max_attempts {
            warn!(
                request = %request.describe(),
                attempts = queuable.attempt_count,
                "attempt budget exhausted; dead-lettering"
            );
            self.queues.push_dead(queuable).await
        } else {
            let tag = request
                .delivery
                .ok_or_else(|| AppError::queue("no delivery to requeue"))?;
            self.queues.repush(tag, queuable).await
        }
    }

    // ===== Outcome =====

    fn log_outcome(&self, request: &Request) {
        let outcome = request.outcome.unwrap_or(Outcome::Processed);
        let reason = request.message.as_deref().unwrap_or("");
        match outcome {
            Outcome::Error => error!(
                worker = %request.loop_name,
                request = %request.describe(),
                reason,
                "cycle failed"
            ),
            _ => info!(
                worker = %request.loop_name,
                outcome = %outcome,
                policy = %request.policy.short_form(),
                request = %request.describe(),
                reason,
                meta = %request.meta,
                "cycle complete"
            ),
        }
    }

    pub(crate) fn delay_for(&self, request: &Request) -> Duration {
        let now = Utc::now();
        match request.next_request_time {
            Some(gate) if gate > now => (gate - now).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Disposition, FetchSettings, Queuable, RequestKind, TraversalPolicy,
    };
    use crate::queue::{MemoryQueue, QueueName, WorkQueue};
    use crate::services::MemoryLocker;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        crawler: Crawler,
        queues: Arc<QueueSet>,
        store: Arc<MemoryStore>,
        locker: Arc<MemoryLocker>,
        dead: Arc<MemoryQueue>,
        normal: Arc<MemoryQueue>,
        soon: Arc<MemoryQueue>,
    }

    fn make_harness(settings: CrawlerSettings) -> Harness {
        let priority = Arc::new(MemoryQueue::new("t-priority"));
        let soon = Arc::new(MemoryQueue::new("t-soon"));
        let normal = Arc::new(MemoryQueue::new("t-normal"));
        let dead = Arc::new(MemoryQueue::new("t-dead"));
        let queues = Arc::new(QueueSet::new(
            priority,
            Arc::clone(&soon) as Arc<dyn WorkQueue>,
            Arc::clone(&normal) as Arc<dyn WorkQueue>,
            Arc::clone(&dead) as Arc<dyn WorkQueue>,
        ));
        let store = Arc::new(MemoryStore::new());
        let locker = Arc::new(MemoryLocker::new());
        let fetcher = Arc::new(
            Fetcher::new(
                Arc::clone(&store) as Arc<dyn DocumentStore>,
                FetchSettings::default(),
            )
            .unwrap(),
        );
        let crawler = Crawler::new(
            Arc::clone(&queues),
            Some(Arc::clone(&locker) as Arc<dyn UrlLocker>),
            fetcher,
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(Processor::new()),
            settings,
        );
        Harness {
            crawler,
            queues,
            store,
            locker,
            dead,
            normal,
            soon,
        }
    }

    fn fast_settings() -> CrawlerSettings {
        CrawlerSettings {
            polling_delay_ms: 20,
            ..CrawlerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_happy_path_processes_stores_and_acks() {
        let server = MockServer::start().await;
        let url = format!("{}/repos/acme/widget", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .set_body_json(json!({
                        "id": 42,
                        "owner": {"id": 7, "url": format!("{}/users/octo", server.uri())},
                        "issues_url": format!("{}/repos/acme/widget/issues{{/number}}", server.uri()),
                        "commits_url": format!("{}/repos/acme/widget/commits{{/sha}}", server.uri()),
                    })),
            )
            .mount(&server)
            .await;

        let harness = make_harness(fast_settings());
        harness
            .queues
            .push(
                vec![Queuable::root("repo", &url, TraversalPolicy::default())],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let request = harness.crawler.run_cycle("test").await;

        assert_eq!(request.outcome, Some(Outcome::Processed));
        assert_eq!(request.attempt_count, 0);
        assert!(request.meta.get("store").is_some());
        assert!(request.lease.is_none());

        let stored = harness.store.get("repo", &url).await.unwrap().unwrap();
        assert_eq!(stored.metadata.etag.as_deref(), Some("\"abc\""));
        assert!(stored.metadata.links.contains_key("self"));

        // owner root + issues and commits collections discovered
        assert_eq!(harness.normal.len().await, 3);
        // original delivery acked, lock released
        assert!(harness
            .locker
            .lock(&url, Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unmodified_skips_store() {
        let server = MockServer::start().await;
        let url = format!("{}/repos/acme/widget", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let harness = make_harness(fast_settings());
        let mut metadata = crate::models::DocumentMetadata::new("repo", &url);
        metadata.etag = Some("\"abc\"".to_string());
        metadata.version = 9;
        harness
            .store
            .upsert(&crate::models::Document::new(json!({"id": 42}), metadata))
            .await
            .unwrap();

        harness
            .queues
            .push(
                vec![Queuable::root("repo", &url, TraversalPolicy::default())],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let request = harness.crawler.run_cycle("test").await;

        assert_eq!(request.outcome, Some(Outcome::Skipped));
        assert_eq!(request.message.as_deref(), Some("Unmodified"));
        // store untouched: the stale version survives
        let stored = harness.store.get("repo", &url).await.unwrap().unwrap();
        assert_eq!(stored.metadata.version, 9);
        assert!(harness.queues.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_contention_requeues() {
        let harness = make_harness(fast_settings());
        let url = "https://api.example.com/repos/acme/widget";
        let _held = harness
            .locker
            .lock(url, Duration::from_secs(60))
            .await
            .unwrap();

        harness
            .queues
            .push(
                vec![Queuable::root("repo", url, TraversalPolicy::default())],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let request = harness.crawler.run_cycle("test").await;

        assert_eq!(request.outcome, Some(Outcome::Requeued));
        assert_eq!(request.message.as_deref(), Some("Could not lock"));
        assert!(request.lease.is_none());

        // the projection went back to the origin queue with a bumped count
        let redelivered = harness.queues.pop().await.unwrap().unwrap();
        assert_eq!(redelivered.queue, QueueName::Normal);
        assert_eq!(redelivered.entry.attempt_count, 1);
        assert_eq!(redelivered.entry.url, url);
    }

    #[tokio::test]
    async fn test_exhausted_queue_yields_blank_with_polling_delay() {
        let harness = make_harness(CrawlerSettings {
            polling_delay_ms: 2_000,
            ..CrawlerSettings::default()
        });

        let request = harness.crawler.run_cycle("test").await;

        assert_eq!(request.kind, RequestKind::Blank);
        assert_eq!(request.outcome, Some(Outcome::Skipped));
        assert_eq!(request.message.as_deref(), Some("Exhausted queue"));

        let delay = harness.crawler.delay_for(&request);
        assert!(delay > Duration::from_millis(1_500));
        assert!(delay <= Duration::from_millis(2_000));
        assert_eq!(harness.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_server_errors_requeue_then_dead_letter() {
        let server = MockServer::start().await;
        let url = format!("{}/repos/acme/widget", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let harness = make_harness(fast_settings());
        harness
            .queues
            .push(
                vec![Queuable::root("repo", &url, TraversalPolicy::default())],
                QueueName::Normal,
            )
            .await
            .unwrap();

        // five failing attempts requeue; the sixth pop dead-letters
        for _ in 0..6 {
            let request = harness.crawler.run_cycle("test").await;
            assert_eq!(request.outcome, Some(Outcome::Error));
        }

        assert!(harness.queues.pop().await.unwrap().is_none());
        assert_eq!(harness.dead.len().await, 1);
        let (_, dead) = harness.dead.pop().await.unwrap().unwrap();
        assert_eq!(dead.attempt_count, 6);
        assert_eq!(dead.url, url);
    }

    #[tokio::test]
    async fn test_collection_pages_land_on_soon() {
        let server = MockServer::start().await;
        let url = format!("{}/repos/acme/widget/issues", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/issues"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Link",
                        format!(
                            "<{url}?page=2>; rel=\"next\", <{url}?page=7>; rel=\"last\""
                        )
                        .as_str(),
                    )
                    .set_body_json(json!([
                        {"id": 1, "url": format!("{}/repos/acme/widget/issues/1", server.uri())},
                    ])),
            )
            .mount(&server)
            .await;

        let harness = make_harness(fast_settings());
        harness
            .queues
            .push(
                vec![Queuable::collection(
                    "issues",
                    &url,
                    "urn:repo:42",
                    TraversalPolicy::default(),
                )],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let request = harness.crawler.run_cycle("test").await;
        assert_eq!(request.outcome, Some(Outcome::Processed));

        // pages 2..=7 on soon, the single element on normal
        assert_eq!(harness.soon.len().await, 6);
        assert_eq!(harness.normal.len().await, 1);

        // the page document is stored under the page type
        let stored = harness.store.get("page", &url).await.unwrap().unwrap();
        assert!(stored.payload["elements"].is_array());
    }

    #[tokio::test]
    async fn test_malformed_request_is_dead_lettered() {
        let harness = make_harness(fast_settings());
        harness
            .queues
            .push(
                vec![Queuable::root("", "", TraversalPolicy::default())],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let request = harness.crawler.run_cycle("test").await;

        assert_eq!(request.outcome, Some(Outcome::Error));
        assert_eq!(request.disposition, Disposition::Skip);
        assert_eq!(harness.dead.len().await, 1);
        assert!(harness.queues.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_org_allowlist_filters_other_orgs() {
        let harness = make_harness(CrawlerSettings {
            org_allowlist: vec!["acme".to_string()],
            polling_delay_ms: 20,
            ..CrawlerSettings::default()
        });
        harness
            .queues
            .push(
                vec![Queuable::root(
                    "repo",
                    "https://api.example.com/repos/umbrella/gadget",
                    TraversalPolicy::default(),
                )],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let request = harness.crawler.run_cycle("test").await;

        assert_eq!(request.outcome, Some(Outcome::Skipped));
        assert_eq!(request.message.as_deref(), Some("Filtered"));
        assert_eq!(harness.store.len().await, 0);
        assert!(harness.queues.pop().await.unwrap().is_none());
    }
}
