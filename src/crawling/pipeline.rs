//! # Extraction Pipeline
//!
//! 파이프라인 오케스트레이터. Wires the session gate, the category schedule,
//! a bounded pool of fetch workers and the result aggregator into one run.
//!
//! The coordinator task owns the [`Schedule`]. It feeds a bounded work queue
//! (the queue capacity throttles emission to worker speed) and applies the
//! outcome events workers send back. Workers fetch under the retry
//! controller, normalize, accumulate, and report. A fatal gate failure
//! cancels the run: queued items are discarded, in-flight ones finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::{ResultAggregator, Resolution};
use super::errors::{FetchError, FetchErrorKind, GateError, PipelineError};
use super::fetcher::{FetchedPage, ProductFetcher};
use super::filters::apply_filters;
use super::gate::{GatePolicy, SessionGate};
use super::normalizer::normalize;
use super::page::PageMarkup;
use super::retry::RetryController;
use super::scheduler::{CategoryScheduler, DetailCandidate, PageOutcome, Schedule};
use super::wait::WaitPolicy;
use crate::domain::category::Category;
use crate::domain::product::NormalizedRecord;
use crate::domain::summary::{CategoryStatus, RunSummary};
use crate::domain::work_item::WorkItem;
use crate::infrastructure::config::ExtractorConfig;
use crate::infrastructure::substrate::BrowserSubstrate;

/// Dataset and summary of a finished run, with report filters applied
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dataset: Vec<NormalizedRecord>,
    pub summary: RunSummary,
}

/// Message from a worker back to the coordinator
#[derive(Debug)]
enum WorkerEvent {
    Resolved { item: WorkItem, outcome: PageOutcome },
    Requeue { item: WorkItem },
}

pub struct ExtractionPipeline<S: BrowserSubstrate> {
    config: ExtractorConfig,
    substrate: Arc<S>,
    markup: Arc<PageMarkup>,
    categories: Vec<Category>,
}

impl<S: BrowserSubstrate> ExtractionPipeline<S> {
    pub fn new(config: ExtractorConfig, substrate: Arc<S>) -> Result<Self, PipelineError> {
        let markup = Arc::new(PageMarkup::compile(&config.selectors)?);
        let categories = Category::from_names(&config.categories);
        Ok(Self {
            config,
            substrate,
            markup,
            categories,
        })
    }

    /// Fresh accumulator for one run of this pipeline
    #[must_use]
    pub fn new_aggregator(&self) -> Arc<ResultAggregator> {
        Arc::new(ResultAggregator::new(&self.categories))
    }

    /// Runs one extraction into `aggregator`.
    ///
    /// On error the aggregator still holds everything that was gathered and
    /// can be finalized by the caller.
    pub async fn run(&self, aggregator: Arc<ResultAggregator>) -> Result<RunReport, PipelineError> {
        let crawl = &self.config.crawl;
        info!(
            "🚀 Starting extraction: {} categories, {} workers, page cap {}",
            self.categories.len(),
            crawl.worker_pool_size,
            crawl.max_pages_per_category
        );

        let gate = Arc::new(SessionGate::new(
            Arc::clone(&self.substrate),
            Arc::clone(&self.markup),
            self.config.site.entry_url(),
            GatePolicy {
                max_attempts: self.config.gate.max_attempts,
                wait: WaitPolicy::new(
                    Duration::from_millis(self.config.gate.timeout_ms),
                    Duration::from_millis(self.config.gate.poll_interval_ms),
                ),
                session_max_age: crawl.session_max_age(),
            },
        ));

        if let Err(gate_error) = gate.acquire().await {
            error!("🚫 Could not open a session: {}", gate_error);
            for category in &self.categories {
                aggregator.set_category_status(category.rank(), CategoryStatus::Cancelled).await;
            }
            aggregator.mark_aborted(gate_error.to_string()).await;
            return Err(PipelineError::Gate(gate_error));
        }

        let scheduler = CategoryScheduler::new(
            self.config.site.entry_url(),
            crawl.max_pages_per_category,
            crawl.fetch_details,
        );
        let mut schedule = scheduler.schedule(self.categories.clone());

        let cancel = CancellationToken::new();
        let context = Arc::new(WorkerContext {
            gate: Arc::clone(&gate),
            fetcher: ProductFetcher::new(
                Arc::clone(&self.substrate),
                Arc::clone(&self.markup),
                WaitPolicy::new(crawl.page_wait_timeout(), crawl.poll_interval()),
            ),
            retry: RetryController::new(self.config.retry.clone()),
            aggregator: Arc::clone(&aggregator),
            cancel: cancel.clone(),
            fatal: OnceLock::new(),
            max_requeues: crawl.max_requeues,
        });

        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(crawl.queue_capacity.max(1));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..crawl.worker_pool_size.max(1) {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&context),
                Arc::clone(&work_rx),
                event_tx.clone(),
            ));
        }
        drop(event_tx);

        let mut worker_failure = None;
        while !schedule.is_finished() {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        worker_failure = Some("every worker exited with work in flight".to_string());
                        break;
                    };
                    apply_event(&mut schedule, &aggregator, event).await;
                }
                permit = work_tx.reserve(), if schedule.has_ready() => {
                    let Ok(permit) = permit else {
                        worker_failure = Some("work queue closed".to_string());
                        break;
                    };
                    if let Some(item) = schedule.next_item() {
                        debug!("📤 Queued {}", item);
                        aggregator.record_scheduled(&item).await;
                        permit.send(item);
                    }
                }
                () = cancel.cancelled(), if !schedule.is_cancelled() => {
                    for item in schedule.cancel_all() {
                        aggregator.record_resolved(&item, Resolution::Discarded).await;
                    }
                }
                Some(joined) = workers.join_next() => {
                    if let Err(join_error) = joined {
                        error!("💥 Worker task failed: {}", join_error);
                        cancel.cancel();
                        worker_failure = Some(join_error.to_string());
                        break;
                    }
                }
            }
        }

        drop(work_tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(join_error) = joined {
                error!("💥 Worker task failed: {}", join_error);
                worker_failure.get_or_insert_with(|| join_error.to_string());
            }
        }

        aggregator.apply_progress(&schedule.progress()).await;
        aggregator.set_session_reacquisitions(gate.reacquisitions()).await;

        if let Some(message) = worker_failure {
            aggregator.mark_aborted(message.clone()).await;
            return Err(PipelineError::Worker(message));
        }
        if let Some(gate_error) = context.fatal.get() {
            error!("🚫 Run aborted: {}", gate_error);
            aggregator.mark_aborted(gate_error.to_string()).await;
            return Err(PipelineError::Gate(gate_error.clone()));
        }

        let progress = schedule.progress();
        if !progress.is_empty() && progress.iter().all(|entry| entry.status == CategoryStatus::Failed) {
            error!("🚫 Every category failed; aborting run");
            aggregator.mark_aborted("all categories failed").await;
            return Err(PipelineError::AllCategoriesFailed {
                attempted: progress.len(),
            });
        }

        let (dataset, mut summary) = aggregator.finalize().await?;
        let (dataset, filtered_out) = apply_filters(&self.config.filters, &dataset);
        summary.records_filtered_out = filtered_out;

        info!(
            "🎉 Extraction finished: {} products, {} pages fetched, {} failed, {} retries",
            dataset.len(),
            summary.pages_fetched,
            summary.pages_failed,
            summary.retries
        );
        Ok(RunReport { dataset, summary })
    }
}

async fn apply_event(schedule: &mut Schedule, aggregator: &ResultAggregator, event: WorkerEvent) {
    match event {
        WorkerEvent::Resolved { item, outcome } => schedule.on_outcome(&item.category, outcome),
        WorkerEvent::Requeue { item } => {
            if schedule.is_cancelled() {
                aggregator.record_resolved(&item, Resolution::Discarded).await;
                let page = item.page();
                schedule.on_outcome(&item.category, PageOutcome::Discarded { page });
            } else {
                debug!("↩️ Requeued {}", item);
                schedule.requeue(item);
            }
        }
    }
}

struct WorkerContext<S: BrowserSubstrate> {
    gate: Arc<SessionGate<S>>,
    fetcher: ProductFetcher<S>,
    retry: RetryController,
    aggregator: Arc<ResultAggregator>,
    cancel: CancellationToken,
    /// First fatal gate failure; set once, ends the run
    fatal: OnceLock<GateError>,
    max_requeues: u32,
}

async fn worker_loop<S: BrowserSubstrate>(
    worker_id: usize,
    context: Arc<WorkerContext<S>>,
    queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    debug!("👷 Worker {} started", worker_id);
    loop {
        let next = queue.lock().await.recv().await;
        let Some(item) = next else { break };
        let event = context.process(item).await;
        if events.send(event).is_err() {
            break;
        }
    }
    debug!("👷 Worker {} stopped", worker_id);
}

impl<S: BrowserSubstrate> WorkerContext<S> {
    async fn process(&self, mut item: WorkItem) -> WorkerEvent {
        if self.cancel.is_cancelled() {
            return self.discard(item).await;
        }

        let observed_generation = &AtomicU64::new(0);
        let gate = &*self.gate;
        let fetcher = &self.fetcher;
        let label = item.to_string();
        let target = &item;
        let outcome = self
            .retry
            .run(&label, &self.cancel, move |_attempt| async move {
                let session = gate.acquire().await?;
                observed_generation.store(session.generation(), Ordering::SeqCst);
                fetcher.fetch(target, &session).await
            })
            .await;

        item.attempt += outcome.attempts;
        let retries = item.attempt.saturating_sub(item.requeues + 1);
        match outcome.result {
            Ok(page) => self.resolve_fetched(item, page, retries).await,
            Err(error) if error.kind() == FetchErrorKind::GateReappeared => {
                self.handle_gate_reappeared(item, error, observed_generation.load(Ordering::SeqCst))
                    .await
            }
            Err(error) => self.resolve_failed(item, &error, retries).await,
        }
    }

    async fn resolve_fetched(&self, item: WorkItem, page: FetchedPage, retries: u32) -> WorkerEvent {
        let records: Vec<NormalizedRecord> = page.records.into_iter().map(normalize).collect();
        let detail_candidates = if item.is_listing() {
            detail_candidates(&records)
        } else {
            Vec::new()
        };

        if let Err(accumulate_error) = self.aggregator.accumulate(records).await {
            error!("❌ Dropping records from {}: {}", item, accumulate_error);
        }
        self.aggregator.record_resolved(&item, Resolution::Fetched { retries }).await;

        let outcome = match item.page() {
            Some(page_number) => PageOutcome::Listed {
                page: page_number,
                signal: page.signal,
                tiles: page.tiles,
                detail_candidates,
            },
            None => PageOutcome::DetailResolved,
        };
        WorkerEvent::Resolved { item, outcome }
    }

    async fn resolve_failed(&self, item: WorkItem, error: &FetchError, retries: u32) -> WorkerEvent {
        if let Some(gate_error) = error.fatal_gate_error() {
            self.abort(gate_error.clone());
        } else if self.cancel.is_cancelled() {
            return self.discard(item).await;
        }

        warn!("❌ {} failed after {} attempts: {}", item, item.attempt, error);
        self.aggregator.record_resolved(&item, Resolution::Failed { retries }).await;
        let outcome = match item.page() {
            Some(page) => PageOutcome::Failed {
                page,
                kind: error.kind(),
            },
            None => PageOutcome::DetailResolved,
        };
        WorkerEvent::Resolved { item, outcome }
    }

    async fn handle_gate_reappeared(&self, mut item: WorkItem, error: FetchError, stale_generation: u64) -> WorkerEvent {
        let retries = item.attempt.saturating_sub(item.requeues + 1);
        if item.requeues >= self.max_requeues {
            warn!("⚠️ {} lost its session {} times; giving up", item, item.requeues + 1);
            return self.resolve_failed(item, &error, retries).await;
        }

        if let Err(gate_error) = self.gate.reacquire(stale_generation).await {
            if gate_error.is_fatal() {
                let error = FetchError::Gate(gate_error);
                return self.resolve_failed(item, &error, retries).await;
            }
            warn!("⚠️ Session re-acquisition failed, requeueing anyway: {}", gate_error);
        }

        item.requeues += 1;
        self.aggregator.record_requeue().await;
        WorkerEvent::Requeue { item }
    }

    async fn discard(&self, item: WorkItem) -> WorkerEvent {
        self.aggregator.record_resolved(&item, Resolution::Discarded).await;
        let page = item.page();
        WorkerEvent::Resolved {
            item,
            outcome: PageOutcome::Discarded { page },
        }
    }

    fn abort(&self, gate_error: GateError) {
        if self.fatal.set(gate_error).is_ok() {
            error!("🚫 Fatal gate failure; cancelling remaining work");
        }
        self.cancel.cancel();
    }
}

/// Detail pages worth fetching: records missing optional fields that have
/// a URL-derived identity
fn detail_candidates(records: &[NormalizedRecord]) -> Vec<DetailCandidate> {
    records
        .iter()
        .filter(|record| !record.is_complete() && !record.identity_key.is_fallback())
        .filter(|record| !record.product_url.is_empty())
        .map(|record| DetailCandidate {
            key: record.identity_key.clone(),
            url: record.product_url.clone(),
        })
        .collect()
}
