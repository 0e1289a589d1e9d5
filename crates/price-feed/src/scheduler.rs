//! Polling scheduler
//!
//! Drives pull-based sources on fixed intervals and feeds their results into
//! the router. An empty result means the upstream failed this cycle and is
//! never ingested, so the last good quotes stay in the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use mktdata_core::Quote;

use crate::providers::QuoteSource;
use crate::state::QuoteRouter;

struct PollJob {
    name: String,
    handle: JoinHandle<()>,
}

/// Owns every interval task it spawns; `stop` cancels them all.
pub struct PollingScheduler {
    router: Arc<QuoteRouter>,
    jobs: Mutex<Vec<PollJob>>,
}

impl PollingScheduler {
    pub fn new(router: Arc<QuoteRouter>) -> Self {
        Self {
            router,
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Run `fetch` every `period`, first after one full period.
    pub fn every<F, Fut>(&self, name: impl Into<String>, period: Duration, fetch: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Quote>> + Send + 'static,
    {
        let name = name.into();
        let period = period.max(Duration::from_millis(1));
        let router = Arc::clone(&self.router);
        let job_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let quotes = fetch().await;
                if quotes.is_empty() {
                    debug!("[Scheduler] {} produced no data, keeping cached quotes", job_name);
                    continue;
                }
                let committed = router.ingest(quotes);
                debug!("[Scheduler] {} ingested {} quotes", job_name, committed.len());
            }
        });

        info!("[Scheduler] Registered {} every {:?}", name, period);
        self.jobs.lock().push(PollJob { name, handle });
    }

    /// Poll `source` for a fixed symbol list.
    pub fn poll_source(
        &self,
        source: Arc<dyn QuoteSource>,
        symbols: Vec<String>,
        period: Duration,
    ) {
        let name = source.name().to_string();
        let symbols = Arc::new(symbols);
        self.every(name, period, move || {
            let source = Arc::clone(&source);
            let symbols = Arc::clone(&symbols);
            async move { source.fetch_quotes(&symbols).await }
        });
    }

    /// Cancel every interval task.
    pub fn stop(&self) {
        let jobs: Vec<PollJob> = self.jobs.lock().drain(..).collect();
        for job in &jobs {
            job.handle.abort();
            debug!("[Scheduler] Stopped {}", job.name);
        }
        if !jobs.is_empty() {
            info!("[Scheduler] Stopped {} jobs", jobs.len());
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        for job in self.jobs.get_mut().drain(..) {
            job.handle.abort();
        }
    }
}
