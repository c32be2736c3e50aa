//! Per-keyword harvesting workers over the shared session.
//!
//! Each accepted keyword gets one continuous worker: harvest every
//! configured handle (or globally), append to the keyword's output file,
//! sleep, repeat. Workers share the single browser session; the session
//! lease serializes actual page navigation, so workers interleave at
//! search granularity rather than racing mid-page.

mod allowlist;

pub use allowlist::AllowList;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::extract::{DedupIndex, EngineConfig, ExtractionEngine, LiveSearchSurface};
use crate::models::SearchQuery;
use crate::output::{keyword_file_name, OutputSink};
use crate::session::{SessionManager, SessionUnavailable};

/// Grace period for workers to finish their cycle on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Directory per-keyword output files live in.
    pub output_dir: PathBuf,
    /// Allow-list file, re-read on every submit so external edits apply
    /// without a restart. `None` means unrestricted.
    pub keywords_file: Option<PathBuf>,
    /// Sleep between harvest cycles.
    pub scrape_interval: Duration,
    pub engine: EngineConfig,
}

/// Per-keyword acceptance report for one scrape request.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutcome {
    pub accepted: Vec<String>,
    pub skipped: Vec<String>,
    /// Records written by the first cycle of each newly started worker.
    pub tweets_count: usize,
    pub filenames: Vec<String>,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    file_name: String,
}

/// Owns the keyword workers and the allow-list gate.
pub struct KeywordScheduler {
    session: Arc<SessionManager>,
    dedup: Arc<DedupIndex>,
    config: SchedulerConfig,
    /// Fallback gate when no allow-list file is configured. Tests inject
    /// a fixed list here.
    fixed_allow: AllowList,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    shutdown_tx: watch::Sender<bool>,
}

impl KeywordScheduler {
    pub fn new(
        session: Arc<SessionManager>,
        dedup: Arc<DedupIndex>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            session,
            dedup,
            config,
            fixed_allow: AllowList::unrestricted(),
            workers: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Scheduler with a fixed in-memory allow-list instead of a file.
    pub fn with_allow_list(
        session: Arc<SessionManager>,
        dedup: Arc<DedupIndex>,
        config: SchedulerConfig,
        allow: AllowList,
    ) -> Self {
        let mut scheduler = Self::new(session, dedup, config);
        scheduler.fixed_allow = allow;
        scheduler
    }

    fn allow_list(&self) -> AllowList {
        match &self.config.keywords_file {
            Some(path) => AllowList::load(path).unwrap_or_else(|e| {
                warn!("Failed to load allow-list, treating as unrestricted: {}", e);
                AllowList::unrestricted()
            }),
            None => self.fixed_allow.clone(),
        }
    }

    /// Accept or skip each requested keyword, starting (or confirming) one
    /// continuous worker per accepted keyword. Waits for newly started
    /// workers' first cycle so the caller can report an immediate record
    /// count; keywords already being harvested are accepted without one.
    pub async fn submit(&self, keywords: &[String], handles: &[String]) -> ScrapeOutcome {
        let allow = self.allow_list();

        let mut outcome = ScrapeOutcome::default();
        let mut first_cycles = Vec::new();

        let mut workers = self.workers.lock().await;
        for keyword in keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                continue;
            }

            if !allow.permits(keyword) {
                info!("Keyword '{}' not in allow-list, skipping", keyword);
                outcome.skipped.push(keyword.to_string());
                continue;
            }
            outcome.accepted.push(keyword.to_string());

            if let Some(existing) = workers.get(keyword) {
                if !existing.join.is_finished() {
                    info!("Worker for '{}' already running", keyword);
                    outcome.filenames.push(existing.file_name.clone());
                    continue;
                }
            }

            let file_name = keyword_file_name(keyword);
            let (first_tx, first_rx) = oneshot::channel();

            let join = tokio::spawn(worker_loop(
                keyword.to_string(),
                handles.to_vec(),
                Arc::clone(&self.session),
                Arc::clone(&self.dedup),
                self.config.engine.clone(),
                self.config.output_dir.join(&file_name),
                self.config.scrape_interval,
                self.shutdown_tx.subscribe(),
                first_tx,
            ));

            workers.insert(
                keyword.to_string(),
                WorkerHandle {
                    join,
                    file_name: file_name.clone(),
                },
            );
            outcome.filenames.push(file_name);
            first_cycles.push(first_rx);
        }
        drop(workers);

        for first_rx in first_cycles {
            if let Ok(written) = first_rx.await {
                outcome.tweets_count += written;
            }
        }

        outcome
    }

    /// Workers that have not finished on their own.
    pub async fn active_workers(&self) -> usize {
        let workers = self.workers.lock().await;
        workers.values().filter(|w| !w.join.is_finished()).count()
    }

    /// Flip the stop signal and wait for every worker to exit. Workers
    /// notice between cycles; a cycle in flight gets a grace period, then
    /// is aborted.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let mut workers = self.workers.lock().await;
        for (keyword, mut handle) in workers.drain() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle.join).await {
                Ok(_) => info!("Worker for '{}' stopped", keyword),
                Err(_) => {
                    warn!("Worker for '{}' did not stop in time, aborting", keyword);
                    handle.join.abort();
                }
            }
        }
    }
}

/// One keyword's continuous harvest loop.
#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    keyword: String,
    handles: Vec<String>,
    session: Arc<SessionManager>,
    dedup: Arc<DedupIndex>,
    engine_config: EngineConfig,
    output_path: PathBuf,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    first_cycle: oneshot::Sender<usize>,
) {
    info!("Worker started for '{}'", keyword);

    let mut sink = match OutputSink::open(&output_path) {
        Ok(sink) => sink,
        Err(e) => {
            warn!("Worker for '{}' cannot open output: {}", keyword, e);
            let _ = first_cycle.send(0);
            return;
        }
    };

    let engine = ExtractionEngine::new(engine_config);
    let mut first_cycle = Some(first_cycle);

    loop {
        let written = match run_cycle(&keyword, &handles, &session, &dedup, &engine, &mut sink)
            .await
        {
            Ok(written) => written,
            Err(e) if e.downcast_ref::<SessionUnavailable>().is_some() => {
                // Unrecoverable: the session is gone and the core never
                // recreates it. Other workers and the server keep running.
                warn!("Worker for '{}' stopping: {}", keyword, e);
                if let Some(tx) = first_cycle.take() {
                    let _ = tx.send(0);
                }
                return;
            }
            Err(e) => {
                warn!("Harvest cycle failed for '{}': {}", keyword, e);
                0
            }
        };

        if let Some(tx) = first_cycle.take() {
            let _ = tx.send(written);
        }

        if let Err(e) = dedup.save() {
            warn!("Failed to persist dedup snapshot: {}", e);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown_rx.borrow() {
            break;
        }
    }

    info!("Worker stopped for '{}'", keyword);
}

/// Harvest the keyword once across every configured handle (or globally),
/// appending results. Takes the session lease per search so concurrent
/// workers interleave between navigations.
async fn run_cycle(
    keyword: &str,
    handles: &[String],
    session: &SessionManager,
    dedup: &DedupIndex,
    engine: &ExtractionEngine,
    sink: &mut OutputSink,
) -> Result<usize> {
    let mut written = 0;

    if handles.is_empty() {
        let query = SearchQuery::new(keyword, None)?;
        let records = {
            let lease = session.lease().await?;
            let mut surface = LiveSearchSurface::new(&lease);
            engine.extract(&mut surface, &query, dedup).await?
        };
        written += sink.append(&records, keyword, None)?;
    } else {
        for handle in handles {
            let query = match SearchQuery::new(keyword, Some(handle.as_str())) {
                Ok(query) => query,
                Err(e) => {
                    warn!("Skipping handle '{}': {}", handle, e);
                    continue;
                }
            };
            let records = {
                let lease = session.lease().await?;
                let mut surface = LiveSearchSurface::new(&lease);
                engine.extract(&mut surface, &query, dedup).await?
            };
            written += sink.append(&records, keyword, query.handle())?;
        }
    }

    Ok(written)
}
