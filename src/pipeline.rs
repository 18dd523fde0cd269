//! Archive ingestion.
//!
//! Streams an API's source archive through a per-run worker pool: the driving
//! thread enumerates source units and queues parse tasks, workers parse and
//! upsert class metadata, and the driver waits for the pool to drain before
//! shutting it down and deleting the local archive copy.
//!
//! Per-entry problems (queue timeouts, parse errors) degrade the verdict to
//! FAILURE without stopping the run. Archive I/O errors abort it.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::archive::{AllowList, for_each_source};
use crate::error::{Error, Result};
use crate::index::ClassIndex;
use crate::model::ApiRecord;
use crate::parser::parse_for;
use crate::progress::ProgressSink;
use crate::queue::{PoolConfig, WorkerPool};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pool: PoolConfig,
    pub enqueue_timeout: Duration,
    pub poll_interval: Duration,
    pub drain_ceiling: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            enqueue_timeout: Duration::from_secs(3 * 60),
            poll_interval: Duration::from_secs(5),
            drain_ceiling: Duration::from_secs(30 * 60),
            shutdown_timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub api: String,
    pub queued: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dropped: usize,
    pub drained: bool,
    pub success: bool,
}

impl IngestReport {
    /// Entries that did not make it into the index.
    pub fn items_failed(&self) -> usize {
        self.failed + self.dropped
    }
}

struct ParseTask {
    entry: String,
    text: String,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    index: ClassIndex,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(index: ClassIndex, config: PipelineConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Indexes every allow-listed source unit in `archive`, then deletes it.
    pub fn ingest(
        &self,
        api: &ApiRecord,
        archive: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<IngestReport> {
        let outcome = self.run(api, archive, sink);
        if let Err(err) = std::fs::remove_file(archive) {
            tracing::warn!(path = %archive.display(), error = %err, "failed to remove archive copy");
        }

        let succeeded = outcome.as_ref().is_ok_and(|report| report.success);
        sink.line(&format!(
            "Finished importing {}.  {}!",
            api.name,
            if succeeded { "SUCCESS" } else { "FAILURE" }
        ));
        let report = outcome?;
        tracing::info!(
            api = %api.name,
            queued = report.queued,
            indexed = report.indexed,
            failed = report.failed,
            dropped = report.dropped,
            success = report.success,
            "ingestion finished"
        );
        Ok(report)
    }

    fn run(&self, api: &ApiRecord, archive: &Path, sink: &dyn ProgressSink) -> Result<IngestReport> {
        let allow = AllowList::for_api(api);
        let indexed = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));

        let pool = {
            let index = self.index.clone();
            let api = api.clone();
            let allow = allow.clone();
            let indexed = Arc::clone(&indexed);
            let skipped = Arc::clone(&skipped);
            WorkerPool::new(self.config.pool.clone(), move |task: ParseTask| {
                let parsed = parse_for(&task.text, &allow).map_err(|err| match err {
                    Error::Parse { reason, .. } => Error::parse(task.entry.as_str(), reason),
                    other => other,
                })?;
                match parsed {
                    Some(declaration) => {
                        index.upsert(&api, &declaration)?;
                        indexed.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(entry = %task.entry, "package outside allow-list");
                    }
                }
                Ok(())
            })
        };

        sink.line("Starting class processing");
        tracing::info!(api = %api.name, roots = ?allow.roots(), "starting class processing");

        let mut queued = 0usize;
        let mut dropped = 0usize;
        let walked = for_each_source(archive, &allow, |entry| {
            let path = entry.path.clone();
            match pool.submit_timeout(
                ParseTask {
                    entry: entry.path,
                    text: entry.text,
                },
                self.config.enqueue_timeout,
            ) {
                Ok(()) => queued += 1,
                Err(rejected) => {
                    dropped += 1;
                    let err = Error::EnqueueTimeout {
                        entry: path.clone(),
                        waited: self.config.enqueue_timeout,
                    };
                    tracing::warn!(api = %api.name, error = %err, ?rejected, "dropping source unit");
                    sink.line(&format!("Failed to queue class {path}"));
                }
            }
            Ok(())
        });

        if let Err(err) = walked {
            tracing::error!(api = %api.name, error = %err, "archive walk failed");
            self.shutdown(&pool, api);
            return Err(err);
        }

        let drained = pool.wait_drained(
            self.config.poll_interval,
            self.config.drain_ceiling,
            |pending| {
                sink.line(&format!(
                    "Waiting on {} work queue to drain.  {} items left",
                    api.name, pending
                ));
            },
        );
        if !drained {
            let err = Error::DrainTimeout {
                api: api.name.clone(),
                ceiling: self.config.drain_ceiling,
            };
            tracing::error!(error = %err, pending = pool.pending(), "giving up on work queue");
        }
        self.shutdown(&pool, api);

        let failed = pool.stats().failed.load(Ordering::Relaxed);
        Ok(IngestReport {
            api: api.name.clone(),
            queued,
            indexed: indexed.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
            failed,
            dropped,
            drained,
            success: drained && failed == 0 && dropped == 0,
        })
    }

    fn shutdown(&self, pool: &WorkerPool<ParseTask>, api: &ApiRecord) {
        if !pool.shutdown(self.config.shutdown_timeout) {
            tracing::error!(
                api = %api.name,
                timeout = ?self.config.shutdown_timeout,
                pending = pool.pending(),
                "worker pool still busy after shutdown wait"
            );
        }
    }
}
