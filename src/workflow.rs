//! Admin event execution.
//!
//! `Workflow::execute` claims a NEW event, runs the operation it carries
//! against the registry and the ingestion pipeline, and records the terminal
//! state. Errors from the operation end up on the event; they are not
//! returned to the dispatcher.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::download::Fetcher;
use crate::error::{Error, Result};
use crate::events::EventStore;
use crate::index::ClassIndex;
use crate::model::{
    AdminEvent, ApiOperation, ApiRecord, ApiSpec, ApiTarget, EventState, STANDARD_LIBRARY,
};
use crate::pipeline::{IngestReport, Pipeline, PipelineConfig};
use crate::progress::ProgressSink;
use crate::registry::ApiRegistry;
use crate::store::IndexStore;

/// Why an operation failed, and whether the requester already saw a final
/// status line for it.
struct Failed {
    error: Error,
    reported: bool,
}

impl Failed {
    fn reported(error: Error) -> Self {
        Self {
            error,
            reported: true,
        }
    }
}

impl From<Error> for Failed {
    fn from(error: Error) -> Self {
        Self {
            error,
            reported: false,
        }
    }
}

type Outcome = std::result::Result<(), Failed>;

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub pipeline: PipelineConfig,
    pub download_dir: PathBuf,
    /// Runtime install whose bundled sources back the standard library API.
    pub runtime_home: Option<PathBuf>,
    /// Drop class records left behind by DELETE and RELOAD.
    pub purge_orphans: bool,
}

impl WorkflowConfig {
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            download_dir,
            runtime_home: None,
            purge_orphans: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    registry: ApiRegistry,
    classes: ClassIndex,
    events: EventStore,
    pipeline: Pipeline,
    fetcher: Fetcher,
    runtime_home: Option<PathBuf>,
    purge_orphans: bool,
}

impl Workflow {
    pub fn new(store: &IndexStore, config: WorkflowConfig) -> Self {
        let classes = store.classes();
        Self {
            registry: store.registry(),
            pipeline: Pipeline::new(classes.clone(), config.pipeline),
            classes,
            events: store.events(),
            fetcher: Fetcher::new(config.download_dir),
            runtime_home: config.runtime_home,
            purge_orphans: config.purge_orphans,
        }
    }

    pub fn registry(&self) -> &ApiRegistry {
        &self.registry
    }

    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Persists a NEW event for later dispatch.
    pub fn submit(&self, requested_by: &str, operation: ApiOperation) -> Result<Uuid> {
        self.events.submit(AdminEvent::new(requested_by, operation))
    }

    /// Runs one NEW event to a terminal state and returns that state.
    ///
    /// Only claiming the event and recording its outcome can fail here;
    /// failures of the operation itself become a FAILED event.
    pub fn execute(&self, id: Uuid, sink: &dyn ProgressSink) -> Result<EventState> {
        let event = self.events.claim(id)?;
        tracing::info!(
            event_id = %id,
            requested_by = %event.requested_by,
            event_type = ?event.event_type(),
            "processing event"
        );

        let finished = match self.apply(&event.operation, sink) {
            Ok(()) => self.finish(id, EventState::Completed, None)?,
            Err(Failed { error, reported }) => {
                tracing::error!(event_id = %id, error = %error, "event failed");
                if !reported {
                    sink.line(&format!(
                        "Failed to process {:?} request: {error}",
                        event.event_type()
                    ));
                }
                self.finish(id, EventState::Failed, Some(error.to_string()))?
            }
        };
        Ok(finished.state)
    }

    /// Records the terminal state, retrying once on a storage error.
    fn finish(&self, id: Uuid, state: EventState, error: Option<String>) -> Result<AdminEvent> {
        match self.events.transition(id, state, error.clone()) {
            Err(Error::Storage(err)) => {
                tracing::warn!(event_id = %id, state = %state, error = %err, "retrying terminal transition");
                self.events.transition(id, state, error).inspect_err(|err| {
                    tracing::error!(
                        event_id = %id,
                        state = %state,
                        error = %err,
                        "event left in PROCESSING"
                    );
                })
            }
            other => other,
        }
    }

    fn apply(&self, operation: &ApiOperation, sink: &dyn ProgressSink) -> Outcome {
        match operation {
            ApiOperation::Add(spec) => self.add(spec, sink),
            ApiOperation::Delete(target) => {
                self.delete(target)?;
                Ok(())
            }
            ApiOperation::Update {
                target,
                replacement,
            } => self.update(target, replacement.as_ref(), sink),
            ApiOperation::Reload(target) => self.reload(target, sink),
        }
    }

    fn add(&self, spec: &ApiSpec, sink: &dyn ProgressSink) -> Outcome {
        let api = self.build_record(spec);
        self.registry.save(&api)?;
        tracing::info!(api = %api.name, id = %api.id, "registered api");
        self.process(&api, sink)
    }

    /// Removes the target if it exists. A missing API is not an error.
    fn delete(&self, target: &ApiTarget) -> Result<Option<ApiRecord>> {
        let Some(api) = self.registry.resolve(target)? else {
            tracing::info!(api_target = %target, "nothing to delete");
            return Ok(None);
        };
        self.registry.delete(api.id)?;
        self.release_classes(&api)?;
        tracing::info!(api = %api.name, id = %api.id, "deleted api");
        Ok(Some(api))
    }

    fn update(
        &self,
        target: &ApiTarget,
        replacement: Option<&ApiSpec>,
        sink: &dyn ProgressSink,
    ) -> Outcome {
        let existing = self.delete(target)?;
        let spec = match (replacement, existing) {
            (Some(spec), _) => spec.clone(),
            (None, Some(api)) => ApiSpec {
                name: api.name,
                base_url: api.base_url,
                download_url: api.download_url,
            },
            (None, None) => {
                return Err(Error::ApiNotFound {
                    target: target.to_string(),
                }
                .into());
            }
        };
        self.add(&spec, sink)
    }

    fn reload(&self, target: &ApiTarget, sink: &dyn ProgressSink) -> Outcome {
        let Some(api) = self.registry.resolve(target)? else {
            tracing::info!(api_target = %target, "nothing to reload");
            return Ok(());
        };
        self.registry.delete(api.id)?;
        let fresh = api.with_fresh_identity();
        self.registry.save(&fresh)?;
        self.release_classes(&api)?;
        tracing::info!(api = %fresh.name, old_id = %api.id, id = %fresh.id, "reloading api");
        self.process(&fresh, sink)
    }

    fn process(&self, api: &ApiRecord, sink: &dyn ProgressSink) -> Outcome {
        let archive = self.fetcher.fetch(api)?;
        // from here on the pipeline has written the final status line
        let report = self
            .pipeline
            .ingest(api, &archive, sink)
            .map_err(Failed::reported)?;
        if report.success {
            Ok(())
        } else {
            Err(Failed::reported(self.incomplete(&report)))
        }
    }

    fn release_classes(&self, api: &ApiRecord) -> Result<()> {
        if self.purge_orphans {
            let purged = self.classes.purge(api.id)?;
            tracing::debug!(api = %api.name, id = %api.id, purged, "purged orphaned classes");
        }
        Ok(())
    }

    fn incomplete(&self, report: &IngestReport) -> Error {
        if report.drained {
            Error::IngestIncomplete {
                api: report.api.clone(),
                failed: report.items_failed(),
            }
        } else {
            Error::DrainTimeout {
                api: report.api.clone(),
                ceiling: self.pipeline.config().drain_ceiling,
            }
        }
    }

    /// The standard library's archive comes from the local runtime install.
    fn build_record(&self, spec: &ApiSpec) -> ApiRecord {
        let download_url = match (spec.name.as_str(), self.runtime_home.as_deref()) {
            (STANDARD_LIBRARY, Some(home)) => {
                format!("file://{}", standard_library_archive(home).display())
            }
            _ => spec.download_url.clone(),
        };
        ApiRecord::new(&spec.name, &spec.base_url, &download_url)
    }
}

/// `src.zip` of a runtime install. A trailing `jre` directory is stepped out
/// of, and `lib/src.zip` wins over `src.zip` when present.
pub fn standard_library_archive(runtime_home: &Path) -> PathBuf {
    let home = if runtime_home.file_name().is_some_and(|n| n == "jre") {
        runtime_home.parent().unwrap_or(runtime_home)
    } else {
        runtime_home
    };
    let modular = home.join("lib").join("src.zip");
    if modular.exists() {
        modular
    } else {
        home.join("src.zip")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PoolConfig;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;

    /// Reports the start and end of class processing to the test thread and
    /// holds the run at the start until the test thread answers.
    struct Handshake {
        events: Mutex<Sender<&'static str>>,
        resume: Mutex<Receiver<()>>,
    }

    impl ProgressSink for Handshake {
        fn line(&self, line: &str) {
            let Ok(events) = self.events.lock() else {
                return;
            };
            if line == "Starting class processing" {
                let _ = events.send("started");
                if let Ok(resume) = self.resume.lock() {
                    let _ = resume.recv();
                }
            } else if line.starts_with("Finished importing") {
                let _ = events.send(if line.ends_with("FAILURE!") { "failure" } else { "success" });
            }
        }
    }

    #[test]
    fn undrained_ingestion_records_drain_timeout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = IndexStore::open(dir.path().join("index.lmdb"))?;
        let jar = dir.path().join("demo.jar");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&jar)?);
            zip.start_file("org/example/A.java", zip::write::FileOptions::default())?;
            zip.write_all(b"package org.example;\npublic class A {}\n")?;
            zip.finish()?;
        }

        let mut config = WorkflowConfig::new(dir.path().join("downloads"));
        config.pipeline = PipelineConfig {
            pool: PoolConfig {
                core_threads: 1,
                max_threads: 1,
                queue_capacity: 4,
                keep_alive: Duration::from_millis(50),
                thread_name: "workflow-test".to_string(),
            },
            enqueue_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            drain_ceiling: Duration::from_millis(100),
            shutdown_timeout: Duration::from_millis(50),
        };
        let workflow = Workflow::new(&store, config);
        let id = workflow.submit(
            "admin",
            ApiOperation::Add(ApiSpec {
                name: "Demo".to_string(),
                base_url: "http://example.org/".to_string(),
                download_url: jar.display().to_string(),
            }),
        )?;

        let (events_tx, events_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let handle = {
            let workflow = workflow.clone();
            std::thread::spawn(move || {
                let sink = Handshake {
                    events: Mutex::new(events_tx),
                    resume: Mutex::new(resume_rx),
                };
                workflow.execute(id, &sink)
            })
        };

        assert_eq!(events_rx.recv_timeout(Duration::from_secs(10))?, "started");
        // parse workers block on upsert until this transaction ends
        let wtxn = store.env().write_txn()?;
        resume_tx.send(())?;
        assert_eq!(events_rx.recv_timeout(Duration::from_secs(10))?, "failure");
        drop(wtxn);

        let state = handle
            .join()
            .map_err(|_| anyhow::anyhow!("workflow thread panicked"))??;
        assert_eq!(state, EventState::Failed);
        let event = workflow
            .events()
            .get(id)?
            .ok_or_else(|| anyhow::anyhow!("event missing"))?;
        assert!(event.error.is_some_and(|e| e.contains("did not drain")));
        Ok(())
    }

    #[test]
    fn standard_library_archive_steps_out_of_jre() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jdk = dir.path().join("jdk8");
        std::fs::create_dir_all(jdk.join("jre"))?;

        assert_eq!(standard_library_archive(&jdk.join("jre")), jdk.join("src.zip"));
        assert_eq!(standard_library_archive(&jdk), jdk.join("src.zip"));

        std::fs::create_dir_all(jdk.join("lib"))?;
        std::fs::write(jdk.join("lib").join("src.zip"), b"")?;
        assert_eq!(standard_library_archive(&jdk), jdk.join("lib").join("src.zip"));
        Ok(())
    }
}
