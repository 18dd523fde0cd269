use javadoc_index::dispatch::{DispatchConfig, Dispatcher};
use javadoc_index::events::EventStore;
use javadoc_index::model::{AdminEvent, ApiOperation, ApiSpec, ApiTarget, EventState};
use javadoc_index::pipeline::PipelineConfig;
use javadoc_index::progress::{MemorySink, ProgressSink};
use javadoc_index::queue::PoolConfig;
use javadoc_index::store::IndexStore;
use javadoc_index::workflow::{Workflow, WorkflowConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn write_jar(path: &Path, entries: &[(&str, &str)]) -> anyhow::Result<()> {
    use std::io::Write;
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content.as_bytes())?;
    }
    zip.finish()?;
    Ok(())
}

fn servlet_sources() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "javax/servlet/Servlet.java",
            "package javax.servlet;\npublic interface Servlet {\n  void init(ServletConfig config) throws ServletException;\n  void destroy();\n}\n",
        ),
        (
            "javax/servlet/ServletConfig.java",
            "package javax.servlet;\npublic interface ServletConfig {\n  String getServletName();\n}\n",
        ),
        (
            "javax/servlet/http/HttpServlet.java",
            "package javax.servlet.http;\npublic abstract class HttpServlet {\n  protected void doGet(HttpServletRequest req, HttpServletResponse resp) {}\n}\n",
        ),
        ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n"),
    ]
}

struct Harness {
    dir: tempfile::TempDir,
    store: IndexStore,
    workflow: Workflow,
}

impl Harness {
    fn new() -> anyhow::Result<Self> {
        Self::with_runtime_home(None)
    }

    fn with_runtime_home(runtime_home: Option<PathBuf>) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = IndexStore::open(dir.path().join("index.lmdb"))?;
        let mut config = WorkflowConfig::new(dir.path().join("downloads"));
        config.pipeline = fast_pipeline();
        config.runtime_home = runtime_home;
        let workflow = Workflow::new(&store, config);
        Ok(Self {
            dir,
            store,
            workflow,
        })
    }

    fn jar(&self, name: &str, entries: &[(&str, &str)]) -> anyhow::Result<PathBuf> {
        let path = self.dir.path().join("published").join(name);
        write_jar(&path, entries)?;
        Ok(path)
    }

    fn run(&self, operation: ApiOperation) -> anyhow::Result<(Uuid, EventState, MemorySink)> {
        let id = self.workflow.submit("admin", operation)?;
        let sink = MemorySink::new();
        let state = self.workflow.execute(id, &sink)?;
        Ok((id, state, sink))
    }
}

fn fast_pipeline() -> PipelineConfig {
    PipelineConfig {
        pool: PoolConfig {
            core_threads: 2,
            max_threads: 4,
            queue_capacity: 8,
            keep_alive: Duration::from_millis(50),
            thread_name: "it-worker".to_string(),
        },
        enqueue_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(20),
        drain_ceiling: Duration::from_secs(60),
        shutdown_timeout: Duration::from_secs(10),
    }
}

fn add(name: &str, jar: &Path) -> ApiOperation {
    ApiOperation::Add(ApiSpec {
        name: name.to_string(),
        base_url: "http://example.org/docs".to_string(),
        download_url: format!("file://{}", jar.display()),
    })
}

#[test]
fn add_indexes_every_source_unit() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let jar = h.jar("servlet.jar", &servlet_sources())?;

    let (id, state, sink) = h.run(add("Servlet", &jar))?;
    assert_eq!(state, EventState::Completed);
    assert_eq!(sink.last().as_deref(), Some("Finished importing Servlet.  SUCCESS!"));

    let api = h
        .workflow
        .registry()
        .find_by_name("servlet")?
        .ok_or_else(|| anyhow::anyhow!("api not registered"))?;
    assert_eq!(api.base_url, "http://example.org/docs/Servlet/");
    assert_eq!(h.workflow.classes().count(api.id)?, 3);

    let servlet = h.workflow.classes().get_class(&api, "javax.servlet.Servlet")?;
    assert!(servlet.parsed);
    assert_eq!(servlet.methods_named("init").count(), 1);
    assert_eq!(
        servlet.doc_url(&api),
        "http://example.org/docs/Servlet/javax/servlet/Servlet.html"
    );

    let event = h
        .workflow
        .events()
        .get(id)?
        .ok_or_else(|| anyhow::anyhow!("event missing"))?;
    assert!(event.completed.is_some());
    assert!(event.error.is_none());

    // the published archive stays; only the private copy is removed
    assert!(jar.exists());
    assert_eq!(std::fs::read_dir(h.dir.path().join("downloads"))?.count(), 0);
    Ok(())
}

#[test]
fn malformed_unit_fails_the_event_but_keeps_the_rest() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let mut sources = servlet_sources();
    sources.push((
        "javax/servlet/Broken.java",
        "package javax.servlet;\npublic class Broken { void oops( }\n",
    ));
    let jar = h.jar("servlet.jar", &sources)?;

    let (id, state, sink) = h.run(add("Servlet", &jar))?;
    assert_eq!(state, EventState::Failed);
    assert_eq!(sink.last().as_deref(), Some("Finished importing Servlet.  FAILURE!"));

    let api = h
        .workflow
        .registry()
        .find_by_name("Servlet")?
        .ok_or_else(|| anyhow::anyhow!("api not registered"))?;
    assert_eq!(h.workflow.classes().count(api.id)?, 3);

    let event = h
        .workflow
        .events()
        .get(id)?
        .ok_or_else(|| anyhow::anyhow!("event missing"))?;
    assert!(event.error.is_some_and(|e| e.contains("Servlet")));
    Ok(())
}

#[test]
fn duplicate_name_is_rejected_case_insensitively() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let jar = h.jar("servlet.jar", &servlet_sources())?;

    assert_eq!(h.run(add("Servlet", &jar))?.1, EventState::Completed);
    let (id, state, _) = h.run(add("SERVLET", &jar))?;
    assert_eq!(state, EventState::Failed);
    let event = h
        .workflow
        .events()
        .get(id)?
        .ok_or_else(|| anyhow::anyhow!("event missing"))?;
    assert!(event.error.is_some_and(|e| e.contains("already exists")));
    assert_eq!(h.workflow.registry().list()?.len(), 1);
    Ok(())
}

#[test]
fn reload_assigns_new_identity_and_reindexes() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let jar = h.jar("servlet.jar", &servlet_sources())?;
    h.run(add("Servlet", &jar))?;
    let before = h
        .workflow
        .registry()
        .find_by_name("Servlet")?
        .ok_or_else(|| anyhow::anyhow!("api not registered"))?;

    let (_, state, _) = h.run(ApiOperation::Reload(ApiTarget::by_name("Servlet")))?;
    assert_eq!(state, EventState::Completed);

    let after = h
        .workflow
        .registry()
        .find_by_name("Servlet")?
        .ok_or_else(|| anyhow::anyhow!("api missing after reload"))?;
    assert_ne!(before.id, after.id);
    assert_eq!(before.base_url, after.base_url);
    assert_eq!(h.workflow.classes().count(after.id)?, 3);
    assert_eq!(h.workflow.classes().count(before.id)?, 0);
    assert!(
        h.workflow
            .classes()
            .get_class(&after, "javax.servlet.http.HttpServlet")?
            .parsed
    );
    Ok(())
}

#[test]
fn update_replaces_urls_and_reindexes() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let v1 = h.jar("servlet-1.jar", &servlet_sources())?;
    let v2 = h.jar(
        "servlet-2.jar",
        &[(
            "javax/servlet/Filter.java",
            "package javax.servlet;\npublic interface Filter { void destroy(); }\n",
        )],
    )?;
    h.run(add("Servlet", &v1))?;

    let replacement = ApiSpec {
        name: "Servlet".to_string(),
        base_url: "http://example.org/v2".to_string(),
        download_url: v2.display().to_string(),
    };
    let (_, state, _) = h.run(ApiOperation::Update {
        target: ApiTarget::by_name("Servlet"),
        replacement: Some(replacement),
    })?;
    assert_eq!(state, EventState::Completed);

    let api = h
        .workflow
        .registry()
        .find_by_name("Servlet")?
        .ok_or_else(|| anyhow::anyhow!("api missing after update"))?;
    assert_eq!(api.base_url, "http://example.org/v2/Servlet/");
    let names: Vec<_> = h
        .workflow
        .classes()
        .classes(api.id)?
        .into_iter()
        .map(|c| c.qualified_name())
        .collect();
    assert_eq!(names, vec!["javax.servlet.Filter".to_string()]);
    Ok(())
}

#[test]
fn deleting_unknown_api_completes_without_changes() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let jar = h.jar("servlet.jar", &servlet_sources())?;
    h.run(add("Servlet", &jar))?;

    let (_, state, _) = h.run(ApiOperation::Delete(ApiTarget::by_name("Nope")))?;
    assert_eq!(state, EventState::Completed);
    assert_eq!(h.workflow.registry().list()?.len(), 1);

    let (_, state, _) = h.run(ApiOperation::Delete(ApiTarget::by_name("servlet")))?;
    assert_eq!(state, EventState::Completed);
    assert!(h.workflow.registry().list()?.is_empty());
    assert_eq!(h.store.stats()?.classes, 0);
    Ok(())
}

#[test]
fn missing_archive_fails_the_event() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let gone = h.dir.path().join("published").join("gone.jar");

    let (id, state, sink) = h.run(add("Gone", &gone))?;
    assert_eq!(state, EventState::Failed);
    // the pipeline never ran, so the workflow reports the failure itself
    assert!(
        sink.last()
            .is_some_and(|l| l.starts_with("Failed to process Add request:"))
    );
    let event = h
        .workflow
        .events()
        .get(id)?
        .ok_or_else(|| anyhow::anyhow!("event missing"))?;
    assert!(event.error.is_some_and(|e| e.contains("gone.jar")));
    Ok(())
}

#[test]
fn standard_library_reads_runtime_sources_within_core_namespaces() -> anyhow::Result<()> {
    let runtime = tempfile::tempdir()?;
    write_jar(
        &runtime.path().join("lib").join("src.zip"),
        &[
            (
                "java.base/java/lang/Integer.java",
                "package java.lang;\npublic final class Integer {\n  public static int parseInt(String s) { return 0; }\n}\n",
            ),
            (
                "java.base/java/lang/package-info.java",
                "package java.lang;\n",
            ),
            (
                "java.sql/javax/sql/DataSource.java",
                "package javax.sql;\npublic interface DataSource { }\n",
            ),
            (
                "jdk.internal/com/sun/Hidden.java",
                "package com.sun;\npublic class Hidden { }\n",
            ),
        ],
    )?;
    let h = Harness::with_runtime_home(Some(runtime.path().to_path_buf()))?;

    let (_, state, _) = h.run(ApiOperation::Add(ApiSpec {
        name: "JDK".to_string(),
        base_url: "http://docs.oracle.com/javase/8/docs/api".to_string(),
        download_url: String::new(),
    }))?;
    assert_eq!(state, EventState::Completed);

    let jdk = h
        .workflow
        .registry()
        .find_by_name("jdk")?
        .ok_or_else(|| anyhow::anyhow!("jdk not registered"))?;
    let mut names: Vec<_> = h
        .workflow
        .classes()
        .classes(jdk.id)?
        .into_iter()
        .map(|c| c.qualified_name())
        .collect();
    names.sort();
    assert_eq!(names, vec!["java.lang.Integer", "javax.sql.DataSource"]);
    assert!(runtime.path().join("lib").join("src.zip").exists());
    Ok(())
}

struct StateProbe {
    events: EventStore,
    id: Uuid,
    seen: Mutex<Vec<EventState>>,
}

impl ProgressSink for StateProbe {
    fn line(&self, _line: &str) {
        if let Ok(Some(event)) = self.events.get(self.id) {
            self.seen.lock().unwrap().push(event.state);
        }
    }
}

#[test]
fn event_is_processing_while_the_operation_runs() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let jar = h.jar("servlet.jar", &servlet_sources())?;

    let id = h.workflow.submit("admin", add("Servlet", &jar))?;
    assert_eq!(
        h.workflow.events().get(id)?.map(|e| e.state),
        Some(EventState::New)
    );

    let probe = StateProbe {
        events: h.workflow.events().clone(),
        id,
        seen: Mutex::new(Vec::new()),
    };
    let state = h.workflow.execute(id, &probe)?;
    assert_eq!(state, EventState::Completed);

    let seen = probe.seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|s| *s == EventState::Processing));

    // a terminal event cannot be claimed again
    assert!(h.workflow.execute(id, &MemorySink::new()).is_err());
    Ok(())
}

#[test]
fn concurrent_lookups_share_one_record() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let jar = h.jar("servlet.jar", &servlet_sources())?;
    h.run(add("Servlet", &jar))?;
    let api = Arc::new(
        h.workflow
            .registry()
            .find_by_name("Servlet")?
            .ok_or_else(|| anyhow::anyhow!("api not registered"))?,
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let classes = h.workflow.classes().clone();
            let api = Arc::clone(&api);
            std::thread::spawn(move || classes.get_class(&api, "javax.servlet.GenericServlet"))
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        let record = handle
            .join()
            .map_err(|_| anyhow::anyhow!("lookup thread panicked"))??;
        ids.push(record.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.workflow.classes().count(api.id)?, 4);
    Ok(())
}

#[test]
fn dispatcher_runs_pending_events_in_order() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let jar = h.jar("servlet.jar", &servlet_sources())?;
    let first = h.workflow.submit("alice", add("Servlet", &jar))?;
    let second = h
        .workflow
        .submit("bob", ApiOperation::Reload(ApiTarget::by_name("Servlet")))?;

    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&lines);
    let dispatcher = Dispatcher::new(Arc::new(h.workflow.clone()), DispatchConfig::default())
        .with_sinks(Arc::new(move |event: &AdminEvent| {
            captured.lock().unwrap().push(event.requested_by.clone());
            Box::new(MemorySink::new()) as Box<dyn ProgressSink>
        }));

    let summary = dispatcher.run_once()?;
    let processed: Vec<_> = summary.processed.iter().map(|e| (e.id, e.state)).collect();
    assert_eq!(
        processed,
        vec![
            (first, EventState::Completed),
            (second, EventState::Completed)
        ]
    );
    assert_eq!(*lines.lock().unwrap(), vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(summary.expired, 0);

    assert!(dispatcher.run_once()?.processed.is_empty());
    Ok(())
}

fn run_json(bin: &str, args: &[&str]) -> anyhow::Result<Value> {
    let out = Command::new(bin).args(args).output()?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

#[test]
fn cli_add_dispatch_and_lookup() -> anyhow::Result<()> {
    let bin = env!("CARGO_BIN_EXE_javadoc-index");
    let dir = tempfile::tempdir()?;
    let jar = dir.path().join("servlet.jar");
    write_jar(&jar, &servlet_sources())?;
    let db = dir.path().join("index.lmdb");
    let downloads = dir.path().join("downloads");
    let db_arg = db.to_string_lossy().to_string();
    let downloads_arg = downloads.to_string_lossy().to_string();
    let jar_arg = jar.to_string_lossy().to_string();
    let global = ["--db", db_arg.as_str(), "--downloads", downloads_arg.as_str()];
    let with = |rest: &[&str]| -> Vec<String> {
        global
            .iter()
            .chain(rest.iter())
            .map(|s| s.to_string())
            .collect()
    };
    let call = |rest: &[&str]| -> anyhow::Result<Value> {
        let args = with(rest);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_json(bin, &args)
    };

    let submitted = call(&[
        "add",
        "Servlet",
        "http://example.org/docs",
        "--download-url",
        jar_arg.as_str(),
        "--by",
        "carol",
    ])?;
    let event_id = submitted["event_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("no event id"))?
        .to_string();

    let event = call(&["event", event_id.as_str()])?;
    assert_eq!(event["state"], "NEW");
    assert_eq!(event["operation"]["type"], "ADD");

    let summary = call(&["dispatch", "--once"])?;
    assert_eq!(summary["processed"][0]["state"], "COMPLETED");

    let apis = call(&["apis"])?;
    assert_eq!(apis[0]["name"], "Servlet");

    let class = call(&["class", "servlet", "import javax.servlet.http.HttpServlet;"])?;
    assert_eq!(class["class"]["parsed"], true);
    assert_eq!(
        class["doc_url"],
        "http://example.org/docs/Servlet/javax/servlet/http/HttpServlet.html"
    );

    let stats = call(&["stats"])?;
    assert_eq!(stats["apis"], 1);
    assert_eq!(stats["classes"], 3);
    assert_eq!(stats["events_completed"], 1);
    Ok(())
}
