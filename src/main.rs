use anyhow::{Context, Result};
use clap::Parser;
use javadoc_index::cli::{Cli, Commands};
use javadoc_index::config::{
    clear_db, resolve_db_path, resolve_download_dir, resolve_runtime_home,
};
use javadoc_index::dispatch::{DispatchConfig, Dispatcher};
use javadoc_index::error::Error;
use javadoc_index::model::{ApiOperation, ApiSpec, ApiTarget};
use javadoc_index::store::IndexStore;
use javadoc_index::workflow::{Workflow, WorkflowConfig};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command.clone() {
        Commands::Clear => {
            let db_path = resolve_db_path(&cli)?;
            clear_db(&db_path)?;
        }
        Commands::Stats => {
            let store = IndexStore::open(resolve_db_path(&cli)?)?;
            print_json(&store.stats()?)?;
        }
        Commands::Apis => {
            let store = IndexStore::open(resolve_db_path(&cli)?)?;
            print_json(&store.registry().list()?)?;
        }
        Commands::Events => {
            let store = IndexStore::open(resolve_db_path(&cli)?)?;
            print_json(&store.events().list()?)?;
        }
        Commands::Event { id } => {
            let store = IndexStore::open(resolve_db_path(&cli)?)?;
            let event = store.events().get(id)?.ok_or(Error::EventNotFound(id))?;
            print_json(&event)?;
        }
        Commands::Class { api, class_name } => {
            let store = IndexStore::open(resolve_db_path(&cli)?)?;
            let target = ApiTarget::parse(&api);
            let api = store
                .registry()
                .resolve(&target)?
                .ok_or_else(|| Error::ApiNotFound {
                    target: target.to_string(),
                })?;
            let class = store.classes().get_class(&api, &normalize_class_name(&class_name))?;
            print_json(&ClassLookup {
                doc_url: class.doc_url(&api),
                api: api.name.clone(),
                class,
            })?;
        }
        Commands::Add {
            name,
            base_url,
            download_url,
            by,
        } => {
            let operation = ApiOperation::Add(ApiSpec {
                name,
                base_url,
                download_url,
            });
            submit(&cli, &by, operation)?;
        }
        Commands::Delete { target, by } => {
            submit(&cli, &by, ApiOperation::Delete(ApiTarget::parse(&target)))?;
        }
        Commands::Reload { target, by } => {
            submit(&cli, &by, ApiOperation::Reload(ApiTarget::parse(&target)))?;
        }
        Commands::Update {
            target,
            base_url,
            download_url,
            by,
        } => {
            let target = ApiTarget::parse(&target);
            let replacement = if base_url.is_some() || download_url.is_some() {
                let store = IndexStore::open(resolve_db_path(&cli)?)?;
                let existing = store.registry().resolve(&target)?.ok_or_else(|| {
                    Error::ApiNotFound {
                        target: target.to_string(),
                    }
                })?;
                Some(ApiSpec {
                    name: existing.name,
                    base_url: base_url.unwrap_or(existing.base_url),
                    download_url: download_url.unwrap_or(existing.download_url),
                })
            } else {
                None
            };
            submit(
                &cli,
                &by,
                ApiOperation::Update {
                    target,
                    replacement,
                },
            )?;
        }
        Commands::Dispatch {
            once,
            interval_secs,
        } => {
            let dispatcher = Dispatcher::new(
                Arc::new(open_workflow(&cli)?),
                DispatchConfig {
                    poll_interval: Duration::from_secs(interval_secs.max(1)),
                    ..DispatchConfig::default()
                },
            );
            if once {
                print_json(&dispatcher.run_once()?)?;
            } else {
                let stop = Arc::new(AtomicBool::new(false));
                dispatcher
                    .spawn(stop)
                    .join()
                    .map_err(|_| anyhow::anyhow!("dispatcher thread panicked"))?;
            }
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct Submitted {
    event_id: Uuid,
}

#[derive(Debug, Serialize)]
struct ClassLookup {
    api: String,
    doc_url: String,
    class: javadoc_index::model::ClassRecord,
}

fn open_workflow(cli: &Cli) -> Result<Workflow> {
    let store = IndexStore::open(resolve_db_path(cli)?)?;
    let mut config = WorkflowConfig::new(resolve_download_dir(cli)?);
    config.runtime_home = resolve_runtime_home(cli);
    Ok(Workflow::new(&store, config))
}

fn submit(cli: &Cli, requested_by: &str, operation: ApiOperation) -> Result<()> {
    let workflow = open_workflow(cli)?;
    let event_id = workflow
        .submit(requested_by, operation)
        .context("Failed to submit event")?;
    print_json(&Submitted { event_id })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Accepts `import a.b.C;` as well as `a.b.C`.
fn normalize_class_name(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("import") {
        s = rest.trim();
    }
    if s.ends_with(';') {
        s = s.trim_end_matches(';').trim();
    }
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_class_name_strips_import_whitespace_and_semicolon() {
        let raw = "import javax.servlet.http. HttpServlet ;";
        assert_eq!(normalize_class_name(raw), "javax.servlet.http.HttpServlet");
    }
}
