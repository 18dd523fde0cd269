//! Persistent storage for the index.
//!
//! Uses LMDB (via heed) with one named database per record family. Values are
//! JSON. LMDB serializes write transactions, which gives the registry its
//! unique-name guard and the class index its unique-key upsert without any
//! locking in this crate.

use anyhow::Context;
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::events::EventStore;
use crate::index::ClassIndex;
use crate::model::EventState;
use crate::registry::ApiRegistry;

pub const APIS_DB: &str = "apis";
pub const API_NAMES_DB: &str = "api_names";
pub const CLASSES_DB: &str = "classes";
pub const EVENTS_DB: &str = "events";

const DEFAULT_MAP_SIZE: usize = 2 * 1024 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 8;

pub(crate) type StrDb = Database<Str, Str>;

#[derive(Debug, Clone)]
pub struct IndexStore {
    env: Arc<Env>,
    db_path: PathBuf,
    apis: StrDb,
    api_names: StrDb,
    classes: StrDb,
    events: StrDb,
}

impl IndexStore {
    pub fn open(db_path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create index directory: {}", parent.display())
            })?;
        }

        let env = Arc::new(open_env(&db_path)?);

        let mut wtxn = env.write_txn()?;
        let apis = env.create_database::<Str, Str>(&mut wtxn, Some(APIS_DB))?;
        let api_names = env.create_database::<Str, Str>(&mut wtxn, Some(API_NAMES_DB))?;
        let classes = env.create_database::<Str, Str>(&mut wtxn, Some(CLASSES_DB))?;
        let events = env.create_database::<Str, Str>(&mut wtxn, Some(EVENTS_DB))?;
        wtxn.commit()?;

        tracing::debug!(path = %db_path.display(), "opened index store");

        Ok(Self {
            env,
            db_path,
            apis,
            api_names,
            classes,
            events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    #[cfg(test)]
    pub(crate) fn env(&self) -> &Env {
        &self.env
    }

    pub fn registry(&self) -> ApiRegistry {
        ApiRegistry::new(Arc::clone(&self.env), self.apis, self.api_names)
    }

    pub fn classes(&self) -> ClassIndex {
        ClassIndex::new(Arc::clone(&self.env), self.classes)
    }

    pub fn events(&self) -> EventStore {
        EventStore::new(Arc::clone(&self.env), self.events)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        let apis = self.apis.len(&rtxn)?;
        let classes = self.classes.len(&rtxn)?;
        drop(rtxn);

        let mut stats = StoreStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            apis,
            classes,
            events_new: 0,
            events_processing: 0,
            events_completed: 0,
            events_failed: 0,
        };
        for event in self.events().list()? {
            match event.state {
                EventState::New => stats.events_new += 1,
                EventState::Processing => stats.events_processing += 1,
                EventState::Completed => stats.events_completed += 1,
                EventState::Failed => stats.events_failed += 1,
            }
        }
        Ok(stats)
    }
}

fn open_env(db_path: &Path) -> anyhow::Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: We do not use NO_LOCK and keep default LMDB locking guarantees.
    // NO_SUB_DIR keeps the whole index in the single file named by --db.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open index env: {}", db_path.display()))
    }
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub db_path: String,
    pub apis: u64,
    pub classes: u64,
    pub events_new: u64,
    pub events_processing: u64,
    pub events_completed: u64,
    pub events_failed: u64,
}
