//! Typed errors for the index library.
//!
//! Per-entry conditions (`EnqueueTimeout`, `Parse`) are contained by the
//! ingestion pipeline and folded into its verdict. Archive-level and storage
//! conditions propagate to the admin event workflow, which records them on the
//! event instead of letting them reach the dispatcher.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::model::EventState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    /// Another API already uses this name, compared case-insensitively.
    #[error("an API named {name} already exists")]
    DuplicateName { name: String },

    #[error("API not found: {target}")]
    ApiNotFound { target: String },

    /// The archive could not be opened or read. Fatal to the ingestion run.
    #[error("failed to read archive {}: {source}", path.display())]
    ArchiveIo {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The work queue stayed full past the enqueue bound; the entry was dropped.
    #[error("timed out after {waited:?} queueing {entry}")]
    EnqueueTimeout { entry: String, waited: Duration },

    #[error("failed to parse {entry}: {reason}")]
    Parse { entry: String, reason: String },

    /// The run finished but some source units never reached the index.
    #[error("ingestion of {api} left {failed} source units unindexed")]
    IngestIncomplete { api: String, failed: usize },

    #[error("work queue for {api} did not drain within {ceiling:?}")]
    DrainTimeout { api: String, ceiling: Duration },

    #[error("event {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: EventState,
        to: EventState,
    },

    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] heed::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn archive(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        Error::ArchiveIo {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn parse(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}
